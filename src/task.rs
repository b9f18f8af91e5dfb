//! Read-only view of a grounded planning task.
//!
//! The engine never parses task files; it is handed a [`Task`] by the
//! search driver and only ever reads it. [`TaskInfo`] precomputes the
//! per-variable and per-operator indexes the pattern machinery queries in
//! tight loops: relevant operators, effect-variable bit sets, and the
//! causal successor relation used to enumerate interesting patterns.

use crate::bitset::BitSet;
use crate::types::{Cost, Fact, State, INF};

/// A grounded operator with at most one precondition and effect per variable.
#[derive(Debug, Clone)]
pub struct Operator {
    cost: Cost,
    preconditions: Vec<Fact>,
    effects: Vec<Fact>,
}

impl Operator {
    /// Facts are sorted by variable; duplicates per variable are rejected.
    pub fn new(cost: Cost, mut preconditions: Vec<Fact>, mut effects: Vec<Fact>) -> Self {
        assert!(cost >= 0, "Operator cost must be non-negative");
        assert!(!effects.is_empty(), "Operator must have an effect");
        preconditions.sort_by_key(|f| f.var);
        effects.sort_by_key(|f| f.var);
        assert!(
            preconditions.windows(2).all(|w| w[0].var < w[1].var),
            "At most one precondition per variable"
        );
        assert!(
            effects.windows(2).all(|w| w[0].var < w[1].var),
            "At most one effect per variable"
        );
        Self {
            cost,
            preconditions,
            effects,
        }
    }

    #[inline]
    pub fn cost(&self) -> Cost {
        self.cost
    }
    #[inline]
    pub fn preconditions(&self) -> &[Fact] {
        &self.preconditions
    }
    #[inline]
    pub fn effects(&self) -> &[Fact] {
        &self.effects
    }

    /// The precondition value on `var`, if any.
    pub fn precondition_on(&self, var: usize) -> Option<usize> {
        self.preconditions
            .iter()
            .find(|f| f.var == var)
            .map(|f| f.value)
    }

    /// The effect value on `var`, if any.
    pub fn effect_on(&self, var: usize) -> Option<usize> {
        self.effects.iter().find(|f| f.var == var).map(|f| f.value)
    }
}

/// Read-only facade over a grounded task.
#[derive(Debug, Clone)]
pub struct Task {
    domains: Vec<usize>,
    operators: Vec<Operator>,
    initial_state: State,
    goal: Vec<Fact>,
}

impl Task {
    pub fn new(
        domains: Vec<usize>,
        operators: Vec<Operator>,
        initial_state: State,
        mut goal: Vec<Fact>,
    ) -> Self {
        assert!(domains.iter().all(|&d| d >= 1), "Domains must be non-empty");
        assert_eq!(initial_state.len(), domains.len());
        for (var, &value) in initial_state.iter().enumerate() {
            assert!(value < domains[var], "Initial value out of domain");
        }
        for op in &operators {
            for fact in op.preconditions().iter().chain(op.effects()) {
                assert!(fact.var < domains.len(), "Fact variable out of range");
                assert!(fact.value < domains[fact.var], "Fact value out of domain");
            }
        }
        goal.sort_by_key(|f| f.var);
        assert!(
            goal.windows(2).all(|w| w[0].var < w[1].var),
            "At most one goal fact per variable"
        );
        Self {
            domains,
            operators,
            initial_state,
            goal,
        }
    }

    #[inline]
    pub fn num_variables(&self) -> usize {
        self.domains.len()
    }
    #[inline]
    pub fn domain(&self, var: usize) -> usize {
        self.domains[var]
    }
    #[inline]
    pub fn num_operators(&self) -> usize {
        self.operators.len()
    }
    #[inline]
    pub fn operator(&self, op_id: usize) -> &Operator {
        &self.operators[op_id]
    }
    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }
    pub fn initial_state(&self) -> &State {
        &self.initial_state
    }
    pub fn goal_facts(&self) -> &[Fact] {
        &self.goal
    }

    /// The goal value for `var`, if the goal constrains it.
    pub fn goal_value(&self, var: usize) -> Option<usize> {
        self.goal.iter().find(|f| f.var == var).map(|f| f.value)
    }

    /// Snapshot of all operator costs.
    pub fn operator_costs(&self) -> Vec<Cost> {
        self.operators.iter().map(|op| op.cost()).collect()
    }

    /// Total number of facts, and the flat-id offset of each variable.
    pub fn fact_id_offsets(&self) -> (Vec<usize>, usize) {
        let mut offsets = Vec::with_capacity(self.domains.len());
        let mut num_facts = 0;
        for &domain in &self.domains {
            offsets.push(num_facts);
            num_facts += domain;
        }
        (offsets, num_facts)
    }
}

/// Precomputed per-variable and per-operator indexes.
#[derive(Debug)]
pub struct TaskInfo {
    /// Operators with at least one effect on the variable.
    relevant_operators: Vec<Vec<usize>>,
    /// Per operator: bit set of variables it has an effect on.
    effect_vars: Vec<BitSet>,
    /// Causal successors: `v` is in `cg_successors[u]` iff some operator
    /// mentions `u` (precondition or effect) and has an effect on `v`.
    cg_successors: Vec<BitSet>,
    goal_vars: BitSet,
    num_operators: usize,
}

impl TaskInfo {
    pub fn new(task: &Task) -> Self {
        let num_vars = task.num_variables();
        let mut relevant_operators = vec![Vec::new(); num_vars];
        let mut effect_vars = Vec::with_capacity(task.num_operators());
        let mut cg_successors = vec![BitSet::new(num_vars); num_vars];

        for (op_id, op) in task.operators().iter().enumerate() {
            let mut effects = BitSet::new(num_vars);
            for eff in op.effects() {
                relevant_operators[eff.var].push(op_id);
                effects.insert(eff.var);
            }
            for mentioned in op.preconditions().iter().chain(op.effects()) {
                for eff in op.effects() {
                    if mentioned.var != eff.var {
                        cg_successors[mentioned.var].insert(eff.var);
                    }
                }
            }
            effect_vars.push(effects);
        }

        let mut goal_vars = BitSet::new(num_vars);
        for fact in task.goal_facts() {
            goal_vars.insert(fact.var);
        }

        Self {
            relevant_operators,
            effect_vars,
            cg_successors,
            goal_vars,
            num_operators: task.num_operators(),
        }
    }

    #[inline]
    pub fn num_operators(&self) -> usize {
        self.num_operators
    }

    pub fn relevant_operators(&self, var: usize) -> &[usize] {
        &self.relevant_operators[var]
    }

    #[inline]
    pub fn operator_affects_pattern(&self, pattern: &[usize], op_id: usize) -> bool {
        self.effect_vars[op_id].contains_any(pattern.iter().copied())
    }

    /// Number of operators with at least one effect inside the pattern.
    pub fn num_active_operators(&self, pattern: &[usize]) -> usize {
        (0..self.num_operators)
            .filter(|&op_id| self.operator_affects_pattern(pattern, op_id))
            .count()
    }

    #[inline]
    pub fn is_goal_var(&self, var: usize) -> bool {
        self.goal_vars.contains(var)
    }

    #[inline]
    pub fn is_causal_successor(&self, var: usize, succ: usize) -> bool {
        self.cg_successors[var].contains(succ)
    }

    /// True iff every operator affecting the pattern is free (cost 0 or `INF`).
    pub fn only_free_operators_affect(&self, pattern: &[usize], costs: &[Cost]) -> bool {
        for &var in pattern {
            for &op in self.relevant_operators(var) {
                if costs[op] > 0 && costs[op] != INF {
                    return false;
                }
            }
        }
        true
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::chain_task;
    use super::*;

    #[test]
    fn test_accessors() {
        let task = chain_task();
        assert_eq!(task.num_variables(), 2);
        assert_eq!(task.domain(1), 2);
        assert_eq!(task.num_operators(), 2);
        assert_eq!(task.operator_costs(), vec![3, 2]);
        assert_eq!(task.goal_value(1), Some(1));
        assert_eq!(task.goal_value(0), None);
    }

    #[test]
    fn test_fact_id_offsets() {
        let task = Task::new(vec![2, 3, 2], vec![
            Operator::new(1, vec![], vec![Fact::new(0, 1)]),
        ], vec![0, 0, 0], vec![Fact::new(0, 1)]);
        let (offsets, num_facts) = task.fact_id_offsets();
        assert_eq!(offsets, vec![0, 2, 5]);
        assert_eq!(num_facts, 7);
    }

    #[test]
    fn test_operator_lookup() {
        let task = chain_task();
        let op = task.operator(1);
        assert_eq!(op.precondition_on(0), Some(1));
        assert_eq!(op.precondition_on(1), Some(0));
        assert_eq!(op.effect_on(1), Some(1));
        assert_eq!(op.effect_on(0), None);
    }

    #[test]
    fn test_task_info_relevance() {
        let task = chain_task();
        let info = TaskInfo::new(&task);
        assert_eq!(info.relevant_operators(0), &[0]);
        assert_eq!(info.relevant_operators(1), &[1]);
        assert!(info.operator_affects_pattern(&[0], 0));
        assert!(!info.operator_affects_pattern(&[0], 1));
        assert_eq!(info.num_active_operators(&[0, 1]), 2);
    }

    #[test]
    fn test_task_info_causal_graph() {
        let task = chain_task();
        let info = TaskInfo::new(&task);
        // Operator 1 mentions var 0 and affects var 1.
        assert!(info.is_causal_successor(0, 1));
        assert!(!info.is_causal_successor(1, 0));
        assert!(info.is_goal_var(1));
        assert!(!info.is_goal_var(0));
    }

    #[test]
    fn test_only_free_operators() {
        let task = chain_task();
        let info = TaskInfo::new(&task);
        assert!(!info.only_free_operators_affect(&[0], &[3, 2]));
        assert!(info.only_free_operators_affect(&[0], &[0, 2]));
        assert!(info.only_free_operators_affect(&[0, 1], &[0, INF]));
    }

    #[test]
    #[should_panic(expected = "must have an effect")]
    fn test_operator_without_effect_panics() {
        Operator::new(1, vec![], vec![]);
    }
}
