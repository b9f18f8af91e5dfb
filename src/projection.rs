//! Projections onto variable patterns (pattern databases).
//!
//! A [`Projection`] abstracts the task onto a pattern `P`: abstract states
//! are perfect-hash indices over the pattern variables, abstract operators
//! are the concrete operators with every unconstrained pattern variable
//! multiplied out, and goal distances come from a backward Dijkstra over
//! the regression match tree.
//!
//! Construction either completes or fails with [`ProjectionError`]; a
//! partially built projection is never observable.

use std::cell::RefCell;
use std::fmt;

use log::debug;
use thiserror::Error;

use crate::abstraction::{Abstraction, AbstractionFunction};
use crate::bitset::BitSet;
use crate::match_tree::MatchTree;
use crate::queue::DijkstraQueue;
use crate::task::Task;
use crate::types::{Cost, Pattern, State, INF};
use crate::utils::{add_costs, checked_product};

#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ProjectionError {
    #[error("pattern must not be empty")]
    EmptyPattern,
    #[error("pattern {0:?} exceeds the representable index range")]
    PatternTooLarge(Pattern),
}

/// An operator of the abstract transition system, in regression form.
///
/// The successor is fully specified (every pattern position is bound after
/// multiplying out), so one abstract operator encodes exactly one
/// transition: `predecessor = successor + hash_delta`.
#[derive(Debug, Clone)]
struct AbstractOperator {
    op_id: usize,
    successor: usize,
    hash_delta: i64,
}

/// How one pattern position relates to a concrete operator.
#[derive(Debug, Copy, Clone)]
enum PositionSpec {
    /// Precondition and effect: both sides fixed.
    PreEff { pre: usize, eff: usize },
    /// Precondition only: unchanged, both sides fixed.
    PreOnly { pre: usize },
    /// Effect without precondition: predecessor value is multiplied out.
    EffOnly { eff: usize },
    /// Untouched by the operator: value is multiplied out on both sides.
    Free,
}

pub struct Projection {
    pattern: Pattern,
    hash_multipliers: Vec<usize>,
    pattern_domains: Vec<usize>,
    num_states: usize,
    num_operators: usize,
    abstract_operators: Vec<AbstractOperator>,
    match_tree: Option<MatchTree>,
    active_operators: Vec<usize>,
    looping_operators: BitSet,
    goal_states: Vec<usize>,
    queue: RefCell<DijkstraQueue>,
}

impl Projection {
    pub fn new(task: &Task, pattern: Pattern) -> Result<Self, ProjectionError> {
        if pattern.is_empty() {
            return Err(ProjectionError::EmptyPattern);
        }
        assert!(
            crate::types::is_valid_pattern(&pattern),
            "Pattern must be strictly increasing"
        );
        assert!(
            *pattern.last().unwrap() < task.num_variables(),
            "Pattern variable out of range"
        );

        let (hash_multipliers, pattern_domains, num_states) = compute_hash_layout(task, &pattern)?;

        let mut variable_to_index = vec![None; task.num_variables()];
        for (index, &var) in pattern.iter().enumerate() {
            variable_to_index[var] = Some(index);
        }

        let mut abstract_operators = Vec::new();
        let mut match_tree = MatchTree::new(pattern_domains.clone());
        let mut active = BitSet::new(task.num_operators());
        let mut looping = BitSet::new(task.num_operators());

        for (op_id, op) in task.operators().iter().enumerate() {
            let affects_pattern = op
                .effects()
                .iter()
                .any(|eff| variable_to_index[eff.var].is_some());
            if !affects_pattern {
                // Applicable somewhere in the abstract space, always a loop.
                looping.insert(op_id);
            }
        }
        for_each_abstract_transition(
            task,
            &pattern,
            &hash_multipliers,
            &pattern_domains,
            |op_id, successor_values, successor, hash_delta| {
                if hash_delta == 0 {
                    // Self-loops never enter the match tree.
                    looping.insert(op_id);
                    return;
                }
                let index = abstract_operators.len();
                abstract_operators.push(AbstractOperator {
                    op_id,
                    successor,
                    hash_delta,
                });
                match_tree.insert(successor_values, index);
                active.insert(op_id);
            },
        );

        let goal_states =
            compute_goal_states(task, &pattern, &hash_multipliers, &pattern_domains, num_states);

        let projection = Self {
            pattern,
            hash_multipliers,
            pattern_domains,
            num_states,
            num_operators: task.num_operators(),
            abstract_operators,
            match_tree: Some(match_tree),
            active_operators: active.iter().collect(),
            looping_operators: looping,
            goal_states,
            queue: RefCell::new(DijkstraQueue::new()),
        };
        debug!(
            "Built projection over {:?}: {} states, {} abstract operators, {} goal states",
            projection.pattern,
            projection.num_states,
            projection.abstract_operators.len(),
            projection.goal_states.len()
        );
        Ok(projection)
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    #[inline]
    fn has_transition_system(&self) -> bool {
        self.match_tree.is_some()
    }

    /// Writes the pattern-position values of `state` into `values`.
    fn decode(&self, state: usize, values: &mut Vec<usize>) {
        values.clear();
        for (index, &multiplier) in self.hash_multipliers.iter().enumerate() {
            values.push(decode_value(state, multiplier, self.pattern_domains[index]));
        }
    }

    #[cfg(test)]
    fn num_abstract_operators(&self) -> usize {
        self.abstract_operators.len()
    }

    #[cfg(test)]
    fn abstract_operator_deltas(&self) -> Vec<i64> {
        self.abstract_operators.iter().map(|op| op.hash_delta).collect()
    }
}

/// Enumerates the abstract transitions a task induces over a pattern.
///
/// For every operator with at least one effect inside the pattern, every
/// unconstrained pattern position is multiplied out; the callback receives
/// the successor values and index, and the signed hash delta such that
/// `predecessor = successor + hash_delta` (0 for self-loops, which are
/// reported too). Operators without any pattern effect are skipped.
///
/// Shared by [`Projection`] and the pattern evaluator, which consumes the
/// transitions without building a match tree.
pub(crate) fn for_each_abstract_transition(
    task: &Task,
    pattern: &[usize],
    hash_multipliers: &[usize],
    pattern_domains: &[usize],
    mut callback: impl FnMut(usize, &[usize], usize, i64),
) {
    let mut specs = Vec::with_capacity(pattern.len());
    let mut successor_values = Vec::with_capacity(pattern.len());
    for (op_id, op) in task.operators().iter().enumerate() {
        let affects_pattern = op
            .effects()
            .iter()
            .any(|eff| pattern.binary_search(&eff.var).is_ok());
        if !affects_pattern {
            continue;
        }
        specs.clear();
        for &var in pattern {
            specs.push(match (op.precondition_on(var), op.effect_on(var)) {
                (Some(pre), Some(eff)) => PositionSpec::PreEff { pre, eff },
                (Some(pre), None) => PositionSpec::PreOnly { pre },
                (None, Some(eff)) => PositionSpec::EffOnly { eff },
                (None, None) => PositionSpec::Free,
            });
        }
        multiply_out(
            op_id,
            &specs,
            hash_multipliers,
            pattern_domains,
            &mut successor_values,
            0,
            &mut callback,
        );
    }
}

/// Recursively multiplies out the unconstrained positions, emitting one
/// abstract transition per combination of predecessor values.
fn multiply_out(
    op_id: usize,
    specs: &[PositionSpec],
    hash_multipliers: &[usize],
    pattern_domains: &[usize],
    successor_values: &mut Vec<usize>,
    hash_delta: i64,
    callback: &mut impl FnMut(usize, &[usize], usize, i64),
) {
    let index = successor_values.len();
    if index == specs.len() {
        let successor = successor_values
            .iter()
            .zip(hash_multipliers)
            .map(|(&value, &multiplier)| value * multiplier)
            .sum();
        callback(op_id, successor_values, successor, hash_delta);
        return;
    }
    let multiplier = hash_multipliers[index] as i64;
    match specs[index] {
        PositionSpec::PreEff { pre, eff } => {
            successor_values.push(eff);
            let delta = hash_delta + multiplier * (pre as i64 - eff as i64);
            multiply_out(
                op_id,
                specs,
                hash_multipliers,
                pattern_domains,
                successor_values,
                delta,
                callback,
            );
            successor_values.pop();
        }
        PositionSpec::PreOnly { pre } => {
            successor_values.push(pre);
            multiply_out(
                op_id,
                specs,
                hash_multipliers,
                pattern_domains,
                successor_values,
                hash_delta,
                callback,
            );
            successor_values.pop();
        }
        PositionSpec::EffOnly { eff } => {
            for pre in 0..pattern_domains[index] {
                successor_values.push(eff);
                let delta = hash_delta + multiplier * (pre as i64 - eff as i64);
                multiply_out(
                    op_id,
                    specs,
                    hash_multipliers,
                    pattern_domains,
                    successor_values,
                    delta,
                    callback,
                );
                successor_values.pop();
            }
        }
        PositionSpec::Free => {
            for value in 0..pattern_domains[index] {
                successor_values.push(value);
                multiply_out(
                    op_id,
                    specs,
                    hash_multipliers,
                    pattern_domains,
                    successor_values,
                    hash_delta,
                    callback,
                );
                successor_values.pop();
            }
        }
    }
}

/// Computes perfect-hash multipliers and the state count for a pattern.
pub(crate) fn compute_hash_layout(
    task: &Task,
    pattern: &[usize],
) -> Result<(Vec<usize>, Vec<usize>, usize), ProjectionError> {
    let mut hash_multipliers = Vec::with_capacity(pattern.len());
    let mut pattern_domains = Vec::with_capacity(pattern.len());
    let mut num_states = 1usize;
    for &var in pattern {
        hash_multipliers.push(num_states);
        pattern_domains.push(task.domain(var));
        num_states = checked_product(num_states, task.domain(var), usize::MAX)
            .ok_or_else(|| ProjectionError::PatternTooLarge(pattern.to_vec()))?;
    }
    Ok((hash_multipliers, pattern_domains, num_states))
}

/// Enumerates the abstract goal states of a pattern, in increasing order.
pub(crate) fn compute_goal_states(
    task: &Task,
    pattern: &[usize],
    hash_multipliers: &[usize],
    pattern_domains: &[usize],
    num_states: usize,
) -> Vec<usize> {
    let abstract_goals: Vec<(usize, usize)> = pattern
        .iter()
        .enumerate()
        .filter_map(|(index, &var)| task.goal_value(var).map(|value| (index, value)))
        .collect();
    (0..num_states)
        .filter(|&state| {
            abstract_goals.iter().all(|&(index, value)| {
                decode_value(state, hash_multipliers[index], pattern_domains[index]) == value
            })
        })
        .collect()
}

#[inline]
fn decode_value(state: usize, multiplier: usize, domain: usize) -> usize {
    (state / multiplier) % domain
}

impl Abstraction for Projection {
    fn get_abstract_state_id(&self, state: &State) -> usize {
        self.pattern
            .iter()
            .zip(&self.hash_multipliers)
            .map(|(&var, &multiplier)| multiplier * state[var])
            .sum()
    }

    fn compute_goal_distances(&self, costs: &[Cost]) -> Vec<Cost> {
        assert!(
            self.has_transition_system(),
            "Transition system already released"
        );
        assert_eq!(costs.len(), self.num_operators);
        debug_assert!(costs.iter().all(|&c| c >= 0));

        let match_tree = self.match_tree.as_ref().unwrap();
        let mut distances = vec![INF; self.num_states];
        let mut queue = self.queue.borrow_mut();
        queue.clear();
        for &goal in &self.goal_states {
            distances[goal] = 0;
            queue.push(0, goal);
        }

        let mut values = Vec::with_capacity(self.pattern.len());
        let mut applicable = Vec::new();
        while let Some((distance, state)) = queue.pop() {
            if distance > distances[state] {
                continue; // Stale entry.
            }
            self.decode(state, &mut values);
            applicable.clear();
            match_tree.lookup(&values, &mut applicable);
            for &index in &applicable {
                let op = &self.abstract_operators[index];
                let cost = costs[op.op_id];
                if cost == INF {
                    continue;
                }
                let predecessor = (state as i64 + op.hash_delta) as usize;
                let alternative = add_costs(distance, cost);
                if alternative < distances[predecessor] {
                    distances[predecessor] = alternative;
                    queue.push(alternative, predecessor);
                }
            }
        }
        distances
    }

    fn compute_saturated_costs(&self, h_values: &[Cost]) -> Vec<Cost> {
        assert!(
            self.has_transition_system(),
            "Transition system already released"
        );
        assert_eq!(h_values.len(), self.num_states);

        // Sentinel for "no state-changing transition seen yet".
        let mut saturated = vec![Cost::MIN; self.num_operators];
        for op in &self.abstract_operators {
            let successor_h = h_values[op.successor];
            let predecessor = (op.successor as i64 + op.hash_delta) as usize;
            let predecessor_h = h_values[predecessor];
            if predecessor_h == INF {
                continue;
            }
            let needed = if successor_h == INF {
                // The operator must stay forbidden to keep that state a
                // dead end.
                INF
            } else {
                predecessor_h - successor_h
            };
            saturated[op.op_id] = saturated[op.op_id].max(needed);
        }
        for (op_id, sat) in saturated.iter_mut().enumerate() {
            if *sat == Cost::MIN {
                *sat = 0;
            } else if self.looping_operators.contains(op_id) {
                // A self-loop needs sat >= 0 to preserve its distance.
                *sat = (*sat).max(0);
            }
        }
        saturated
    }

    fn compute_perim_saturated_costs(&self, h_values: &[Cost]) -> Vec<Cost> {
        assert!(
            self.has_transition_system(),
            "Transition system already released"
        );
        assert_eq!(h_values.len(), self.num_states);

        let mut saturated = vec![0; self.num_operators];
        for op in &self.abstract_operators {
            let predecessor = (op.successor as i64 + op.hash_delta) as usize;
            if h_values[predecessor] == 0 && h_values[op.successor] == INF {
                saturated[op.op_id] = INF;
            }
        }
        saturated
    }

    fn get_active_operators(&self) -> &[usize] {
        &self.active_operators
    }

    fn operator_induces_self_loop(&self, op_id: usize) -> bool {
        self.looping_operators.contains(op_id)
    }

    fn get_num_states(&self) -> usize {
        self.num_states
    }

    fn get_goal_states(&self) -> &[usize] {
        &self.goal_states
    }

    fn release_transition_system(&mut self) {
        self.match_tree = None;
        self.abstract_operators = Vec::new();
        self.goal_states = Vec::new();
        self.queue.borrow_mut().clear();
    }

    fn extract_abstraction_function(&self) -> AbstractionFunction {
        AbstractionFunction::new(self.pattern.clone(), self.hash_multipliers.clone())
    }

    fn dump(&self) {
        debug!(
            "Projection over {:?}: {} states, {} active operators, {} goal states",
            self.pattern,
            self.num_states,
            self.active_operators.len(),
            self.goal_states.len()
        );
    }
}

impl fmt::Debug for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projection")
            .field("pattern", &self.pattern)
            .field("num_states", &self.num_states)
            .field("num_abstract_operators", &self.abstract_operators.len())
            .finish()
    }
}
