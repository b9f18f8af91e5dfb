//! Cheap usefulness test for candidate patterns.
//!
//! Before a projection is materialized, the evaluator runs the same
//! backward Dijkstra over lazily enumerated abstract transitions and stops
//! at the first settled state with a positive finite distance. No match
//! tree is built; transitions are kept sorted by successor and scanned via
//! binary search. The priority queue is owned by the caller and reused
//! across evaluations.

use log::debug;

use crate::projection::{
    compute_goal_states, compute_hash_layout, for_each_abstract_transition, ProjectionError,
};
use crate::queue::DijkstraQueue;
use crate::task::Task;
use crate::types::{Cost, Fact, Pattern, INF};
use crate::utils::add_costs;

/// How infinite-distance abstract states influence pattern selection.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum DeadEndTreatment {
    /// Only positive finite distances make a pattern useful.
    Ignore,
    /// A dead end next to reachable states also makes it useful.
    All,
    /// Dead ends not subsumed by previously collected ones make it useful;
    /// the collection accumulates across the whole run.
    #[default]
    New,
    /// Like `New`, but the collection is cleared at every restart.
    NewForCurrentOrder,
}

/// Partial-state dead ends collected across pattern evaluations.
///
/// Each entry is a partial assignment (sorted by variable) all of whose
/// extensions are dead ends. A candidate is subsumed if some stored entry
/// is a sub-assignment of it.
#[derive(Debug, Default)]
pub struct DeadEndCollection {
    partial_states: Vec<Vec<Fact>>,
}

impl DeadEndCollection {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.partial_states.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.partial_states.is_empty()
    }

    pub fn clear(&mut self) {
        self.partial_states.clear();
    }

    /// True iff some stored dead end is contained in `facts`.
    pub fn subsumes(&self, facts: &[Fact]) -> bool {
        self.partial_states
            .iter()
            .any(|stored| stored.iter().all(|fact| facts.contains(fact)))
    }

    pub fn add(&mut self, facts: Vec<Fact>) {
        debug_assert!(facts.windows(2).all(|w| w[0].var < w[1].var));
        self.partial_states.push(facts);
    }
}

/// One abstract transition in regression form.
#[derive(Debug, Clone)]
struct EvalTransition {
    successor: usize,
    hash_delta: i64,
    op_id: usize,
}

pub struct PatternEvaluator {
    pattern: Pattern,
    hash_multipliers: Vec<usize>,
    pattern_domains: Vec<usize>,
    num_states: usize,
    /// State-changing transitions, sorted by successor index.
    transitions: Vec<EvalTransition>,
    goal_states: Vec<usize>,
}

impl PatternEvaluator {
    pub fn new(task: &Task, pattern: Pattern) -> Result<Self, ProjectionError> {
        if pattern.is_empty() {
            return Err(ProjectionError::EmptyPattern);
        }
        let (hash_multipliers, pattern_domains, num_states) =
            compute_hash_layout(task, &pattern)?;

        let mut transitions = Vec::new();
        for_each_abstract_transition(
            task,
            &pattern,
            &hash_multipliers,
            &pattern_domains,
            |op_id, _successor_values, successor, hash_delta| {
                if hash_delta != 0 {
                    transitions.push(EvalTransition {
                        successor,
                        hash_delta,
                        op_id,
                    });
                }
            },
        );
        transitions.sort_by_key(|t| t.successor);

        let goal_states =
            compute_goal_states(task, &pattern, &hash_multipliers, &pattern_domains, num_states);

        Ok(Self {
            pattern,
            hash_multipliers,
            pattern_domains,
            num_states,
            transitions,
            goal_states,
        })
    }

    /// Transitions whose successor is `state`.
    fn transitions_into(&self, state: usize) -> &[EvalTransition] {
        let start = self.transitions.partition_point(|t| t.successor < state);
        let end = self.transitions.partition_point(|t| t.successor <= state);
        &self.transitions[start..end]
    }

    /// The partial state a dead abstract state denotes.
    fn partial_state(&self, state: usize) -> Vec<Fact> {
        self.pattern
            .iter()
            .enumerate()
            .map(|(index, &var)| {
                let value =
                    (state / self.hash_multipliers[index]) % self.pattern_domains[index];
                Fact::new(var, value)
            })
            .collect()
    }

    /// Decides whether materializing this projection can contribute
    /// heuristic information under the given costs.
    pub fn is_useful(
        &self,
        queue: &mut DijkstraQueue,
        dead_ends: &mut DeadEndCollection,
        treatment: DeadEndTreatment,
        costs: &[Cost],
    ) -> bool {
        let mut distances = vec![INF; self.num_states];
        queue.clear();
        for &goal in &self.goal_states {
            distances[goal] = 0;
            queue.push(0, goal);
        }

        while let Some((distance, state)) = queue.pop() {
            if distance > distances[state] {
                continue; // Stale entry.
            }
            if distance > 0 {
                // First settled state with 0 < d < INF.
                debug!(
                    "Pattern {:?} is useful: settled distance {}",
                    self.pattern, distance
                );
                return true;
            }
            for transition in self.transitions_into(state) {
                let cost = costs[transition.op_id];
                if cost == INF {
                    continue;
                }
                let predecessor = (state as i64 + transition.hash_delta) as usize;
                let alternative = add_costs(distance, cost);
                if alternative < distances[predecessor] {
                    distances[predecessor] = alternative;
                    queue.push(alternative, predecessor);
                }
            }
        }

        // No positive finite distance exists.
        match treatment {
            DeadEndTreatment::Ignore => false,
            DeadEndTreatment::All => {
                let has_dead_end = distances.contains(&INF);
                let has_reachable = distances.iter().any(|&d| d != INF);
                has_dead_end && has_reachable
            }
            DeadEndTreatment::New | DeadEndTreatment::NewForCurrentOrder => {
                let mut found_new = false;
                for state in 0..self.num_states {
                    if distances[state] != INF {
                        continue;
                    }
                    let partial = self.partial_state(state);
                    if !dead_ends.subsumes(&partial) {
                        dead_ends.add(partial);
                        found_new = true;
                    }
                }
                if found_new {
                    debug!("Pattern {:?} found new dead ends", self.pattern);
                }
                found_new
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::fixtures::{chain_task, wildcard_task};
    use crate::task::{Operator, Task};

    #[test]
    fn test_useful_on_positive_finite_distance() {
        let task = chain_task();
        let evaluator = PatternEvaluator::new(&task, vec![0, 1]).unwrap();
        let mut queue = DijkstraQueue::new();
        let mut dead_ends = DeadEndCollection::new();
        assert!(evaluator.is_useful(
            &mut queue,
            &mut dead_ends,
            DeadEndTreatment::Ignore,
            &[3, 2]
        ));
    }

    #[test]
    fn test_useless_when_goal_is_free() {
        // Pattern [1] of the wildcard task has no goal constraint: all
        // states settle at distance 0.
        let task = wildcard_task();
        let evaluator = PatternEvaluator::new(&task, vec![1]).unwrap();
        let mut queue = DijkstraQueue::new();
        let mut dead_ends = DeadEndCollection::new();
        assert!(!evaluator.is_useful(
            &mut queue,
            &mut dead_ends,
            DeadEndTreatment::Ignore,
            &[1]
        ));
    }

    #[test]
    fn test_zero_cost_operators_are_useless_under_ignore() {
        let task = chain_task();
        let evaluator = PatternEvaluator::new(&task, vec![0, 1]).unwrap();
        let mut queue = DijkstraQueue::new();
        let mut dead_ends = DeadEndCollection::new();
        assert!(!evaluator.is_useful(
            &mut queue,
            &mut dead_ends,
            DeadEndTreatment::Ignore,
            &[0, 0]
        ));
    }

    /// Goal `v0=0` with the only operator leading away from it: states 1
    /// and 2 are dead ends.
    fn dead_end_task() -> Task {
        Task::new(
            vec![3],
            vec![Operator::new(
                1,
                vec![crate::types::Fact::new(0, 0)],
                vec![crate::types::Fact::new(0, 1)],
            )],
            vec![0],
            vec![crate::types::Fact::new(0, 0)],
        )
    }

    #[test]
    fn test_all_treatment_reports_dead_ends() {
        let task = dead_end_task();
        let evaluator = PatternEvaluator::new(&task, vec![0]).unwrap();
        let mut queue = DijkstraQueue::new();
        let mut dead_ends = DeadEndCollection::new();
        assert!(!evaluator.is_useful(
            &mut queue,
            &mut dead_ends,
            DeadEndTreatment::Ignore,
            &[1]
        ));
        assert!(evaluator.is_useful(
            &mut queue,
            &mut dead_ends,
            DeadEndTreatment::All,
            &[1]
        ));
    }

    #[test]
    fn test_new_treatment_collects_then_subsumes() {
        let task = dead_end_task();
        let evaluator = PatternEvaluator::new(&task, vec![0]).unwrap();
        let mut queue = DijkstraQueue::new();
        let mut dead_ends = DeadEndCollection::new();

        // First evaluation discovers two new partial-state dead ends.
        assert!(evaluator.is_useful(
            &mut queue,
            &mut dead_ends,
            DeadEndTreatment::New,
            &[1]
        ));
        assert_eq!(dead_ends.len(), 2);

        // Re-evaluating finds nothing new.
        assert!(!evaluator.is_useful(
            &mut queue,
            &mut dead_ends,
            DeadEndTreatment::New,
            &[1]
        ));
        assert_eq!(dead_ends.len(), 2);
    }

    #[test]
    fn test_dead_end_subsumption() {
        let mut dead_ends = DeadEndCollection::new();
        dead_ends.add(vec![Fact::new(1, 2)]);
        assert!(dead_ends.subsumes(&[Fact::new(0, 0), Fact::new(1, 2)]));
        assert!(!dead_ends.subsumes(&[Fact::new(0, 0), Fact::new(1, 1)]));
        dead_ends.clear();
        assert!(dead_ends.is_empty());
        assert!(!dead_ends.subsumes(&[Fact::new(1, 2)]));
    }
}
