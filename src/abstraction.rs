//! The abstraction capability seam.
//!
//! Everything downstream of pattern selection (cost partitioning, order
//! generation, the online driver, the unsolvability oracle) talks to
//! abstractions through this trait, so projections and externally provided
//! abstraction kinds are interchangeable behind `Box<dyn Abstraction>`.

use crate::types::{Cost, Pattern, State};

/// A homomorphic abstraction of the task's transition system.
pub trait Abstraction {
    /// Maps a concrete state to its abstract state index.
    fn get_abstract_state_id(&self, state: &State) -> usize;

    /// Shortest goal distance per abstract state under the given operator
    /// costs (`INF` = unreachable). Requires the transition system.
    fn compute_goal_distances(&self, costs: &[Cost]) -> Vec<Cost>;

    /// Minimum per-operator costs preserving the given goal distances.
    /// Requires the transition system.
    fn compute_saturated_costs(&self, h_values: &[Cost]) -> Vec<Cost>;

    /// Costs preserving only the distance-zero perimeter: `INF` for
    /// operators crossing from a zero-distance state into an
    /// infinite-distance one, 0 otherwise. Requires the transition system.
    fn compute_perim_saturated_costs(&self, h_values: &[Cost]) -> Vec<Cost>;

    /// Concrete ids of operators inducing state-changing transitions,
    /// sorted and deduplicated.
    fn get_active_operators(&self) -> &[usize];

    /// True iff the operator induces at least one self-loop. An operator
    /// may both be active and induce self-loops.
    fn operator_induces_self_loop(&self, op_id: usize) -> bool;

    fn get_num_states(&self) -> usize;

    fn get_goal_states(&self) -> &[usize];

    /// Drops the transition system (operators, match tree, goal list),
    /// keeping only what `get_abstract_state_id` needs.
    fn release_transition_system(&mut self);

    /// The compact state-to-index map kept after the improvement phase.
    fn extract_abstraction_function(&self) -> AbstractionFunction;

    /// Logs a structural summary at debug level.
    fn dump(&self);
}

/// Collection of heavy abstractions, uniquely owned until extraction.
pub type Abstractions = Vec<Box<dyn Abstraction>>;

/// A state-to-abstract-index map without the transition system behind it.
///
/// For projections this is the pattern and its perfect-hash multipliers;
/// nothing else survives the end of the improvement phase.
#[derive(Debug, Clone)]
pub struct AbstractionFunction {
    pattern: Pattern,
    hash_multipliers: Vec<usize>,
}

impl AbstractionFunction {
    pub fn new(pattern: Pattern, hash_multipliers: Vec<usize>) -> Self {
        assert_eq!(pattern.len(), hash_multipliers.len());
        Self {
            pattern,
            hash_multipliers,
        }
    }

    #[inline]
    pub fn get_abstract_state_id(&self, state: &State) -> usize {
        self.pattern
            .iter()
            .zip(&self.hash_multipliers)
            .map(|(&var, &multiplier)| multiplier * state[var])
            .sum()
    }
}

/// Abstract state ids of `state` under every abstraction of a collection.
pub fn get_abstract_state_ids(abstractions: &Abstractions, state: &State) -> Vec<usize> {
    abstractions
        .iter()
        .map(|abstraction| abstraction.get_abstract_state_id(state))
        .collect()
}
