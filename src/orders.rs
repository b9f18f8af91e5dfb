//! Orders over an abstraction collection.
//!
//! An order generator turns an abstract-state vector into a permutation of
//! the abstraction indices; the cost-partitioning core then consumes the
//! abstractions in that order. The `verbose` flag is set for the first
//! evaluated state so a generator can log its scores once.

use log::debug;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::abstraction::{Abstraction, Abstractions};
use crate::types::{Cost, Order};
use crate::utils::reduce_costs;

/// Which order generator the online heuristic uses.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum OrderGeneratorKind {
    /// Collection order as generated.
    #[default]
    Original,
    /// Per-abstraction h-value descending, ties broken by smaller size.
    Greedy,
    /// Seeded shuffle per request.
    Random,
    /// Greedy, re-scored against the remaining costs at every step.
    DynamicGreedy,
}

pub fn make_order_generator(kind: OrderGeneratorKind, seed: u64) -> Box<dyn OrderGenerator> {
    match kind {
        OrderGeneratorKind::Original => Box::new(OrderGeneratorOriginal),
        OrderGeneratorKind::Greedy => Box::new(OrderGeneratorGreedy::new()),
        OrderGeneratorKind::Random => Box::new(OrderGeneratorRandom::new(seed)),
        OrderGeneratorKind::DynamicGreedy => Box::new(OrderGeneratorDynamicGreedy),
    }
}

pub trait OrderGenerator {
    /// Called once, before any state is evaluated.
    fn initialize(&mut self, abstractions: &Abstractions, costs: &[Cost]);

    /// Produces a permutation of `0..abstractions.len()` for one state.
    fn compute_order_for_state(
        &mut self,
        abstractions: &Abstractions,
        costs: &[Cost],
        abstract_state_ids: &[usize],
        verbose: bool,
    ) -> Order;
}

/// Keeps the collection order.
pub struct OrderGeneratorOriginal;

impl OrderGenerator for OrderGeneratorOriginal {
    fn initialize(&mut self, _abstractions: &Abstractions, _costs: &[Cost]) {}

    fn compute_order_for_state(
        &mut self,
        abstractions: &Abstractions,
        _costs: &[Cost],
        _abstract_state_ids: &[usize],
        _verbose: bool,
    ) -> Order {
        (0..abstractions.len()).collect()
    }
}

/// Seeded random permutation per request.
pub struct OrderGeneratorRandom {
    rng: ChaCha8Rng,
}

impl OrderGeneratorRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl OrderGenerator for OrderGeneratorRandom {
    fn initialize(&mut self, _abstractions: &Abstractions, _costs: &[Cost]) {}

    fn compute_order_for_state(
        &mut self,
        abstractions: &Abstractions,
        _costs: &[Cost],
        _abstract_state_ids: &[usize],
        _verbose: bool,
    ) -> Order {
        let mut order: Order = (0..abstractions.len()).collect();
        order.shuffle(&mut self.rng);
        order
    }
}

/// Sorts abstractions by their h-value for the evaluated state, computed
/// once under the original costs. Higher h first; `INF` sorts before every
/// finite value; ties prefer the smaller abstraction and stay stable.
pub struct OrderGeneratorGreedy {
    h_values_by_abstraction: Vec<Vec<Cost>>,
    num_states: Vec<usize>,
}

impl OrderGeneratorGreedy {
    pub fn new() -> Self {
        Self {
            h_values_by_abstraction: Vec::new(),
            num_states: Vec::new(),
        }
    }
}

impl Default for OrderGeneratorGreedy {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderGenerator for OrderGeneratorGreedy {
    fn initialize(&mut self, abstractions: &Abstractions, costs: &[Cost]) {
        self.h_values_by_abstraction = abstractions
            .iter()
            .map(|abstraction| abstraction.compute_goal_distances(costs))
            .collect();
        self.num_states = abstractions
            .iter()
            .map(|abstraction| abstraction.get_num_states())
            .collect();
    }

    fn compute_order_for_state(
        &mut self,
        abstractions: &Abstractions,
        _costs: &[Cost],
        abstract_state_ids: &[usize],
        verbose: bool,
    ) -> Order {
        assert_eq!(self.h_values_by_abstraction.len(), abstractions.len());
        let scores: Vec<Cost> = abstract_state_ids
            .iter()
            .enumerate()
            .map(|(i, &state_id)| self.h_values_by_abstraction[i][state_id])
            .collect();
        if verbose {
            debug!("Greedy order scores: {:?}", scores);
        }
        let mut order: Order = (0..abstractions.len()).collect();
        // Negated score ascending = score descending, stable on ties.
        order.sort_by_key(|&i| (std::cmp::Reverse(scores[i]), self.num_states[i]));
        order
    }
}

/// Picks the next abstraction by its h-value under the costs that are
/// still left, subtracting each pick's saturated costs before the next.
pub struct OrderGeneratorDynamicGreedy;

impl OrderGenerator for OrderGeneratorDynamicGreedy {
    fn initialize(&mut self, _abstractions: &Abstractions, _costs: &[Cost]) {}

    fn compute_order_for_state(
        &mut self,
        abstractions: &Abstractions,
        costs: &[Cost],
        abstract_state_ids: &[usize],
        verbose: bool,
    ) -> Order {
        let mut remaining = costs.to_vec();
        let mut order = Order::with_capacity(abstractions.len());
        let mut chosen = vec![false; abstractions.len()];
        for _ in 0..abstractions.len() {
            let mut best: Option<(usize, Cost, Vec<Cost>)> = None;
            for (i, abstraction) in abstractions.iter().enumerate() {
                if chosen[i] {
                    continue;
                }
                let h_values = abstraction.compute_goal_distances(&remaining);
                let h = h_values[abstract_state_ids[i]];
                // INF is Cost::MAX, so it naturally outranks finite values;
                // ties keep the earliest index.
                let better = match &best {
                    None => true,
                    Some((_, best_h, _)) => h > *best_h,
                };
                if better {
                    best = Some((i, h, h_values));
                }
            }
            let (i, h, h_values) = best.unwrap();
            if verbose {
                debug!("Dynamic greedy picks abstraction {} with h = {}", i, h);
            }
            chosen[i] = true;
            let saturated = abstractions[i].compute_saturated_costs(&h_values);
            reduce_costs(&mut remaining, &saturated);
            order.push(i);
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstraction::{get_abstract_state_ids, Abstraction};
    use crate::projection::Projection;
    use crate::task::fixtures::chain_task;

    fn chain_abstractions() -> (crate::task::Task, Abstractions) {
        let task = chain_task();
        let abstractions: Abstractions = vec![
            Box::new(Projection::new(&task, vec![1]).unwrap()),
            Box::new(Projection::new(&task, vec![0, 1]).unwrap()),
        ];
        (task, abstractions)
    }

    #[test]
    fn test_original_order() {
        let (task, abstractions) = chain_abstractions();
        let costs = task.operator_costs();
        let mut generator = make_order_generator(OrderGeneratorKind::Original, 0);
        generator.initialize(&abstractions, &costs);
        let ids = get_abstract_state_ids(&abstractions, task.initial_state());
        assert_eq!(
            generator.compute_order_for_state(&abstractions, &costs, &ids, true),
            vec![0, 1]
        );
    }

    #[test]
    fn test_greedy_prefers_higher_h() {
        let (task, abstractions) = chain_abstractions();
        let costs = task.operator_costs();
        let mut generator = make_order_generator(OrderGeneratorKind::Greedy, 0);
        generator.initialize(&abstractions, &costs);
        let ids = get_abstract_state_ids(&abstractions, task.initial_state());
        // h values at the initial state: pattern [1] gives 2, [0, 1] gives 5.
        assert_eq!(
            generator.compute_order_for_state(&abstractions, &costs, &ids, false),
            vec![1, 0]
        );
    }

    #[test]
    fn test_random_order_is_seeded() {
        let (task, abstractions) = chain_abstractions();
        let costs = task.operator_costs();
        let ids = get_abstract_state_ids(&abstractions, task.initial_state());

        let run = || {
            let mut generator = make_order_generator(OrderGeneratorKind::Random, 7);
            generator.initialize(&abstractions, &costs);
            vec![
                generator.compute_order_for_state(&abstractions, &costs, &ids, false),
                generator.compute_order_for_state(&abstractions, &costs, &ids, false),
            ]
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_dynamic_greedy_covers_all_abstractions() {
        let (task, abstractions) = chain_abstractions();
        let costs = task.operator_costs();
        let mut generator = make_order_generator(OrderGeneratorKind::DynamicGreedy, 0);
        generator.initialize(&abstractions, &costs);
        let ids = get_abstract_state_ids(&abstractions, task.initial_state());
        let mut order =
            generator.compute_order_for_state(&abstractions, &costs, &ids, false);
        assert_eq!(order.first(), Some(&1)); // Highest initial h.
        order.sort_unstable();
        assert_eq!(order, vec![0, 1]);
    }
}
