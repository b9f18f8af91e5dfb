//! Saturated cost partitioning over an ordered abstraction list.
//!
//! Walking the abstractions in order, each one computes its distance table
//! under the costs left over by its predecessors, then gives back its
//! saturated costs. The recorded lookup tables form a
//! [`CostPartitioningHeuristic`] whose value is the `INF`-dominant sum of
//! per-abstraction lookups, admissible by the cost-partitioning argument.

use log::debug;

use crate::abstraction::{Abstraction, Abstractions};
use crate::types::{Cost, Order, INF};
use crate::utils::{add_costs, reduce_costs};

/// Saturation strategy for online SCP computations.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Saturator {
    /// One full saturation pass per order.
    #[default]
    OneShot,
    /// Cheap perimeter pass first; the full pass is added only when the
    /// perimeter result improves on the running maximum.
    Perimstar,
}

#[derive(Debug, Clone)]
struct LookupTable {
    abstraction_id: usize,
    h_values: Vec<Cost>,
}

/// A sum-of-lookups heuristic produced by one cost partitioning.
#[derive(Debug, Clone, Default)]
pub struct CostPartitioningHeuristic {
    lookup_tables: Vec<LookupTable>,
}

impl CostPartitioningHeuristic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a lookup table unless it carries no information at all.
    fn add_h_values(&mut self, abstraction_id: usize, h_values: Vec<Cost>) {
        if h_values.iter().any(|&h| h != 0) {
            self.lookup_tables.push(LookupTable {
                abstraction_id,
                h_values,
            });
        }
    }

    /// Merges the tables of `other` into this heuristic.
    pub fn add(&mut self, other: CostPartitioningHeuristic) {
        self.lookup_tables.extend(other.lookup_tables);
    }

    /// The `INF`-dominant sum of lookups for an abstract state vector.
    pub fn compute_heuristic(&self, abstract_state_ids: &[usize]) -> Cost {
        let mut sum = 0;
        for table in &self.lookup_tables {
            let h = table.h_values[abstract_state_ids[table.abstraction_id]];
            if h == INF {
                return INF;
            }
            sum = add_costs(sum, h);
        }
        sum
    }

    /// Flags every abstraction that contributes a lookup table.
    pub fn mark_useful_abstractions(&self, useful: &mut [bool]) {
        for table in &self.lookup_tables {
            useful[table.abstraction_id] = true;
        }
    }

    pub fn num_lookup_tables(&self) -> usize {
        self.lookup_tables.len()
    }

    pub fn num_heuristic_values(&self) -> usize {
        self.lookup_tables.iter().map(|t| t.h_values.len()).sum()
    }

    /// Estimated memory footprint of the stored tables, in KiB.
    pub fn estimate_size_kb(&self) -> usize {
        self.num_heuristic_values() * std::mem::size_of::<Cost>() / 1024
    }
}

/// Runs one saturated cost partitioning over `order`, consuming from
/// `remaining_costs` what each abstraction saturates.
pub fn compute_saturated_cost_partitioning_change_costs(
    abstractions: &Abstractions,
    order: &[usize],
    remaining_costs: &mut [Cost],
) -> CostPartitioningHeuristic {
    let mut heuristic = CostPartitioningHeuristic::new();
    for &abstraction_id in order {
        let abstraction = &abstractions[abstraction_id];
        let h_values = abstraction.compute_goal_distances(remaining_costs);
        let saturated = abstraction.compute_saturated_costs(&h_values);
        reduce_costs(remaining_costs, &saturated);
        heuristic.add_h_values(abstraction_id, h_values);
    }
    heuristic
}

/// Like [`compute_saturated_cost_partitioning_change_costs`], starting from
/// a private copy of `costs`.
pub fn compute_saturated_cost_partitioning(
    abstractions: &Abstractions,
    order: &[usize],
    costs: &[Cost],
) -> CostPartitioningHeuristic {
    let mut remaining_costs = costs.to_vec();
    compute_saturated_cost_partitioning_change_costs(abstractions, order, &mut remaining_costs)
}

/// Perimeter phase of the PERIMSTAR saturator.
///
/// Each abstraction records only reachability information (0 for finite
/// distances, `INF` for dead ends) and saturates just the operators that
/// must stay forbidden to preserve its distance-zero perimeter, leaving the
/// rest of `remaining_costs` for the full pass.
pub fn compute_perim_saturated_cost_partitioning(
    abstractions: &Abstractions,
    order: &[usize],
    remaining_costs: &mut [Cost],
) -> CostPartitioningHeuristic {
    let mut heuristic = CostPartitioningHeuristic::new();
    for &abstraction_id in order {
        let abstraction = &abstractions[abstraction_id];
        let h_values = abstraction.compute_goal_distances(remaining_costs);
        let saturated = abstraction.compute_perim_saturated_costs(&h_values);
        reduce_costs(remaining_costs, &saturated);
        let reachability: Vec<Cost> = h_values
            .iter()
            .map(|&h| if h == INF { INF } else { 0 })
            .collect();
        heuristic.add_h_values(abstraction_id, reachability);
    }
    heuristic
}

/// Computes one cost partitioning per stored order, for seeding a heuristic
/// collection.
pub fn compute_cost_partitionings_for_orders(
    abstractions: &Abstractions,
    orders: &[Order],
    costs: &[Cost],
) -> Vec<CostPartitioningHeuristic> {
    let heuristics: Vec<_> = orders
        .iter()
        .map(|order| compute_saturated_cost_partitioning(abstractions, order, costs))
        .collect();
    debug!("Seeded {} cost partitionings from stored orders", heuristics.len());
    heuristics
}
