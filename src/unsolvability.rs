//! Dead-end short-circuit over a fixed abstraction collection.
//!
//! At construction, every abstraction computes its distance table once
//! under the task's original costs; abstract states with infinite distance
//! are recorded in per-abstraction bitmaps. A query state is unsolvable
//! iff any abstraction maps it to a recorded index. Distances only grow
//! when costs shrink, so the bitmaps stay valid for every later cost
//! partitioning.

use log::debug;

use crate::abstraction::{Abstraction, Abstractions};
use crate::bitset::BitSet;
use crate::types::{Cost, INF};

#[derive(Debug)]
struct UnsolvabilityInfo {
    abstraction_id: usize,
    infeasible: BitSet,
}

#[derive(Debug, Default)]
pub struct UnsolvabilityHeuristic {
    /// Only abstractions that actually have dead ends are recorded.
    infos: Vec<UnsolvabilityInfo>,
}

impl UnsolvabilityHeuristic {
    pub fn new(abstractions: &Abstractions, costs: &[Cost]) -> Self {
        let mut infos = Vec::new();
        for (abstraction_id, abstraction) in abstractions.iter().enumerate() {
            let distances = abstraction.compute_goal_distances(costs);
            let mut infeasible = BitSet::new(distances.len());
            for (state, &distance) in distances.iter().enumerate() {
                if distance == INF {
                    infeasible.insert(state);
                }
            }
            if !infeasible.is_empty() {
                debug!(
                    "Abstraction {} has {} infeasible abstract states",
                    abstraction_id,
                    infeasible.len()
                );
                infos.push(UnsolvabilityInfo {
                    abstraction_id,
                    infeasible,
                });
            }
        }
        Self { infos }
    }

    /// True iff any abstraction flags the abstract state vector.
    pub fn is_unsolvable(&self, abstract_state_ids: &[usize]) -> bool {
        self.infos
            .iter()
            .any(|info| info.infeasible.contains(abstract_state_ids[info.abstraction_id]))
    }

    /// Flags the abstractions whose bitmaps must survive extraction.
    pub fn mark_useful_abstractions(&self, useful: &mut [bool]) {
        for info in &self.infos {
            useful[info.abstraction_id] = true;
        }
    }
}
