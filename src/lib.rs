//! # scp-rs: Saturated Cost Partitioning over Pattern Databases
//!
//! **`scp-rs`** is a cost-partitioning heuristic engine for classical
//! planning search: given a grounded task (finite-domain variables,
//! operators with preconditions, effects and non-negative costs, an
//! initial state and a partial goal), it produces admissible lower bounds
//! on the remaining plan cost of search states.
//!
//! ## How it works
//!
//! - **Projections** ([`projection`]) abstract the task onto a variable
//!   subset (a *pattern*), index abstract states with a perfect hash, and
//!   compute goal distances by backward Dijkstra. Each projection can
//!   report its *saturated costs*: the minimum per-operator costs that
//!   preserve all of its distances.
//! - **Saturated cost partitioning** ([`cost_partitioning`]) walks an
//!   ordered abstraction list, giving each abstraction the costs its
//!   predecessors did not need. The recorded lookup tables sum to an
//!   admissible heuristic; multiple orders combine by maximum.
//! - **Pattern collection** ([`generator`], [`systematic`], [`evaluator`])
//!   enumerates candidate patterns in size order, filters out candidates
//!   that cannot contribute under the current remaining costs, and grows a
//!   projection collection within time and memory budgets.
//! - **Online driver** ([`online`]) answers per-state queries during
//!   search, computing fresh partitionings for selected states (every k-th
//!   state, or only *novel* ones) while an improvement budget lasts, then
//!   shrinks to compact lookup tables.
//!
//! ## Quick start
//!
//! ```rust
//! use scp_rs::generator::{generate, GeneratorConfig};
//! use scp_rs::online::{OnlineConfig, OnlineScpHeuristic};
//! use scp_rs::task::{Operator, Task};
//! use scp_rs::types::Fact;
//!
//! // v0 must be flipped before v1 can be; goal is v1=1.
//! let task = Task::new(
//!     vec![2, 2],
//!     vec![
//!         Operator::new(3, vec![Fact::new(0, 0)], vec![Fact::new(0, 1)]),
//!         Operator::new(2, vec![Fact::new(0, 1), Fact::new(1, 0)], vec![Fact::new(1, 1)]),
//!     ],
//!     vec![0, 0],
//!     vec![Fact::new(1, 1)],
//! );
//!
//! let collection = generate(&task, &GeneratorConfig::default()).unwrap();
//! let mut heuristic = OnlineScpHeuristic::new(
//!     &task,
//!     collection.projections,
//!     &collection.stored_orders,
//!     &OnlineConfig::default(),
//! )
//! .unwrap();
//!
//! heuristic.notify_initial_state(task.initial_state());
//! let h = heuristic.compute_heuristic(&vec![0, 0]);
//! assert_eq!(h, Some(5)); // Exact: the full pattern is in the collection.
//! ```
//!
//! The search driver, task-file parsing and command-line wiring live
//! outside this crate; the engine only consumes a [`task::Task`] and
//! answers heuristic queries.

pub mod abstraction;
pub mod bitset;
pub mod cost_partitioning;
pub mod evaluator;
pub mod generator;
pub mod match_tree;
pub mod online;
pub mod orders;
pub mod pool;
pub mod projection;
pub mod queue;
pub mod systematic;
pub mod task;
pub mod timer;
pub mod types;
pub mod unsolvability;
pub mod utils;

// Re-export commonly used types.
pub use abstraction::{Abstraction, AbstractionFunction, Abstractions};
pub use cost_partitioning::{CostPartitioningHeuristic, Saturator};
pub use generator::{generate, ConfigError, GeneratorConfig, GeneratorResult};
pub use online::{OnlineConfig, OnlineScpHeuristic};
pub use projection::{Projection, ProjectionError};
pub use types::{Cost, Fact, Pattern, State, INF};
