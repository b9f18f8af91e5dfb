//! Filtered systematic pattern-collection generation.
//!
//! The top-level loop draws candidate patterns from the sequential
//! generator, filters them through the cheap evaluator, and materializes
//! the survivors as projections, subtracting each projection's saturated
//! costs from the running remaining-cost vector. Restarts reorder the
//! candidate stream until a whole restart adds nothing or a budget is hit.

use std::time::Duration;

use hashbrown::HashSet;
use log::{debug, info};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::abstraction::{Abstraction, Abstractions};
use crate::evaluator::{DeadEndCollection, DeadEndTreatment, PatternEvaluator};
use crate::projection::Projection;
use crate::queue::DijkstraQueue;
use crate::systematic::{
    mark_pattern_pairs, new_used_var_pairs, pdb_size_score, GeneratedPattern, PatternOrder,
    SequentialPatternGenerator, UsedVarPairs,
};
use crate::task::{Task, TaskInfo};
use crate::timer::{CountdownTimer, StopTimer};
use crate::types::{Cost, Order, Pattern};
use crate::utils::reduce_costs;

/// Contradictory or out-of-range options. Fatal, non-retryable.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be positive")]
    ZeroBudget(&'static str),
    #[error("interval must be >= 1, -1 or -2, got {0}")]
    InvalidInterval(i64),
}

/// Budgets and filters of the pattern search.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub max_pattern_size: usize,
    pub max_pdb_size: usize,
    pub max_collection_size: usize,
    pub max_patterns: usize,
    pub max_time: Duration,
    pub max_time_per_restart: Duration,
    /// Subtract saturated costs while collecting patterns.
    pub saturate: bool,
    pub only_sga_patterns: bool,
    /// Skip patterns affected only by operators of cost 0 or `INF`.
    pub ignore_useless_patterns: bool,
    /// Return the per-restart orders alongside the collection.
    pub store_orders: bool,
    pub dead_end_treatment: DeadEndTreatment,
    pub pattern_order: PatternOrder,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_pattern_size: usize::MAX,
            max_pdb_size: usize::MAX,
            max_collection_size: usize::MAX,
            max_patterns: usize::MAX,
            max_time: Duration::from_secs(100),
            max_time_per_restart: Duration::from_secs(10),
            saturate: true,
            only_sga_patterns: false,
            ignore_useless_patterns: false,
            store_orders: true,
            dead_end_treatment: DeadEndTreatment::New,
            pattern_order: PatternOrder::Original,
            seed: 42,
        }
    }
}

impl GeneratorConfig {
    pub fn with_max_pattern_size(mut self, value: usize) -> Self {
        self.max_pattern_size = value;
        self
    }
    pub fn with_max_pdb_size(mut self, value: usize) -> Self {
        self.max_pdb_size = value;
        self
    }
    pub fn with_max_collection_size(mut self, value: usize) -> Self {
        self.max_collection_size = value;
        self
    }
    pub fn with_max_patterns(mut self, value: usize) -> Self {
        self.max_patterns = value;
        self
    }
    pub fn with_max_time(mut self, value: Duration) -> Self {
        self.max_time = value;
        self
    }
    pub fn with_max_time_per_restart(mut self, value: Duration) -> Self {
        self.max_time_per_restart = value;
        self
    }
    pub fn with_saturate(mut self, value: bool) -> Self {
        self.saturate = value;
        self
    }
    pub fn with_only_sga_patterns(mut self, value: bool) -> Self {
        self.only_sga_patterns = value;
        self
    }
    pub fn with_ignore_useless_patterns(mut self, value: bool) -> Self {
        self.ignore_useless_patterns = value;
        self
    }
    pub fn with_store_orders(mut self, value: bool) -> Self {
        self.store_orders = value;
        self
    }
    pub fn with_dead_end_treatment(mut self, value: DeadEndTreatment) -> Self {
        self.dead_end_treatment = value;
        self
    }
    pub fn with_pattern_order(mut self, value: PatternOrder) -> Self {
        self.pattern_order = value;
        self
    }
    pub fn with_seed(mut self, value: u64) -> Self {
        self.seed = value;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pattern_size == 0 {
            return Err(ConfigError::ZeroBudget("max_pattern_size"));
        }
        if self.max_pdb_size == 0 {
            return Err(ConfigError::ZeroBudget("max_pdb_size"));
        }
        if self.max_collection_size == 0 {
            return Err(ConfigError::ZeroBudget("max_collection_size"));
        }
        if self.max_patterns == 0 {
            return Err(ConfigError::ZeroBudget("max_patterns"));
        }
        Ok(())
    }
}

/// Counters and phase timings of one generation run.
#[derive(Debug, Default, Clone)]
pub struct GeneratorStats {
    pub num_pattern_evaluations: usize,
    pub num_generated_patterns: usize,
    pub max_generated_pattern_size: usize,
    pub collection_size: u64,
    pub pattern_computation_time: Duration,
    pub evaluation_time: Duration,
}

/// The projection collection plus the explicit per-restart orders.
pub struct GeneratorResult {
    pub projections: Abstractions,
    pub patterns: Vec<Pattern>,
    pub stored_orders: Vec<Order>,
    pub stats: GeneratorStats,
}

/// Grows a projection collection until the budgets are exhausted.
pub fn generate(task: &Task, config: &GeneratorConfig) -> Result<GeneratorResult, ConfigError> {
    config.validate()?;

    let task_info = TaskInfo::new(task);
    let overall_timer = CountdownTimer::new(config.max_time);
    let mut pattern_generator = SequentialPatternGenerator::new(
        task,
        &task_info,
        config.max_pattern_size,
        config.only_sga_patterns,
        config.pattern_order,
        ChaCha8Rng::seed_from_u64(config.seed),
    );

    let mut selection = Selection {
        task,
        task_info: &task_info,
        config,
        domains: (0..task.num_variables()).map(|v| task.domain(v)).collect(),
        projections: Vec::new(),
        patterns: Vec::new(),
        pattern_set: HashSet::new(),
        used_var_pairs: new_used_var_pairs(task.num_variables()),
        dead_ends: DeadEndCollection::new(),
        queue: DijkstraQueue::new(),
        remaining_costs: task.operator_costs(),
        collection_size: 0,
        num_pattern_evaluations: 0,
        pattern_timer: StopTimer::new(),
        evaluation_timer: StopTimer::new(),
    };

    let mut stored_orders = Vec::new();
    let mut limit_reached = false;
    while !limit_reached {
        pattern_generator.restart(&selection.used_var_pairs);
        if config.dead_end_treatment == DeadEndTreatment::NewForCurrentOrder {
            selection.dead_ends.clear();
        }
        let num_patterns_before = selection.projections.len();
        limit_reached = selection.select_patterns(&mut pattern_generator, &overall_timer);
        let num_patterns_after = selection.projections.len();
        info!(
            "Patterns: {}, collection size: {}",
            num_patterns_after, selection.collection_size
        );
        if config.store_orders && num_patterns_after > num_patterns_before {
            stored_orders.push((num_patterns_before..num_patterns_after).collect());
        }
        if num_patterns_after == num_patterns_before {
            info!("Restart did not add any pattern");
            break;
        }
        if overall_timer.is_expired() {
            info!("Reached overall pattern generation time limit");
            break;
        }
    }

    let stats = GeneratorStats {
        num_pattern_evaluations: selection.num_pattern_evaluations,
        num_generated_patterns: pattern_generator.num_generated_patterns(),
        max_generated_pattern_size: pattern_generator.max_generated_pattern_size(),
        collection_size: selection.collection_size,
        pattern_computation_time: selection.pattern_timer.elapsed(),
        evaluation_time: selection.evaluation_timer.elapsed(),
    };
    info!(
        "Selected {}/{} systematic patterns after {} evaluations",
        selection.projections.len(),
        stats.num_generated_patterns,
        stats.num_pattern_evaluations
    );

    Ok(GeneratorResult {
        projections: selection.projections,
        patterns: selection.patterns,
        stored_orders,
        stats,
    })
}

struct Selection<'a> {
    task: &'a Task,
    task_info: &'a TaskInfo,
    config: &'a GeneratorConfig,
    domains: Vec<usize>,
    projections: Abstractions,
    patterns: Vec<Pattern>,
    pattern_set: HashSet<Pattern>,
    used_var_pairs: UsedVarPairs,
    dead_ends: DeadEndCollection,
    queue: DijkstraQueue,
    remaining_costs: Vec<Cost>,
    collection_size: u64,
    num_pattern_evaluations: usize,
    pattern_timer: StopTimer,
    evaluation_timer: StopTimer,
}

impl Selection<'_> {
    /// One restart: walks the candidate stream until it is exhausted, the
    /// restart times out (returns false either way), or a collection limit
    /// is hit (returns true).
    fn select_patterns(
        &mut self,
        pattern_generator: &mut SequentialPatternGenerator,
        overall_timer: &CountdownTimer,
    ) -> bool {
        let restart_timer =
            CountdownTimer::new(overall_timer.remaining().min(self.config.max_time_per_restart));
        for pattern_id in 0.. {
            self.pattern_timer.resume();
            let generated =
                pattern_generator.get_pattern(pattern_id, &self.used_var_pairs, &restart_timer);
            self.pattern_timer.stop();

            let pattern = match generated {
                GeneratedPattern::TimedOut => {
                    info!("Reached restart time limit");
                    return false;
                }
                GeneratedPattern::Empty => {
                    info!(
                        "Generated all patterns up to size {}",
                        self.config.max_pattern_size.min(self.task.num_variables())
                    );
                    return false;
                }
                GeneratedPattern::Pattern(pattern) => pattern,
            };
            if restart_timer.is_expired() {
                info!("Reached restart time limit");
                return false;
            }
            if self.pattern_set.contains(&pattern) {
                continue;
            }

            let pdb_size = pdb_size_score(&self.domains, &pattern);
            if pdb_size < 0 || pdb_size as u64 > self.config.max_pdb_size as u64 {
                // Pattern is too large.
                continue;
            }

            if self.projections.len() == self.config.max_patterns {
                info!("Reached maximum number of patterns");
                return true;
            }
            if self.config.max_collection_size != usize::MAX
                && pdb_size as u64 > self.config.max_collection_size as u64 - self.collection_size
            {
                info!("Reached maximum collection size");
                return true;
            }

            if self.config.ignore_useless_patterns
                && self
                    .task_info
                    .only_free_operators_affect(&pattern, &self.remaining_costs)
            {
                debug!("Only free operators affect {:?}", pattern);
                continue;
            }

            let select_pattern = if self.config.saturate {
                self.evaluation_timer.resume();
                let useful = match PatternEvaluator::new(self.task, pattern.clone()) {
                    Ok(evaluator) => evaluator.is_useful(
                        &mut self.queue,
                        &mut self.dead_ends,
                        self.config.dead_end_treatment,
                        &self.remaining_costs,
                    ),
                    Err(_) => false,
                };
                self.evaluation_timer.stop();
                useful
            } else {
                true
            };
            self.num_pattern_evaluations += 1;

            #[cfg(debug_assertions)]
            if self.config.saturate
                && self.config.dead_end_treatment == DeadEndTreatment::Ignore
            {
                if let Ok(projection) = Projection::new(self.task, pattern.clone()) {
                    let distances = projection.compute_goal_distances(&self.remaining_costs);
                    debug_assert_eq!(
                        select_pattern,
                        crate::utils::contains_positive_finite(&distances)
                    );
                }
            }

            if select_pattern {
                let projection = match Projection::new(self.task, pattern.clone()) {
                    Ok(projection) => projection,
                    // Overflow: drop the candidate.
                    Err(_) => continue,
                };
                info!("Add pattern {:?}", pattern);
                if self.config.saturate {
                    let distances = projection.compute_goal_distances(&self.remaining_costs);
                    let saturated = projection.compute_saturated_costs(&distances);
                    reduce_costs(&mut self.remaining_costs, &saturated);
                }
                mark_pattern_pairs(&mut self.used_var_pairs, &pattern);
                self.pattern_set.insert(pattern.clone());
                self.patterns.push(pattern);
                self.projections.push(Box::new(projection));
                self.collection_size += pdb_size as u64;
            }
        }
        unreachable!("Pattern ids are unbounded");
    }
}
