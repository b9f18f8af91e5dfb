//! Sequential enumeration of candidate patterns in size order.
//!
//! Patterns of size 1, 2, ... are materialized lazily, one size bucket at a
//! time, and each bucket is stored contiguously in an [`ArrayPool`]. Within
//! a bucket, patterns are handed out according to a configurable
//! [`PatternOrder`]; data-dependent orders are recomputed on
//! [`SequentialPatternGenerator::restart`], deterministic ones are computed
//! once. All orderings are stable on ties.
//!
//! Only *interesting* patterns are enumerated: the pattern must contain a
//! goal variable, be connected in the causal graph, and every variable must
//! causally reach a goal variable inside the pattern.

use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::bitset::BitSet;
use crate::pool::ArrayPool;
use crate::task::{Task, TaskInfo};
use crate::timer::CountdownTimer;
use crate::types::Pattern;

/// Symmetric matrix of variable pairs already covered by selected patterns.
pub type UsedVarPairs = Vec<BitSet>;

pub fn new_used_var_pairs(num_variables: usize) -> UsedVarPairs {
    vec![BitSet::new(num_variables); num_variables]
}

/// Marks every pair of pattern variables as used.
pub fn mark_pattern_pairs(used: &mut UsedVarPairs, pattern: &[usize]) {
    for &var1 in pattern {
        for &var2 in pattern {
            used[var1].insert(var2);
        }
    }
}

/// Number of unordered pattern-variable pairs not yet covered.
pub fn count_new_var_pairs(pattern: &[usize], used: &UsedVarPairs) -> usize {
    let mut count = 0;
    for (i, &var1) in pattern.iter().enumerate() {
        for &var2 in &pattern[i + 1..] {
            if !used[var1].contains(var2) {
                count += 1;
            }
        }
    }
    count
}

/// Order in which patterns of the same size are handed out.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum PatternOrder {
    #[default]
    Original,
    Reverse,
    Random,
    PdbSizeUp,
    PdbSizeDown,
    CgSumUp,
    CgSumDown,
    CgMinUp,
    CgMinDown,
    CgMaxUp,
    CgMaxDown,
    NewVarPairsUp,
    NewVarPairsDown,
    ActiveOpsUp,
    ActiveOpsDown,
    /// Coin flip between `CgMinDown` and `ActiveOpsUp` per restart.
    AltTwo,
    ActiveOpsUpCgMinDown,
    CgMinDownActiveOpsUp,
}

impl PatternOrder {
    /// True iff the ordering depends on data that changes between restarts.
    fn is_data_dependent(self) -> bool {
        matches!(
            self,
            PatternOrder::Random
                | PatternOrder::NewVarPairsUp
                | PatternOrder::NewVarPairsDown
                | PatternOrder::AltTwo
        )
    }
}

/// PDB size of a pattern, or -1 if the product overflows.
pub fn pdb_size_score(domains: &[usize], pattern: &[usize]) -> i64 {
    let mut size: i64 = 1;
    for &var in pattern {
        let domain = match i64::try_from(domains[var]) {
            Ok(domain) => domain,
            Err(_) => return -1,
        };
        match size.checked_mul(domain) {
            Some(product) => size = product,
            None => return -1,
        }
    }
    size
}

fn compute_score(
    pattern: &[usize],
    order: PatternOrder,
    task_info: &TaskInfo,
    domains: &[usize],
    used_var_pairs: &UsedVarPairs,
) -> i64 {
    match order {
        PatternOrder::PdbSizeUp | PatternOrder::PdbSizeDown => pdb_size_score(domains, pattern),
        PatternOrder::CgSumUp | PatternOrder::CgSumDown => {
            pattern.iter().map(|&var| var as i64).sum()
        }
        PatternOrder::CgMinUp | PatternOrder::CgMinDown => {
            pattern.iter().map(|&var| var as i64).min().unwrap_or(i64::MAX)
        }
        PatternOrder::CgMaxUp | PatternOrder::CgMaxDown => {
            pattern.iter().map(|&var| var as i64).max().unwrap_or(-1)
        }
        PatternOrder::NewVarPairsUp | PatternOrder::NewVarPairsDown => {
            count_new_var_pairs(pattern, used_var_pairs) as i64
        }
        PatternOrder::ActiveOpsUp | PatternOrder::ActiveOpsDown => {
            task_info.num_active_operators(pattern) as i64
        }
        _ => unreachable!("No score for order {:?}", order),
    }
}

/// Reorders `order` (indices into `patterns`) according to `order_kind`.
///
/// Ties keep their current relative order; descending variants sort by the
/// negated score so stability is preserved.
fn compute_pattern_order(
    patterns: &ArrayPool,
    order: &mut [usize],
    order_kind: PatternOrder,
    task_info: &TaskInfo,
    domains: &[usize],
    used_var_pairs: &UsedVarPairs,
    rng: &mut ChaCha8Rng,
) {
    match order_kind {
        PatternOrder::Original => {}
        PatternOrder::Reverse => order.reverse(),
        PatternOrder::Random => order.shuffle(rng),
        PatternOrder::ActiveOpsUpCgMinDown | PatternOrder::CgMinDownActiveOpsUp => {
            let keys: Vec<(i64, i64)> = patterns
                .iter()
                .map(|pattern| {
                    let active_ops = compute_score(
                        pattern,
                        PatternOrder::ActiveOpsUp,
                        task_info,
                        domains,
                        used_var_pairs,
                    );
                    let cg_min = compute_score(
                        pattern,
                        PatternOrder::CgMinUp,
                        task_info,
                        domains,
                        used_var_pairs,
                    );
                    if order_kind == PatternOrder::ActiveOpsUpCgMinDown {
                        (active_ops, -cg_min)
                    } else {
                        (-cg_min, active_ops)
                    }
                })
                .collect();
            order.sort_by_key(|&id| keys[id]);
        }
        _ => {
            let descending = matches!(
                order_kind,
                PatternOrder::PdbSizeDown
                    | PatternOrder::CgSumDown
                    | PatternOrder::CgMinDown
                    | PatternOrder::CgMaxDown
                    | PatternOrder::NewVarPairsDown
                    | PatternOrder::ActiveOpsDown
            );
            let scores: Vec<i64> = patterns
                .iter()
                .map(|pattern| {
                    let score =
                        compute_score(pattern, order_kind, task_info, domains, used_var_pairs);
                    if descending {
                        -score
                    } else {
                        score
                    }
                })
                .collect();
            order.sort_by_key(|&id| scores[id]);
        }
    }
}

/// A pattern is interesting iff it contains a goal variable, its causal
/// subgraph is weakly connected, and every variable causally reaches a
/// goal variable without leaving the pattern.
fn is_interesting_pattern(pattern: &[usize], task_info: &TaskInfo, only_sga: bool) -> bool {
    let num_goal_vars = pattern
        .iter()
        .filter(|&&var| task_info.is_goal_var(var))
        .count();
    if num_goal_vars == 0 || (only_sga && num_goal_vars != 1) {
        return false;
    }
    if pattern.len() == 1 {
        return true;
    }

    let k = pattern.len();
    let edge = |i: usize, j: usize| task_info.is_causal_successor(pattern[i], pattern[j]);

    // Weak connectivity over the induced subgraph.
    let mut reached = vec![false; k];
    let mut stack = vec![0];
    reached[0] = true;
    while let Some(i) = stack.pop() {
        for j in 0..k {
            if !reached[j] && (edge(i, j) || edge(j, i)) {
                reached[j] = true;
                stack.push(j);
            }
        }
    }
    if !reached.iter().all(|&r| r) {
        return false;
    }

    // Backward fixpoint from the goal variables along causal arcs.
    let mut reaches_goal: Vec<bool> = pattern
        .iter()
        .map(|&var| task_info.is_goal_var(var))
        .collect();
    let mut changed = true;
    while changed {
        changed = false;
        for i in 0..k {
            if reaches_goal[i] {
                continue;
            }
            if (0..k).any(|j| reaches_goal[j] && edge(i, j)) {
                reaches_goal[i] = true;
                changed = true;
            }
        }
    }
    reaches_goal.iter().all(|&r| r)
}

/// Result of a [`SequentialPatternGenerator::get_pattern`] request.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum GeneratedPattern {
    Pattern(Pattern),
    /// All patterns up to the maximum size have been handed out.
    Empty,
    /// The countdown expired while materializing a size bucket.
    TimedOut,
}

pub struct SequentialPatternGenerator<'a> {
    task_info: &'a TaskInfo,
    num_variables: usize,
    domains: Vec<usize>,
    max_pattern_size: usize,
    only_sga_patterns: bool,
    order_kind: PatternOrder,
    /// `AltTwo` resolved once at construction; used for new buckets.
    default_order: PatternOrder,
    rng: ChaCha8Rng,
    /// One pool per materialized size (bucket `i` holds size `i + 1`).
    buckets: Vec<ArrayPool>,
    /// Per bucket: permutation of its pattern indices.
    orders: Vec<Vec<usize>>,
    cached_pattern_size: usize,
    num_generated_patterns: usize,
}

impl<'a> SequentialPatternGenerator<'a> {
    pub fn new(
        task: &Task,
        task_info: &'a TaskInfo,
        max_pattern_size: usize,
        only_sga_patterns: bool,
        order_kind: PatternOrder,
        mut rng: ChaCha8Rng,
    ) -> Self {
        let num_variables = task.num_variables();
        let domains = (0..num_variables).map(|v| task.domain(v)).collect();
        let default_order = resolve_order(order_kind, &mut rng);
        Self {
            task_info,
            num_variables,
            domains,
            max_pattern_size: max_pattern_size.min(num_variables),
            only_sga_patterns,
            order_kind,
            default_order,
            rng,
            buckets: Vec::new(),
            orders: Vec::new(),
            cached_pattern_size: 0,
            num_generated_patterns: 0,
        }
    }

    pub fn num_generated_patterns(&self) -> usize {
        self.num_generated_patterns
    }

    pub fn max_generated_pattern_size(&self) -> usize {
        self.cached_pattern_size
    }

    /// Returns the pattern with the given running id, materializing further
    /// size buckets on demand.
    pub fn get_pattern(
        &mut self,
        pattern_id: usize,
        used_var_pairs: &UsedVarPairs,
        timer: &CountdownTimer,
    ) -> GeneratedPattern {
        while pattern_id >= self.num_generated_patterns {
            if self.cached_pattern_size == self.max_pattern_size {
                return GeneratedPattern::Empty;
            }
            if !self.materialize_next_bucket(used_var_pairs, timer) {
                return GeneratedPattern::TimedOut;
            }
        }

        let mut start = 0;
        for (bucket, order) in self.buckets.iter().zip(&self.orders) {
            if pattern_id < start + order.len() {
                let internal_id = order[pattern_id - start];
                return GeneratedPattern::Pattern(bucket.get(internal_id).to_vec());
            }
            start += order.len();
        }
        unreachable!("Pattern id {} not found in any bucket", pattern_id);
    }

    /// Recomputes data-dependent orderings inside every cached bucket.
    pub fn restart(&mut self, used_var_pairs: &UsedVarPairs) {
        if !self.order_kind.is_data_dependent() {
            return;
        }
        let current_order = resolve_order(self.order_kind, &mut self.rng);
        for (bucket, order) in self.buckets.iter().zip(self.orders.iter_mut()) {
            reset_identity(order);
            compute_pattern_order(
                bucket,
                order,
                current_order,
                self.task_info,
                &self.domains,
                used_var_pairs,
                &mut self.rng,
            );
        }
    }

    /// Enumerates the next size bucket. Returns false on timeout, in which
    /// case the partial bucket is discarded.
    fn materialize_next_bucket(
        &mut self,
        used_var_pairs: &UsedVarPairs,
        timer: &CountdownTimer,
    ) -> bool {
        let size = self.cached_pattern_size + 1;
        debug!("Generate patterns of size {}", size);
        let mut bucket = ArrayPool::new();
        let mut pattern = Vec::with_capacity(size);
        if !self.enumerate(size, 0, &mut pattern, &mut bucket, timer) {
            return false;
        }

        let mut order: Vec<usize> = (0..bucket.len()).collect();
        compute_pattern_order(
            &bucket,
            &mut order,
            self.default_order,
            self.task_info,
            &self.domains,
            used_var_pairs,
            &mut self.rng,
        );

        info!("Stored {} patterns of size {}", bucket.len(), size);
        self.cached_pattern_size = size;
        self.num_generated_patterns += bucket.len();
        self.buckets.push(bucket);
        self.orders.push(order);
        true
    }

    /// Lexicographic enumeration of interesting size-`size` patterns.
    fn enumerate(
        &self,
        size: usize,
        next_var: usize,
        pattern: &mut Vec<usize>,
        bucket: &mut ArrayPool,
        timer: &CountdownTimer,
    ) -> bool {
        if pattern.len() == size {
            if timer.is_expired() {
                return false;
            }
            if is_interesting_pattern(pattern, self.task_info, self.only_sga_patterns) {
                bucket.append(pattern);
            }
            return true;
        }
        let remaining = size - pattern.len();
        for var in next_var..=self.num_variables.saturating_sub(remaining) {
            pattern.push(var);
            let ok = self.enumerate(size, var + 1, pattern, bucket, timer);
            pattern.pop();
            if !ok {
                return false;
            }
        }
        true
    }
}

fn resolve_order(order: PatternOrder, rng: &mut ChaCha8Rng) -> PatternOrder {
    if order == PatternOrder::AltTwo {
        if rng.random_range(0..2) == 0 {
            PatternOrder::CgMinDown
        } else {
            PatternOrder::ActiveOpsUp
        }
    } else {
        order
    }
}

fn reset_identity(order: &mut [usize]) {
    for (i, slot) in order.iter_mut().enumerate() {
        *slot = i;
    }
}
