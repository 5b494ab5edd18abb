//! # Partition Planner
//!
//! Derives the batch size, batch count and per-level branching factor of a job. The
//! result is frozen into the [`Job`](crate::models::Job) at level 0 and never
//! recomputed by descendants.

use serde::{Deserialize, Serialize};

use crate::error::{FanoutError, Result};

/// Partitioning of a dataset into batches and a dispatch tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionPlan {
    /// Indices per batch (the last batch may be shorter)
    pub batch_size: u64,
    /// `ceil(range_size / batch_size)`
    pub num_batches: u64,
    /// Smallest `b` with `b^num_levels >= num_batches`
    pub branching_factor: u64,
}

impl PartitionPlan {
    pub fn is_empty(&self) -> bool {
        self.num_batches == 0
    }
}

/// Plan a job.
///
/// When the desired batch size would produce more than `max_parallelism` batches the
/// batch size is widened to `ceil(range_size / max_parallelism)`.
///
/// ```rust
/// use tasker_fanout::orchestration::partition_planner::plan;
///
/// let plan = plan(1000, 50, 3000, 2).unwrap();
/// assert_eq!(plan.num_batches, 20);
/// assert_eq!(plan.branching_factor, 5);
/// ```
pub fn plan(
    range_size: u64,
    desired_batch_size: u64,
    max_parallelism: u64,
    num_levels: u32,
) -> Result<PartitionPlan> {
    if desired_batch_size == 0 {
        return Err(FanoutError::invalid_config("batch_size must be a positive integer"));
    }
    if max_parallelism == 0 {
        return Err(FanoutError::invalid_config(
            "max_parallelism must be a positive integer",
        ));
    }
    if num_levels == 0 {
        return Err(FanoutError::invalid_config("num_levels must be at least 1"));
    }

    let mut batch_size = desired_batch_size;
    let mut num_batches = range_size.div_ceil(batch_size);

    if num_batches > max_parallelism {
        batch_size = range_size.div_ceil(max_parallelism);
        num_batches = range_size.div_ceil(batch_size);
    }

    Ok(PartitionPlan {
        batch_size,
        num_batches,
        branching_factor: branching_factor(num_batches, num_levels),
    })
}

/// Integer `ceil(num_batches^(1/num_levels))`
pub fn branching_factor(num_batches: u64, num_levels: u32) -> u64 {
    if num_batches <= 1 || num_levels == 0 {
        return num_batches;
    }
    if num_levels == 1 {
        return num_batches;
    }

    let guess = (num_batches as f64).powf(1.0 / f64::from(num_levels)).ceil() as u64;
    let mut candidate = guess.max(1);

    // Float error can land one off in either direction
    while candidate > 1 && covers(candidate - 1, num_levels, num_batches) {
        candidate -= 1;
    }
    while !covers(candidate, num_levels, num_batches) {
        candidate += 1;
    }
    candidate
}

fn covers(base: u64, exponent: u32, target: u64) -> bool {
    match base.checked_pow(exponent) {
        Some(value) => value >= target,
        None => true,
    }
}
