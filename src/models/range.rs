//! # Index Ranges
//!
//! Half-open `[start, end)` spans over the dataset index space, and the chunking
//! iterator every level of the dispatch tree uses to split its span.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FanoutError, Result};

/// Half-open span `[start, end)` of dataset indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexRange {
    pub start: u64,
    pub end: u64,
}

impl IndexRange {
    /// Create a range, rejecting `start > end`
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(FanoutError::invalid_config(format!(
                "range start {start} is past range end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `other` lies entirely inside this range
    pub fn contains_range(&self, other: &IndexRange) -> bool {
        other.start >= self.start && other.end <= self.end && other.start <= other.end
    }

    /// Consecutive sub-ranges of `span` indices each, the last one clipped to `end`.
    ///
    /// A zero span yields nothing.
    pub fn chunks(&self, span: u64) -> RangeChunks {
        RangeChunks {
            next: self.start,
            end: self.end,
            span,
        }
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Iterator returned by [`IndexRange::chunks`]
#[derive(Debug, Clone)]
pub struct RangeChunks {
    next: u64,
    end: u64,
    span: u64,
}

impl Iterator for RangeChunks {
    type Item = IndexRange;

    fn next(&mut self) -> Option<Self::Item> {
        if self.span == 0 || self.next >= self.end {
            return None;
        }
        let start = self.next;
        let end = start.saturating_add(self.span).min(self.end);
        self.next = end;
        Some(IndexRange { start, end })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.span == 0 || self.next >= self.end {
            return (0, Some(0));
        }
        let remaining = (self.end - self.next).div_ceil(self.span);
        let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}
