//! Sets of byte ranges, kept merged.
//!
//! Used by the scheduler to remember what it asked each source for, and by
//! the progress tracker to remember what each source delivered.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::ops::Range;

/// A set of half-open `u64` ranges. Overlapping and adjacent ranges merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    /// start -> end, disjoint and non-adjacent.
    spans: BTreeMap<u64, u64>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Number of disjoint spans.
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Total bytes covered.
    pub fn covered_len(&self) -> u64 {
        self.spans.iter().map(|(s, e)| e - s).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        self.spans.iter().map(|(&s, &e)| s..e)
    }

    /// Adds `range`, merging with neighbours.
    pub fn insert(&mut self, range: Range<u64>) {
        if range.start >= range.end {
            return;
        }
        let mut start = range.start;
        let mut end = range.end;
        let touching: Vec<(u64, u64)> = self
            .spans
            .range(..=range.end)
            .rev()
            .take_while(|(_, &e)| e >= range.start)
            .map(|(&s, &e)| (s, e))
            .collect();
        for (s, e) in touching {
            self.spans.remove(&s);
            start = start.min(s);
            end = end.max(e);
        }
        self.spans.insert(start, end);
    }

    /// Removes `range`, splitting spans that straddle it.
    pub fn remove(&mut self, range: Range<u64>) {
        if range.start >= range.end {
            return;
        }
        let overlapping: Vec<(u64, u64)> = self
            .spans
            .range(..range.end)
            .rev()
            .take_while(|(_, &e)| e > range.start)
            .map(|(&s, &e)| (s, e))
            .collect();
        for (s, e) in overlapping {
            self.spans.remove(&s);
            if s < range.start {
                self.spans.insert(s, range.start);
            }
            if e > range.end {
                self.spans.insert(range.end, e);
            }
        }
    }

    /// Whether every byte of `range` is covered.
    pub fn contains_range(&self, range: Range<u64>) -> bool {
        range.start >= range.end || self.run_end(range.start) >= range.end
    }

    /// End of the covered run starting at `offset`, or `offset` itself when
    /// that byte is not covered.
    pub fn run_end(&self, offset: u64) -> u64 {
        match self.spans.range(..=offset).next_back() {
            Some((_, &e)) if e > offset => e,
            _ => offset,
        }
    }

    /// Start of the first span beginning strictly after `offset`.
    pub fn next_start_after(&self, offset: u64) -> Option<u64> {
        self.spans
            .range((Excluded(offset), Unbounded))
            .next()
            .map(|(&s, _)| s)
    }

    /// Uncovered sub-ranges of `range`, in order.
    pub fn gaps(&self, range: Range<u64>) -> Vec<Range<u64>> {
        let mut gaps = Vec::new();
        if range.start >= range.end {
            return gaps;
        }
        let mut cursor = self.run_end(range.start);
        while cursor < range.end {
            let next = self
                .next_start_after(cursor)
                .unwrap_or(range.end)
                .min(range.end);
            gaps.push(cursor..next);
            if next >= range.end {
                break;
            }
            cursor = self.run_end(next);
        }
        gaps
    }

    /// Drops everything below `offset`.
    pub fn truncate_below(&mut self, offset: u64) {
        self.remove(0..offset);
    }
}
