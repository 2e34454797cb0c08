//! Fetch modes: which source fetches which part blocks.
//!
//! ```text
//! AllSources       every source fetches every block (redundant)
//! Rotating{B}      block k of every part is skipped by source k mod N
//! Spare(s)         source s is never fetched
//! ```
//!
//! In the last two modes each line is fetched from exactly N - 1 sources and
//! the remaining one is reconstructed. A failure always ends in `Spare`.

use std::ops::Range;

use crate::config::FetchStrategy;
use crate::layout::{StripeLayout, PARITY_SOURCE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    AllSources,
    Rotating { block_bytes: u64 },
    Spare(usize),
}

impl FetchMode {
    /// Picks the opening mode for a transfer.
    pub fn select(
        strategy: FetchStrategy,
        layout: &StripeLayout,
        small_file_bytes: u64,
        block_bytes: u64,
    ) -> Self {
        let sector = layout.sector_size();
        let block_bytes = (block_bytes / sector).max(1) * sector;
        match strategy {
            FetchStrategy::AllSources => FetchMode::AllSources,
            FetchStrategy::Rotating => FetchMode::Rotating { block_bytes },
            FetchStrategy::Auto => {
                if layout.part_size(1) <= small_file_bytes {
                    FetchMode::Spare(PARITY_SOURCE)
                } else {
                    FetchMode::Rotating { block_bytes }
                }
            }
        }
    }

    /// Source that is not fetched, if any.
    pub fn spare(&self) -> Option<usize> {
        match self {
            FetchMode::Spare(source) => Some(*source),
            _ => None,
        }
    }

    /// First span at or after `offset` that `source` fetches.
    ///
    /// Spans never cross a rotation block. `None` if the source fetches
    /// nothing in this mode.
    pub fn fetch_span(&self, source: usize, offset: u64, source_count: usize) -> Option<Range<u64>> {
        match *self {
            FetchMode::AllSources => Some(offset..u64::MAX),
            FetchMode::Spare(spare) => {
                if spare == source {
                    None
                } else {
                    Some(offset..u64::MAX)
                }
            }
            FetchMode::Rotating { block_bytes } => {
                let block = offset / block_bytes;
                if block % source_count as u64 == source as u64 {
                    Some((block + 1) * block_bytes..(block + 2) * block_bytes)
                } else {
                    Some(offset..(block + 1) * block_bytes)
                }
            }
        }
    }
}
