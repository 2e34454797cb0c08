//! Stripe geometry: how file bytes map onto the parity-protected parts.
//!
//! A file is split into lines of `(N - 1) * sector_size` bytes. Line `i` is
//! cut into `N - 1` sectors; data source `d` (1-based) stores sector `d - 1`
//! of every line at part offset `i * sector_size`. Source 0 stores the XOR of
//! the line's data sectors, each zero-padded to `sector_size`.
//!
//! ```text
//! file:    | s1 s2 s3 s4 s5 | s1 s2 s3 s4 s5 | s1 s2 ..
//!            line 0           line 1           line 2
//! part 0:  | p0 | p1 | p2 ..     (parity)
//! part d:  | line0.sd | line1.sd | line2.sd ..
//! ```
//!
//! The final line may be short: its bytes fill sectors in order, so trailing
//! data sources can hold a partial or empty sector. Parts are never padded on
//! the wire; parity and source 1 always have the same size.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{RaidError, RaidResult};

/// Default number of sources (one parity plus five data parts).
pub const DEFAULT_SOURCE_COUNT: usize = 6;

/// Default bytes contributed by each source to one line.
pub const DEFAULT_SECTOR_SIZE: u64 = 16;

/// Smallest source count that still carries one parity and two data parts.
pub const MIN_SOURCE_COUNT: usize = 3;

/// Index of the parity source.
pub const PARITY_SOURCE: usize = 0;

/// Immutable geometry of one striped file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeLayout {
    source_count: usize,
    sector_size: u64,
    file_size: u64,
}

impl StripeLayout {
    /// Creates a layout, validating the parameters.
    pub fn new(source_count: usize, sector_size: u64, file_size: u64) -> RaidResult<Self> {
        if source_count < MIN_SOURCE_COUNT {
            return Err(RaidError::InvalidLayout(format!(
                "source count {} is below the minimum of {}",
                source_count, MIN_SOURCE_COUNT
            )));
        }
        if sector_size == 0 {
            return Err(RaidError::InvalidLayout(
                "sector size must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            source_count,
            sector_size,
            file_size,
        })
    }

    /// Layout with the default source count and sector size.
    pub fn with_defaults(file_size: u64) -> Self {
        Self {
            source_count: DEFAULT_SOURCE_COUNT,
            sector_size: DEFAULT_SECTOR_SIZE,
            file_size,
        }
    }

    pub fn source_count(&self) -> usize {
        self.source_count
    }

    /// Sources needed to reconstruct any line (`N - 1`).
    pub fn data_source_count(&self) -> usize {
        self.source_count - 1
    }

    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// File bytes covered by one full line.
    pub fn line_len(&self) -> u64 {
        self.data_source_count() as u64 * self.sector_size
    }

    /// Number of lines, counting a trailing partial line.
    pub fn line_count(&self) -> u64 {
        self.file_size.div_ceil(self.line_len())
    }

    /// Whether `source` holds parity rather than file data.
    pub fn is_parity(&self, source: usize) -> bool {
        source == PARITY_SOURCE
    }

    /// Size in bytes of the part stored by `source`.
    pub fn part_size(&self, source: usize) -> u64 {
        let line_len = self.line_len();
        let residual = self.file_size % line_len;
        let slot = source.saturating_sub(1) as u64;
        let tail = residual
            .saturating_sub(slot * self.sector_size)
            .min(self.sector_size);
        (self.file_size - residual) / self.data_source_count() as u64 + tail
    }

    /// Line holding the file byte at `offset`.
    pub fn line_containing(&self, offset: u64) -> RaidResult<u64> {
        if offset >= self.file_size {
            return Err(RaidError::OutOfRange {
                offset,
                limit: self.file_size,
            });
        }
        Ok(offset / self.line_len())
    }

    /// File offset of the first byte of `line`.
    pub fn line_start(&self, line: u64) -> u64 {
        line * self.line_len()
    }

    /// File bytes covered by `line`, clipped to the end of file.
    pub fn line_file_range(&self, line: u64) -> Range<u64> {
        let start = self.line_start(line).min(self.file_size);
        let end = (start + self.line_len()).min(self.file_size);
        start..end
    }

    /// Length of the sector `source` holds for `line` (0 past the data).
    pub fn sector_len(&self, line: u64, source: usize) -> u64 {
        let data_slot = if self.is_parity(source) { 1 } else { source };
        let start = self.line_start(line) + (data_slot as u64 - 1) * self.sector_size;
        if start >= self.file_size {
            0
        } else {
            (self.file_size - start).min(self.sector_size)
        }
    }

    /// Maps (line, data source, byte within sector) to a file offset.
    pub fn file_offset_of(&self, line: u64, source: usize, byte_in_line: u64) -> RaidResult<u64> {
        if self.is_parity(source) || source >= self.source_count {
            return Err(RaidError::OutOfRange {
                offset: source as u64,
                limit: self.source_count as u64,
            });
        }
        if byte_in_line >= self.sector_size {
            return Err(RaidError::OutOfRange {
                offset: byte_in_line,
                limit: self.sector_size,
            });
        }
        let offset =
            self.line_start(line) + (source as u64 - 1) * self.sector_size + byte_in_line;
        if offset >= self.file_size {
            return Err(RaidError::OutOfRange {
                offset,
                limit: self.file_size,
            });
        }
        Ok(offset)
    }

    /// Inverse of [`file_offset_of`](Self::file_offset_of).
    pub fn locate(&self, offset: u64) -> RaidResult<(u64, usize, u64)> {
        let line = self.line_containing(offset)?;
        let within = offset - self.line_start(line);
        let source = (within / self.sector_size) as usize + 1;
        Ok((line, source, within % self.sector_size))
    }

    /// Part byte range of `source` for lines `[first_line, first_line + lines)`.
    pub fn part_range(&self, first_line: u64, lines: u64, source: usize) -> Range<u64> {
        let part_size = self.part_size(source);
        let start = (first_line * self.sector_size).min(part_size);
        let end = ((first_line + lines) * self.sector_size).min(part_size);
        start..end
    }

    /// Number of lines fully present in `source` when it holds bytes up to
    /// `part_end` contiguously.
    pub fn lines_within(&self, source: usize, part_end: u64) -> u64 {
        if part_end >= self.part_size(source) {
            self.line_count()
        } else {
            part_end / self.sector_size
        }
    }
}
