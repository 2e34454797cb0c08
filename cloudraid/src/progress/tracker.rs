//! Ordered delivery of out-of-order chunks.
//!
//! Chunks arrive from every source in any order. The tracker keeps what it
//! has not delivered yet in a [`BufferPool`], and whenever the lines at the
//! cursor can be produced (every data source present, or all but one source
//! present) it reconstructs them and writes them to the sink in one piece.

use std::ops::Range;

use bytes::Bytes;
use tracing::{debug, trace};

use super::resume::ResumeToken;
use crate::buffer::BufferPool;
use crate::error::{RaidError, RaidResult};
use crate::layout::StripeLayout;
use crate::ranges::RangeSet;
use crate::reconstruct::ReconstructionEngine;
use crate::sink::OutputSink;

/// Lines reconstructed per sink write at most.
const MAX_LINES_PER_WRITE: u64 = 16 * 1024;

/// Progress callback: `(completed_bytes, contiguous_bytes)`.
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Tracks received part bytes and the delivered prefix of a byte range.
pub struct ProgressTracker {
    layout: StripeLayout,
    engine: ReconstructionEngine,
    pool: BufferPool,
    /// Part ranges held per source, at or above the cursor.
    received: Vec<RangeSet>,
    bytes_received: Vec<u64>,
    /// First line not yet delivered.
    cursor_line: u64,
    contiguous: u64,
    completed: u64,
    range: Range<u64>,
    end_line: u64,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    /// Tracker for delivering file bytes `range`.
    pub fn new(layout: StripeLayout, range: Range<u64>) -> RaidResult<Self> {
        let start = range.start;
        Self::resume_at(layout, range, start)
    }

    /// Tracker for `range` whose bytes below `contiguous` were already
    /// delivered by an earlier session.
    pub fn resume_at(layout: StripeLayout, range: Range<u64>, contiguous: u64) -> RaidResult<Self> {
        if range.start > range.end || range.end > layout.file_size() {
            return Err(RaidError::OutOfRange {
                offset: range.end.max(range.start),
                limit: layout.file_size(),
            });
        }
        if contiguous < range.start || contiguous > range.end {
            return Err(RaidError::OutOfRange {
                offset: contiguous,
                limit: range.end,
            });
        }
        let line_len = layout.line_len();
        let end_line = range.end.div_ceil(line_len).min(layout.line_count());
        let cursor_line = if contiguous >= range.end {
            end_line
        } else {
            contiguous / line_len
        };
        let n = layout.source_count();
        let mut tracker = Self {
            layout,
            engine: ReconstructionEngine::new(layout),
            pool: BufferPool::new(n),
            received: vec![RangeSet::new(); n],
            bytes_received: vec![0; n],
            cursor_line,
            contiguous,
            completed: contiguous,
            range,
            end_line,
            callback: None,
        };
        tracker.refresh_completed();
        Ok(tracker)
    }

    pub fn set_callback(&mut self, callback: ProgressCallback) {
        self.callback = Some(callback);
    }

    pub fn layout(&self) -> &StripeLayout {
        &self.layout
    }

    pub fn range(&self) -> Range<u64> {
        self.range.clone()
    }

    /// Absolute file offset up to which output has been written.
    pub fn contiguous_bytes(&self) -> u64 {
        self.contiguous
    }

    /// Contiguous bytes plus bytes of lines ahead that could already be
    /// produced.
    pub fn completed_bytes(&self) -> u64 {
        self.completed
    }

    /// Unique bytes accepted from `source`.
    pub fn bytes_received(&self, source: usize) -> u64 {
        self.bytes_received[source]
    }

    pub fn per_source_bytes_received(&self) -> Vec<u64> {
        self.bytes_received.clone()
    }

    pub fn cursor_line(&self) -> u64 {
        self.cursor_line
    }

    pub fn is_complete(&self) -> bool {
        self.contiguous >= self.range.end
    }

    /// Bytes buffered and not yet delivered.
    pub fn buffered_bytes(&self) -> usize {
        self.pool.bytes_held()
    }

    /// Part offset below which each source is no longer needed.
    pub fn settled_part_offsets(&self) -> Vec<u64> {
        let below = self.cursor_line * self.layout.sector_size();
        (0..self.layout.source_count())
            .map(|s| below.min(self.layout.part_size(s)))
            .collect()
    }

    pub fn resume_token(&self, file_identity: &str) -> ResumeToken {
        ResumeToken {
            file_identity: file_identity.to_string(),
            file_size: self.layout.file_size(),
            source_count: self.layout.source_count(),
            sector_size: self.layout.sector_size(),
            range_start: self.range.start,
            range_end: self.range.end,
            contiguous_bytes: self.contiguous,
            per_source_bytes_received: self.settled_part_offsets(),
        }
    }

    /// Accepts `data` as bytes `range` of `source`'s part.
    ///
    /// Bytes already held or already delivered are ignored, so redundant and
    /// retried chunks are harmless. Returns the number of new bytes.
    pub fn record_received(&mut self, source: usize, range: Range<u64>, data: Bytes) -> RaidResult<u64> {
        if source >= self.layout.source_count() {
            return Err(RaidError::InvalidLayout(format!(
                "chunk from unknown source {}",
                source
            )));
        }
        let part_size = self.layout.part_size(source);
        if range.start > range.end || range.end > part_size {
            return Err(RaidError::OutOfRange {
                offset: range.end,
                limit: part_size,
            });
        }
        if data.len() as u64 != range.end - range.start {
            return Err(RaidError::InvalidLayout(format!(
                "chunk {}..{} from source {} carries {} bytes",
                range.start,
                range.end,
                source,
                data.len()
            )));
        }

        let floor = self.cursor_line * self.layout.sector_size();
        let wanted = range.start.max(floor)..range.end;
        let mut accepted = 0;
        for gap in self.received[source].gaps(wanted) {
            let from = (gap.start - range.start) as usize;
            let to = (gap.end - range.start) as usize;
            self.pool.insert(source, gap.start, data.slice(from..to));
            self.received[source].insert(gap.clone());
            accepted += gap.end - gap.start;
        }
        if accepted > 0 {
            self.bytes_received[source] += accepted;
            self.refresh_completed();
        }
        trace!(source, start = range.start, end = range.end, accepted, "Chunk recorded");
        Ok(accepted)
    }

    /// Writes every line that can be produced at the cursor.
    ///
    /// Returns the new contiguous offset.
    pub async fn advance_contiguous<S: OutputSink>(&mut self, sink: &mut S) -> RaidResult<u64> {
        while let Some((lines, missing)) = self.plan_run() {
            let first = self.cursor_line;
            let buffers = self.collect_inputs(first, lines, missing)?;
            let inputs: Vec<Option<&[u8]>> = buffers.iter().map(|b| b.as_deref()).collect();
            let out = self.engine.reconstruct_lines(first, lines, &inputs, missing)?;

            let out_start = self.layout.line_start(first).min(self.layout.file_size());
            let start = out_start.max(self.contiguous);
            let end = (out_start + out.len() as u64).min(self.range.end);
            if end > start {
                let slice = &out[(start - out_start) as usize..(end - out_start) as usize];
                sink.write(start, slice).await.map_err(RaidError::LocalIo)?;
            }

            self.cursor_line = first + lines;
            self.contiguous = if self.cursor_line >= self.end_line {
                self.range.end
            } else {
                end.max(self.contiguous)
            };
            let below = self.cursor_line * self.layout.sector_size();
            for source in 0..self.layout.source_count() {
                self.pool.release_below(source, below);
                self.received[source].truncate_below(below);
            }
            self.refresh_completed();

            debug!(
                first_line = first,
                lines,
                ?missing,
                contiguous = self.contiguous,
                buffered = self.pool.bytes_held(),
                "Lines delivered"
            );
            if let Some(callback) = &self.callback {
                callback(self.completed, self.contiguous);
            }
        }
        Ok(self.contiguous)
    }

    /// Longest deliverable run at the cursor, and the source to reconstruct.
    fn plan_run(&self) -> Option<(u64, Option<usize>)> {
        if self.cursor_line >= self.end_line {
            return None;
        }
        let cursor = self.cursor_line;
        let avail: Vec<u64> = (0..self.layout.source_count())
            .map(|s| self.available_until(s, cursor) - cursor)
            .collect();
        let (weakest, &least) = avail.iter().enumerate().min_by_key(|&(_, a)| *a)?;
        let others = avail
            .iter()
            .enumerate()
            .filter(|&(s, _)| s != weakest)
            .map(|(_, &a)| a)
            .min()
            .unwrap_or(0);

        let (run, missing) = if others > least {
            (others, Some(weakest))
        } else {
            (least, None)
        };
        let run = run.min(self.end_line - cursor).min(MAX_LINES_PER_WRITE);
        if run == 0 {
            None
        } else {
            Some((run, missing))
        }
    }

    /// First line at or after `line` that `source` does not hold. Lines
    /// past the end of the source's part count as held.
    fn available_until(&self, source: usize, line: u64) -> u64 {
        let start = line * self.layout.sector_size();
        let end = self.received[source].run_end(start);
        self.layout.lines_within(source, end).max(line)
    }

    fn collect_inputs(
        &self,
        first: u64,
        lines: u64,
        missing: Option<usize>,
    ) -> RaidResult<Vec<Option<Bytes>>> {
        (0..self.layout.source_count())
            .map(|s| {
                if missing == Some(s) {
                    return Ok(None);
                }
                let range = self.layout.part_range(first, lines, s);
                self.pool
                    .read_range(s, range.clone())
                    .map(Some)
                    .ok_or_else(|| {
                        RaidError::InvalidLayout(format!(
                            "source {} bytes {}..{} not buffered",
                            s, range.start, range.end
                        ))
                    })
            })
            .collect()
    }

    /// Recomputes `completed` by sweeping reconstructable runs ahead of the
    /// cursor.
    fn refresh_completed(&mut self) {
        let n = self.layout.source_count();
        let sector = self.layout.sector_size();
        let mut completed = self.contiguous;
        let mut line = self.cursor_line;
        while line < self.end_line {
            let mut ends: Vec<u64> = (0..n).map(|s| self.available_until(s, line)).collect();
            ends.sort_unstable();
            let reach = ends[1].min(self.end_line);
            if reach > line {
                let start = self.layout.line_start(line).max(self.contiguous);
                let end = self.layout.line_start(reach).min(self.range.end);
                completed += end.saturating_sub(start);
                line = reach;
                continue;
            }
            let next = self
                .received
                .iter()
                .filter_map(|set| set.next_start_after(line * sector))
                .map(|offset| offset.div_ceil(sector))
                .min();
            match next {
                Some(next) if next > line => line = next,
                _ => break,
            }
        }
        self.completed = completed.min(self.range.end);
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("range", &self.range)
            .field("cursor_line", &self.cursor_line)
            .field("contiguous", &self.contiguous)
            .field("completed", &self.completed)
            .field("buffered", &self.pool.bytes_held())
            .finish()
    }
}
