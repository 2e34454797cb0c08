//! Chunk scheduling: which part ranges to request from which source next.
//!
//! The scheduler works in part offsets. Every source's part is indexed by
//! line (`line * sector_size`), so equal part offsets on different sources
//! belong to the same lines and a "frontier" is comparable across sources.
//!
//! Requests are issued within a read-ahead window that starts at the first
//! line not yet written to the output (the floor). The window slides as the
//! progress tracker advances, which bounds memory and lets a lagging source
//! hold back only a bounded amount of data.

mod mode;

pub use mode::FetchMode;

use std::ops::Range;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::TransferConfig;
use crate::health::HealthChange;
use crate::layout::StripeLayout;
use crate::ranges::RangeSet;
use crate::source::{Source, SourceHealth};

/// One range request to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    /// Unique within a session.
    pub id: u64,
    pub source: usize,
    /// Part byte range.
    pub range: Range<u64>,
}

impl ChunkRequest {
    pub fn len(&self) -> u64 {
        self.range.end - self.range.start
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Decides what to request from each source.
#[derive(Debug)]
pub struct ChunkScheduler {
    layout: StripeLayout,
    mode: FetchMode,
    /// Part ranges requested (and not given up on) per source.
    requested: Vec<RangeSet>,
    /// Next request size per source; grows on success.
    request_size: Vec<u64>,
    max_request_bytes: u64,
    floor_line: u64,
    end_line: u64,
    read_ahead_lines: u64,
    next_id: u64,
}

impl ChunkScheduler {
    /// Scheduler for the file byte range `range`.
    pub fn new(layout: StripeLayout, config: &TransferConfig, range: Range<u64>) -> Self {
        let sector = layout.sector_size();
        let line_len = layout.line_len();
        let mode = FetchMode::select(
            config.fetch_strategy(),
            &layout,
            config.small_file_bytes(),
            config.rotation_block_bytes(),
        );
        let initial = align_down(config.initial_request_bytes(), sector);
        let max_request_bytes = align_down(config.max_request_bytes(), sector).max(initial);
        let floor_line = (range.start / line_len).min(layout.line_count());
        let end_line = range.end.div_ceil(line_len).min(layout.line_count());
        let read_ahead_lines = (config.read_ahead_bytes() / line_len).max(1);

        debug!(
            ?mode,
            floor_line,
            end_line,
            read_ahead_lines,
            initial_request = initial,
            "Scheduler created"
        );

        Self {
            layout,
            mode,
            requested: vec![RangeSet::new(); layout.source_count()],
            request_size: vec![initial; layout.source_count()],
            max_request_bytes,
            floor_line,
            end_line,
            read_ahead_lines,
            next_id: 0,
        }
    }

    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    pub fn floor_line(&self) -> u64 {
        self.floor_line
    }

    /// Current request size for `source`.
    pub fn request_size(&self, source: usize) -> u64 {
        self.request_size[source]
    }

    /// Part offset of the next range `source` would be asked for.
    pub fn frontier(&self, source: usize) -> Option<u64> {
        self.next_unrequested(source).map(|r| r.start)
    }

    /// Issues requests for every schedulable source with spare capacity.
    ///
    /// Sources are served most-due first (lowest frontier, then smallest
    /// backlog, then index), one chunk per source per round, until no source
    /// can take more. Each issued chunk is booked on its `Source`.
    pub fn next_chunks(
        &mut self,
        sources: &mut [Source],
        now: Instant,
        max_outstanding: usize,
        max_request_bytes: u64,
    ) -> Vec<ChunkRequest> {
        let sector = self.layout.sector_size();
        let cap = align_down(max_request_bytes, sector);

        let mut order: Vec<(u64, u64, usize)> = sources
            .iter()
            .filter(|s| self.is_schedulable(s, now))
            .filter_map(|s| self.frontier(s.index).map(|f| (f, s.lag(), s.index)))
            .collect();
        order.sort_unstable();

        let mut chunks = Vec::new();
        loop {
            let mut issued = false;
            for &(_, _, index) in &order {
                if sources[index].in_flight >= max_outstanding {
                    continue;
                }
                let Some(free) = self.next_unrequested(index) else {
                    continue;
                };
                let len = self.chunk_len(index, &free, cap);
                let range = free.start..free.start + len;
                self.requested[index].insert(range.clone());
                sources[index].record_request(len, now);
                chunks.push(ChunkRequest {
                    id: self.next_id,
                    source: index,
                    range,
                });
                self.next_id += 1;
                issued = true;
            }
            if !issued {
                break;
            }
        }
        chunks
    }

    /// A chunk from `source` arrived; its next request may be larger.
    pub fn on_chunk_success(&mut self, source: usize) {
        let size = &mut self.request_size[source];
        *size = (*size * 2).min(self.max_request_bytes);
    }

    /// A chunk from `source` was lost; make its range requestable again.
    pub fn on_chunk_failed(&mut self, source: usize, range: Range<u64>) {
        self.requested[source].remove(range);
    }

    /// The output has advanced to file offset `contiguous`.
    pub fn advance_floor(&mut self, contiguous: u64) {
        let line = (contiguous / self.layout.line_len()).min(self.layout.line_count());
        if line > self.floor_line {
            self.floor_line = line;
            let below = line * self.layout.sector_size();
            for set in &mut self.requested {
                set.truncate_below(below);
            }
        }
    }

    /// Follows a health transition. A failed source becomes the spare, which
    /// puts back into rotation whichever source was spare before.
    pub fn on_health_change(&mut self, change: &HealthChange) {
        if change.to != SourceHealth::Failed {
            return;
        }
        let next = FetchMode::Spare(change.index);
        if self.mode != next {
            info!(
                from = ?self.mode,
                to = ?next,
                "Fetch mode changed after source failure"
            );
            self.mode = next;
        }
    }

    /// Stops fetching from `source` when no source is spare yet.
    ///
    /// Returns whether the mode changed.
    pub fn park(&mut self, source: usize) -> bool {
        if self.mode.spare().is_some() {
            return false;
        }
        info!(source, from = ?self.mode, "Parking slow source");
        self.mode = FetchMode::Spare(source);
        true
    }

    fn is_schedulable(&self, source: &Source, now: Instant) -> bool {
        source.is_active()
            && self.mode.spare() != Some(source.index)
            && !source.is_backing_off(now)
    }

    /// End of the read-ahead window on `source`'s part.
    fn ceiling(&self, source: usize) -> u64 {
        let last_line = self.end_line.min(self.floor_line + self.read_ahead_lines);
        (last_line * self.layout.sector_size()).min(self.layout.part_size(source))
    }

    /// First range `source` should fetch that has not been requested yet.
    fn next_unrequested(&self, source: usize) -> Option<Range<u64>> {
        let ceiling = self.ceiling(source);
        let requested = &self.requested[source];
        let mut pos = self.floor_line * self.layout.sector_size();
        while pos < ceiling {
            let span = self
                .mode
                .fetch_span(source, pos, self.layout.source_count())?;
            pos = pos.max(span.start);
            if pos >= ceiling {
                break;
            }
            let covered = requested.run_end(pos);
            if covered > pos {
                pos = covered;
                continue;
            }
            let end = span
                .end
                .min(ceiling)
                .min(requested.next_start_after(pos).unwrap_or(u64::MAX));
            return Some(pos..end);
        }
        None
    }

    /// Length of the next chunk within `free`: sector-aligned unless it runs
    /// to the end of the part.
    fn chunk_len(&self, source: usize, free: &Range<u64>, cap: u64) -> u64 {
        let sector = self.layout.sector_size();
        let want = self.request_size[source].min(cap).max(sector);
        let len = want.min(free.end - free.start);
        if free.start + len >= self.layout.part_size(source) {
            len
        } else {
            ((len / sector) * sector).max(len.min(sector))
        }
    }
}

fn align_down(bytes: u64, sector: u64) -> u64 {
    (bytes / sector).max(1) * sector
}
