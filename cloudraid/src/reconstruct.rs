//! Turning per-source part bytes back into file-order bytes.
//!
//! With every data source present this is plain interleaving. With one data
//! source absent, each of its sectors is the XOR of the matching sectors of
//! all other sources (parity included), zero-padded to the sector size and
//! truncated to the missing sector's length.

use crate::error::{RaidError, RaidResult};
use crate::layout::StripeLayout;

/// XORs `src` into the leading bytes of `dst`.
pub(crate) fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}

/// Reassembles lines from per-source buffers.
#[derive(Debug, Clone)]
pub struct ReconstructionEngine {
    layout: StripeLayout,
}

impl ReconstructionEngine {
    pub fn new(layout: StripeLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StripeLayout {
        &self.layout
    }

    /// Reconstructs a single line.
    ///
    /// `inputs[s]` holds source `s`'s sector for the line, or `None` when
    /// that source is unavailable. `missing` names a source to ignore even if
    /// its bytes are supplied.
    pub fn reconstruct(
        &self,
        line: u64,
        inputs: &[Option<&[u8]>],
        missing: Option<usize>,
    ) -> RaidResult<Vec<u8>> {
        self.reconstruct_lines(line, 1, inputs, missing)
    }

    /// Reconstructs `lines` consecutive lines starting at `first_line`.
    ///
    /// `inputs[s]` holds source `s`'s bytes for
    /// [`StripeLayout::part_range`]`(first_line, lines, s)`.
    pub fn reconstruct_lines(
        &self,
        first_line: u64,
        lines: u64,
        inputs: &[Option<&[u8]>],
        missing: Option<usize>,
    ) -> RaidResult<Vec<u8>> {
        let layout = &self.layout;
        let n = layout.source_count();
        if inputs.len() != n {
            return Err(RaidError::InvalidLayout(format!(
                "expected {} source buffers, got {}",
                n,
                inputs.len()
            )));
        }

        let absent: Vec<usize> = (0..n)
            .filter(|&s| inputs[s].is_none() || missing == Some(s))
            .collect();
        if absent.len() > 1 {
            return Err(RaidError::ReconstructionImpossible {
                line: first_line,
                missing: absent.len(),
            });
        }
        let absent = absent.first().copied();

        for (source, input) in inputs.iter().enumerate() {
            if let Some(bytes) = input {
                if absent == Some(source) {
                    continue;
                }
                let expected = layout.part_range(first_line, lines, source);
                if (bytes.len() as u64) < expected.end - expected.start {
                    return Err(RaidError::InvalidLayout(format!(
                        "source {} supplied {} bytes for lines {}..{}, expected {}",
                        source,
                        bytes.len(),
                        first_line,
                        first_line + lines,
                        expected.end - expected.start
                    )));
                }
            }
        }

        let end_line = (first_line + lines).min(layout.line_count());
        let out_start = layout.line_start(first_line).min(layout.file_size());
        let out_end = layout.line_start(end_line).min(layout.file_size());
        let mut out = Vec::with_capacity((out_end.saturating_sub(out_start)) as usize);

        let sector = layout.sector_size() as usize;
        let mut scratch = vec![0u8; sector];

        for line in first_line..end_line {
            let at = ((line - first_line) as usize) * sector;
            for source in 1..n {
                let len = layout.sector_len(line, source) as usize;
                if len == 0 {
                    break;
                }
                if absent == Some(source) {
                    scratch.fill(0);
                    for (other, input) in inputs.iter().enumerate() {
                        if other == source {
                            continue;
                        }
                        if let Some(bytes) = input {
                            let other_len = layout.sector_len(line, other) as usize;
                            if other_len > 0 {
                                xor_into(&mut scratch, &bytes[at..at + other_len]);
                            }
                        }
                    }
                    out.extend_from_slice(&scratch[..len]);
                } else if let Some(bytes) = inputs[source] {
                    out.extend_from_slice(&bytes[at..at + len]);
                }
            }
        }

        Ok(out)
    }
}
