//! Splitting a plaintext-layout buffer into parity-protected parts.
//!
//! This is the upload-side inverse of [`crate::reconstruct`]. It is also what
//! the test doubles use to fabricate source content.

use std::io::Write;

use crate::error::{RaidError, RaidResult};
use crate::layout::{StripeLayout, PARITY_SOURCE};
use crate::reconstruct::xor_into;

/// Produces the N part buffers for a file.
#[derive(Debug, Clone, Copy)]
pub struct StripeEncoder {
    layout: StripeLayout,
}

impl StripeEncoder {
    pub fn new(layout: StripeLayout) -> Self {
        Self { layout }
    }

    /// Splits `data` (exactly `file_size` bytes) into one buffer per source.
    pub fn split(&self, data: &[u8]) -> RaidResult<Vec<Vec<u8>>> {
        let n = self.layout.source_count();
        let mut parts: Vec<Vec<u8>> = (0..n)
            .map(|s| Vec::with_capacity(self.layout.part_size(s) as usize))
            .collect();
        self.encode_into(data, |source, bytes| {
            parts[source].extend_from_slice(bytes);
            Ok(())
        })?;
        Ok(parts)
    }

    /// Streams the parts of `data` into one writer per source.
    pub fn write_parts<W: Write>(&self, data: &[u8], writers: &mut [W]) -> RaidResult<()> {
        if writers.len() != self.layout.source_count() {
            return Err(RaidError::InvalidLayout(format!(
                "expected {} part writers, got {}",
                self.layout.source_count(),
                writers.len()
            )));
        }
        self.encode_into(data, |source, bytes| {
            writers[source].write_all(bytes).map_err(RaidError::from)
        })
    }

    fn encode_into<F>(&self, data: &[u8], mut emit: F) -> RaidResult<()>
    where
        F: FnMut(usize, &[u8]) -> RaidResult<()>,
    {
        let layout = &self.layout;
        if data.len() as u64 != layout.file_size() {
            return Err(RaidError::InvalidLayout(format!(
                "buffer holds {} bytes but the layout describes {}",
                data.len(),
                layout.file_size()
            )));
        }

        let sector = layout.sector_size() as usize;
        let mut parity = vec![0u8; sector];
        for line in 0..layout.line_count() {
            parity.fill(0);
            let line_start = layout.line_start(line) as usize;
            for source in 1..layout.source_count() {
                let len = layout.sector_len(line, source) as usize;
                if len == 0 {
                    break;
                }
                let start = line_start + (source - 1) * sector;
                let bytes = &data[start..start + len];
                xor_into(&mut parity, bytes);
                emit(source, bytes)?;
            }
            let parity_len = layout.sector_len(line, PARITY_SOURCE) as usize;
            emit(PARITY_SOURCE, &parity[..parity_len])?;
        }
        Ok(())
    }
}
