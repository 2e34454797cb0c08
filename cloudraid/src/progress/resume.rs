//! Resume tokens and where they are kept.
//!
//! A token records how far a transfer's output is known to be complete, so
//! a later session over the same file can start from that line instead of
//! from the beginning.

use std::io::{BufReader, BufWriter};
use std::ops::Range;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{RaidError, RaidResult};
use crate::layout::StripeLayout;

/// Persistable transfer progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeToken {
    pub file_identity: String,
    pub file_size: u64,
    pub source_count: usize,
    pub sector_size: u64,
    pub range_start: u64,
    pub range_end: u64,
    /// Absolute file offset below which output has been delivered.
    pub contiguous_bytes: u64,
    /// Part offset below which each source is settled.
    pub per_source_bytes_received: Vec<u64>,
}

impl ResumeToken {
    /// Delivery window of the transfer that produced the token.
    pub fn range(&self) -> Range<u64> {
        self.range_start..self.range_end
    }

    pub fn to_bytes(&self) -> RaidResult<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| RaidError::ResumeStore(format!("Failed to serialize resume token: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> RaidResult<Self> {
        bincode::deserialize(bytes).map_err(|e| {
            RaidError::ResumeStore(format!("Failed to deserialize resume token: {}", e))
        })
    }

    /// Checks that the token belongs to `file_identity` striped as `layout`
    /// and is internally consistent.
    pub fn validate(&self, file_identity: &str, layout: &StripeLayout) -> RaidResult<()> {
        if self.file_identity != file_identity {
            return Err(RaidError::ResumeMismatch(format!(
                "token is for '{}', not '{}'",
                self.file_identity, file_identity
            )));
        }
        if self.file_size != layout.file_size()
            || self.source_count != layout.source_count()
            || self.sector_size != layout.sector_size()
        {
            return Err(RaidError::ResumeMismatch(format!(
                "token layout {}x{} over {} bytes does not match {}x{} over {} bytes",
                self.source_count,
                self.sector_size,
                self.file_size,
                layout.source_count(),
                layout.sector_size(),
                layout.file_size()
            )));
        }
        if self.range_start > self.range_end
            || self.range_end > self.file_size
            || self.contiguous_bytes < self.range_start
            || self.contiguous_bytes > self.range_end
        {
            return Err(RaidError::ResumeMismatch(format!(
                "contiguous offset {} outside range {}..{}",
                self.contiguous_bytes, self.range_start, self.range_end
            )));
        }
        if self.per_source_bytes_received.len() != layout.source_count() {
            return Err(RaidError::ResumeMismatch(format!(
                "token has {} source offsets, expected {}",
                self.per_source_bytes_received.len(),
                layout.source_count()
            )));
        }
        let settled_line = self.contiguous_bytes / layout.line_len();
        for (source, &offset) in self.per_source_bytes_received.iter().enumerate() {
            let settled = (settled_line * layout.sector_size()).min(layout.part_size(source));
            if offset > settled {
                return Err(RaidError::ResumeMismatch(format!(
                    "source {} offset {} is past the settled offset {}",
                    source, offset, settled
                )));
            }
        }
        Ok(())
    }
}

/// Somewhere a session can persist its resume token.
pub trait ResumeStore: Send + Sync {
    fn load(&self) -> RaidResult<Option<ResumeToken>>;
    fn save(&self, token: &ResumeToken) -> RaidResult<()>;
    fn clear(&self) -> RaidResult<()>;
}

/// Token kept in a single file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FileResumeStore {
    path: PathBuf,
}

impl FileResumeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResumeStore for FileResumeStore {
    fn load(&self) -> RaidResult<Option<ResumeToken>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RaidError::LocalIo(e)),
        };
        let reader = BufReader::new(file);
        bincode::deserialize_from(reader).map(Some).map_err(|e| {
            RaidError::ResumeStore(format!(
                "Failed to read resume token {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn save(&self, token: &ResumeToken) -> RaidResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("tmp");
        let file = std::fs::File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, token).map_err(|e| {
            RaidError::ResumeStore(format!("Failed to write resume token: {}", e))
        })?;
        // The old token is only replaced once the new one is on disk.
        let file = writer.into_inner().map_err(|e| RaidError::LocalIo(e.into_error()))?;
        file.sync_all()?;

        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> RaidResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RaidError::LocalIo(e)),
        }
    }
}

/// In-process store, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryResumeStore {
    token: Mutex<Option<ResumeToken>>,
    saves: Mutex<usize>,
}

impl MemoryResumeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest saved token.
    pub fn token(&self) -> Option<ResumeToken> {
        self.token.lock().clone()
    }

    /// Number of saves so far.
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl ResumeStore for MemoryResumeStore {
    fn load(&self) -> RaidResult<Option<ResumeToken>> {
        Ok(self.token())
    }

    fn save(&self, token: &ResumeToken) -> RaidResult<()> {
        *self.token.lock() = Some(token.clone());
        *self.saves.lock() += 1;
        Ok(())
    }

    fn clear(&self) -> RaidResult<()> {
        *self.token.lock() = None;
        Ok(())
    }
}
