//! What a caller knows about a striped file before transferring it.

use serde::{Deserialize, Serialize};

use crate::error::{RaidError, RaidResult};
use crate::layout::{StripeLayout, DEFAULT_SECTOR_SIZE};

/// Identity, geometry and part URLs of one striped file.
///
/// URLs are opaque and may expire; a resumed transfer can be started from
/// a ticket carrying fresh URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTicket {
    pub file_identity: String,
    pub file_size: u64,
    pub sector_size: u64,
    pub source_count: usize,
    /// One URL per source; index 0 is the parity part.
    pub urls: Vec<String>,
}

impl TransferTicket {
    /// Ticket with the default sector size and one source per URL.
    pub fn new(file_identity: impl Into<String>, file_size: u64, urls: Vec<String>) -> Self {
        Self {
            file_identity: file_identity.into(),
            file_size,
            sector_size: DEFAULT_SECTOR_SIZE,
            source_count: urls.len(),
            urls,
        }
    }

    pub fn with_sector_size(mut self, sector_size: u64) -> Self {
        self.sector_size = sector_size;
        self
    }

    /// Replaces expired URLs.
    pub fn with_urls(mut self, urls: Vec<String>) -> Self {
        self.urls = urls;
        self
    }

    /// Stripe geometry, checked against the URL list.
    pub fn layout(&self) -> RaidResult<StripeLayout> {
        if self.urls.len() != self.source_count {
            return Err(RaidError::InvalidLayout(format!(
                "{} URLs for {} sources",
                self.urls.len(),
                self.source_count
            )));
        }
        StripeLayout::new(self.source_count, self.sector_size, self.file_size)
    }
}
