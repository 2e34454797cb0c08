//! CloudRAID - RAID-aware striped downloads
//!
//! A file is stored as N parts on N independent hosts: one parity part and
//! N-1 data parts, striped in fixed-size sectors. This library downloads
//! such a file (or any byte range of it) by fetching part ranges
//! concurrently and rebuilding the original bytes in order, tolerating the
//! loss of any single source mid-transfer.
//!
//! # High-Level API
//!
//! ```ignore
//! use cloudraid::{HttpTransport, TransferConfig, TransferSession, TransferTicket, FileSink};
//! use std::sync::Arc;
//!
//! let ticket = TransferTicket::new("file-id", file_size, part_urls);
//! let transport = Arc::new(HttpTransport::new()?);
//! let session = TransferSession::new(ticket, transport, TransferConfig::default())?;
//!
//! let mut sink = FileSink::create("out.bin").await?;
//! let report = session.run(&mut sink).await?;
//! ```
//!
//! For in-order delivery of a byte range, see [`session::start_streaming`].

pub mod buffer;
pub mod config;
pub mod encode;
pub mod error;
pub mod health;
pub mod layout;
pub mod limiter;
pub mod logging;
pub mod progress;
pub mod ranges;
pub mod reconstruct;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod source;
pub mod transport;

pub use config::{ConfigFile, FetchStrategy, TransferConfig};
pub use error::{ErrorKind, RaidError, RaidResult};
pub use layout::StripeLayout;
pub use progress::{FileResumeStore, MemoryResumeStore, ResumeStore, ResumeToken};
pub use session::{
    start_streaming, StreamingDownload, TransferFailure, TransferReport, TransferSession,
    TransferState, TransferTicket,
};
pub use sink::{ChannelSink, FileSink, MemorySink, OutputSink};
pub use transport::{HttpTransport, NetworkTransport, TransportError};

/// Version of the CloudRAID library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
