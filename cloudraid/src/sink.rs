//! Destinations for ordered output bytes.
//!
//! The progress tracker writes each delivered run exactly once, in
//! increasing offset order. Offsets are absolute file offsets.

use std::future::Future;
use std::io;
use std::path::Path;

use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;

/// Receives reconstructed file bytes.
pub trait OutputSink: Send {
    /// Writes `data` at file `offset`.
    fn write(&mut self, offset: u64, data: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Makes everything written so far durable.
    fn flush(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Collects output in memory.
///
/// Writes must be contiguous starting at `origin`.
#[derive(Debug, Default)]
pub struct MemorySink {
    data: Vec<u8>,
    origin: u64,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose first byte is file offset `origin`.
    pub fn with_origin(origin: u64) -> Self {
        Self {
            data: Vec::new(),
            origin,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl OutputSink for MemorySink {
    async fn write(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let expected = self.origin + self.data.len() as u64;
        if offset != expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("out-of-order write at {}, expected {}", offset, expected),
            ));
        }
        self.data.extend_from_slice(data);
        Ok(())
    }
}

/// Writes output into a local file at `offset - origin`.
#[derive(Debug)]
pub struct FileSink {
    file: File,
    origin: u64,
}

impl FileSink {
    /// Creates (or truncates) `path`.
    pub async fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path).await?;
        Ok(Self { file, origin: 0 })
    }

    /// Opens `path` for writing without truncating, so a resumed transfer
    /// can keep the bytes already there.
    pub async fn open_existing(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await?;
        Ok(Self { file, origin: 0 })
    }

    /// Treats file offset `origin` as the first byte of the local file.
    pub fn with_origin(mut self, origin: u64) -> Self {
        self.origin = origin;
        self
    }
}

impl OutputSink for FileSink {
    async fn write(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let position = offset.checked_sub(self.origin).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("write at {} before origin {}", offset, self.origin),
            )
        })?;
        self.file.seek(io::SeekFrom::Start(position)).await?;
        self.file.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }
}

/// Forwards output as `Bytes` over a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

impl OutputSink for ChannelSink {
    async fn write(&mut self, _offset: u64, data: &[u8]) -> io::Result<()> {
        self.tx
            .send(Bytes::copy_from_slice(data))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "output receiver dropped"))
    }
}
