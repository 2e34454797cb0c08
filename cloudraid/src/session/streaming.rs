//! Range streaming on top of a transfer session.

use std::io;
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{TransferFailure, TransferReport, TransferSession, TransferTicket};
use crate::config::TransferConfig;
use crate::error::{RaidError, RaidResult};
use crate::sink::ChannelSink;
use crate::transport::NetworkTransport;

/// Chunks buffered between the session and the consumer.
const STREAM_CHANNEL_CAPACITY: usize = 16;

/// A byte range being delivered in order as a stream of chunks.
pub struct StreamingDownload {
    chunks: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
    handle: JoinHandle<Result<TransferReport, TransferFailure>>,
    range: Range<u64>,
}

/// Starts streaming `length` bytes of the file from `offset`.
///
/// Uses the streaming overrides of `config` (small opening requests, short
/// read-ahead, stall detection). The consumer applies backpressure: the
/// session stops fetching ahead once the channel and read-ahead are full.
pub fn start_streaming<T: NetworkTransport>(
    ticket: TransferTicket,
    transport: Arc<T>,
    offset: u64,
    length: u64,
    config: TransferConfig,
) -> RaidResult<StreamingDownload> {
    let end = offset.checked_add(length).ok_or(RaidError::OutOfRange {
        offset,
        limit: ticket.file_size,
    })?;
    let session =
        TransferSession::new(ticket, transport, config.into_streaming())?.with_range(offset..end)?;
    let cancel = session.cancellation_token();

    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    let handle = tokio::spawn(async move {
        let mut sink = ChannelSink::new(tx);
        session.run(&mut sink).await
    });
    debug!(offset, length, "Streaming started");

    Ok(StreamingDownload {
        chunks: rx,
        cancel,
        handle,
        range: offset..end,
    })
}

impl StreamingDownload {
    /// File range being streamed.
    pub fn range(&self) -> Range<u64> {
        self.range.clone()
    }

    /// Next chunk in file order, or `None` once the session has ended.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.chunks.recv().await
    }

    /// Stops the session. Chunks already buffered can still be read.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Collects the remaining chunks and waits for the session.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>, TransferFailure> {
        let mut out = Vec::new();
        while let Some(chunk) = self.chunks.recv().await {
            out.extend_from_slice(&chunk);
        }
        self.finish().await?;
        Ok(out)
    }

    /// Waits for the session to end, cancelling it if it is still running.
    ///
    /// Unread chunks are discarded. A session stopped here reports
    /// [`TransferState::Cancelled`](super::TransferState::Cancelled).
    pub async fn finish(self) -> Result<TransferReport, TransferFailure> {
        let Self {
            chunks,
            cancel,
            handle,
            range,
        } = self;
        cancel.cancel();
        drop(chunks);
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                let error = if e.is_cancelled() || cancel.is_cancelled() {
                    RaidError::Cancelled
                } else {
                    RaidError::LocalIo(io::Error::other(e.to_string()))
                };
                Err(TransferFailure {
                    error,
                    contiguous_bytes: range.start,
                    resume_token: None,
                    source_errors: Vec::new(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::StripeEncoder;
    use crate::error::ErrorKind;
    use crate::layout::StripeLayout;
    use crate::session::TransferState;
    use crate::transport::{Fault, ScriptedTransport};
    use std::time::Duration;

    fn setup(size: usize, sector: u64) -> (Vec<u8>, TransferTicket, Arc<ScriptedTransport>) {
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let layout = StripeLayout::new(6, sector, size as u64).unwrap();
        let parts = StripeEncoder::new(layout)
            .split(&data)
            .unwrap()
            .into_iter()
            .map(Bytes::from)
            .collect();
        let transport = Arc::new(ScriptedTransport::new(parts));
        let ticket = TransferTicket::new("stream", size as u64, transport.urls()).with_sector_size(sector);
        (data, ticket, transport)
    }

    /// Keeps the session from racing far ahead of a slow reader.
    fn short_window() -> TransferConfig {
        TransferConfig::new()
            .with_read_ahead_bytes(64 * 1024)
            .with_max_request_bytes(16 * 1024)
    }

    #[tokio::test]
    async fn test_streams_unaligned_range() {
        let (data, ticket, transport) = setup(10_000, 64);
        let stream = start_streaming(ticket, transport, 17, 100, TransferConfig::new()).unwrap();
        assert_eq!(stream.range(), 17..117);
        let bytes = stream.read_to_end().await.unwrap();
        assert_eq!(bytes, &data[17..117]);
    }

    #[tokio::test]
    async fn test_range_past_end_rejected() {
        let (_, ticket, transport) = setup(1_000, 16);
        assert!(start_streaming(ticket, transport, 900, 200, TransferConfig::new()).is_err());
    }

    #[tokio::test]
    async fn test_next_chunk_delivers_in_order() {
        let (data, ticket, transport) = setup(40_000, 16);
        let mut stream =
            start_streaming(ticket, transport, 1_000, 30_000, TransferConfig::new()).unwrap();
        let mut got = Vec::new();
        while let Some(chunk) = stream.next_chunk().await {
            got.extend_from_slice(&chunk);
        }
        assert_eq!(got, &data[1_000..31_000]);
        let report = stream.finish().await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.contiguous_bytes, 31_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_with_full_channel_is_clean() {
        let (data, ticket, transport) = setup(4_000_000, 16);
        let mut stream = start_streaming(ticket, transport, 0, 4_000_000, short_window()).unwrap();
        let first = stream.next_chunk().await.unwrap();
        assert_eq!(&first[..], &data[..first.len()]);

        // Stop reading until the session is blocked on a full channel.
        tokio::time::sleep(Duration::from_millis(500)).await;
        stream.cancel();
        let report = stream.finish().await.unwrap();
        assert_eq!(report.state, TransferState::Cancelled);
        assert!(report.contiguous_bytes < 4_000_000);
        let token = report.resume_token.unwrap();
        assert_eq!(token.contiguous_bytes, report.contiguous_bytes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_without_reading_cancels() {
        let (_, ticket, transport) = setup(4_000_000, 16);
        let stream = start_streaming(ticket, transport, 1_000, 3_500_000, short_window()).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let report = stream.finish().await.unwrap();
        assert_eq!(report.state, TransferState::Cancelled);
        assert!(report.contiguous_bytes >= 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_fails() {
        let (_, ticket, transport) = setup(10_000, 16);
        for source in 0..6 {
            transport.fail_always(source, Fault::Hang);
        }
        let config = TransferConfig::new()
            .with_request_timeout(Duration::from_secs(600))
            .with_hang_timeout(Duration::from_secs(600))
            .with_stall_window(Some(Duration::from_secs(5)));
        let stream = start_streaming(ticket, transport, 0, 10_000, config).unwrap();
        let failure = stream.read_to_end().await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::StreamStalled);
        assert_eq!(failure.contiguous_bytes, 0);
    }
}
