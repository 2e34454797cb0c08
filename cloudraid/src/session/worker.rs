//! Per-source fetch tasks.
//!
//! Each active source gets one task that receives [`ChunkRequest`]s from the
//! session, runs up to the scheduled number of them concurrently, and sends
//! every result back as a [`SourceEvent`]. Workers never touch the output;
//! the session loop is the only place where state changes.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::limiter::{ConnectionLimiter, RateLimiter};
use crate::scheduler::ChunkRequest;
use crate::transport::{NetworkTransport, TransportError};

/// Result of one chunk request.
#[derive(Debug)]
pub(crate) struct SourceEvent {
    pub source: usize,
    pub request: ChunkRequest,
    pub result: Result<Bytes, TransportError>,
    /// Time spent on the wire, excluding limiter waits.
    pub elapsed: Duration,
}

/// Shared by all workers of a session.
pub(crate) struct WorkerContext<T> {
    pub transport: Arc<T>,
    pub connections: ConnectionLimiter,
    pub rate: Option<Arc<RateLimiter>>,
    pub request_timeout: Duration,
    pub events: mpsc::UnboundedSender<SourceEvent>,
}

impl<T> Clone for WorkerContext<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            connections: self.connections.clone(),
            rate: self.rate.clone(),
            request_timeout: self.request_timeout,
            events: self.events.clone(),
        }
    }
}

/// Handle to a running source task.
pub(crate) struct SourceWorker {
    requests: mpsc::UnboundedSender<ChunkRequest>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SourceWorker {
    /// Spawns the task for `source`. It stops when `cancel` fires.
    pub(crate) fn spawn<T: NetworkTransport>(
        source: usize,
        url: String,
        context: WorkerContext<T>,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(source, url, context, rx, cancel.clone()));
        Self {
            requests: tx,
            cancel,
            handle,
        }
    }

    /// Queues a request. Returns it back if the worker is gone.
    pub(crate) fn send(&self, request: ChunkRequest) -> Result<(), ChunkRequest> {
        self.requests.send(request).map_err(|e| e.0)
    }

    /// Stops the task, dropping its outstanding requests.
    pub(crate) fn stop(self) {
        self.cancel.cancel();
        drop(self.handle);
    }
}

async fn run_worker<T: NetworkTransport>(
    source: usize,
    url: String,
    context: WorkerContext<T>,
    mut requests: mpsc::UnboundedReceiver<ChunkRequest>,
    cancel: CancellationToken,
) {
    let transport = Arc::clone(&context.transport);
    let mut in_flight = FuturesUnordered::new();
    let mut requests_open = true;

    loop {
        if !requests_open && in_flight.is_empty() {
            break;
        }
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                trace!(source, outstanding = in_flight.len(), "Worker cancelled");
                break;
            }

            Some(event) = in_flight.next(), if !in_flight.is_empty() => {
                if context.events.send(event).is_err() {
                    break;
                }
            }

            request = requests.recv(), if requests_open => match request {
                Some(request) => in_flight.push(fetch(&*transport, &url, &context, source, request)),
                None => requests_open = false,
            },
        }
    }
    debug!(source, "Worker stopped");
}

async fn fetch<T: NetworkTransport>(
    transport: &T,
    url: &str,
    context: &WorkerContext<T>,
    source: usize,
    request: ChunkRequest,
) -> SourceEvent {
    let permit = match context.connections.acquire().await {
        Ok(permit) => permit,
        Err(_) => {
            return SourceEvent {
                source,
                request,
                result: Err(TransportError::Connection("connection limiter closed".to_string())),
                elapsed: Duration::ZERO,
            }
        }
    };
    if let Some(rate) = &context.rate {
        rate.consume(request.len()).await;
    }

    let started = Instant::now();
    let result = match tokio::time::timeout(
        context.request_timeout,
        transport.fetch_range(url, request.range.clone()),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout),
    };
    drop(permit);

    SourceEvent {
        source,
        request,
        result,
        elapsed: started.elapsed(),
    }
}
