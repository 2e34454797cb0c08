//! In-memory transport with deterministic fault injection.
//!
//! Serves parts held in memory under `scripted://part/{index}` URLs. Each
//! source has a queue of one-shot faults, consumed one per request, and an
//! optional fault applied to every request once the queue is empty.

use std::collections::VecDeque;
use std::future::Future;
use std::ops::Range;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use super::{NetworkTransport, TransportError};

const URL_PREFIX: &str = "scripted://part/";

/// What a scripted request does instead of (or before) answering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Answer with this HTTP status.
    Status(u16),
    /// Fail as a timed-out request.
    Timeout,
    /// Never answer.
    Hang,
    /// Answer normally after a pause.
    Delay(Duration),
    /// Drop the connection.
    Disconnect,
}

/// One request as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub source: usize,
    pub range: Range<u64>,
}

#[derive(Debug, Default)]
struct Script {
    once: VecDeque<Fault>,
    always: Option<Fault>,
}

/// Transport over in-memory parts.
#[derive(Debug)]
pub struct ScriptedTransport {
    parts: Vec<Bytes>,
    scripts: Mutex<Vec<Script>>,
    requests: Mutex<Vec<RequestRecord>>,
}

impl ScriptedTransport {
    pub fn new(parts: Vec<Bytes>) -> Self {
        let scripts = (0..parts.len()).map(|_| Script::default()).collect();
        Self {
            parts,
            scripts: Mutex::new(scripts),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// URL of every part, in source order.
    pub fn urls(&self) -> Vec<String> {
        (0..self.parts.len())
            .map(|i| format!("{}{}", URL_PREFIX, i))
            .collect()
    }

    /// Applies `fault` to the next request to `source` not yet scripted.
    pub fn push_fault(&self, source: usize, fault: Fault) {
        self.scripts.lock()[source].once.push_back(fault);
    }

    /// Applies `fault` to every request to `source` after the one-shot
    /// queue runs out.
    pub fn fail_always(&self, source: usize, fault: Fault) {
        self.scripts.lock()[source].always = Some(fault);
    }

    /// Removes the standing fault of `source`.
    pub fn heal(&self, source: usize) {
        self.scripts.lock()[source].always = None;
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<RequestRecord> {
        self.requests.lock().clone()
    }

    pub fn requests_for(&self, source: usize) -> Vec<RequestRecord> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.source == source)
            .cloned()
            .collect()
    }

    fn source_of(&self, url: &str) -> Option<usize> {
        let index: usize = url.strip_prefix(URL_PREFIX)?.parse().ok()?;
        (index < self.parts.len()).then_some(index)
    }

    fn next_fault(&self, source: usize) -> Option<Fault> {
        let mut scripts = self.scripts.lock();
        let script = &mut scripts[source];
        script.once.pop_front().or_else(|| script.always.clone())
    }

    fn serve(&self, source: usize, range: &Range<u64>) -> Result<Bytes, TransportError> {
        let part = &self.parts[source];
        if range.start > range.end || range.end > part.len() as u64 {
            return Err(TransportError::Status(416));
        }
        Ok(part.slice(range.start as usize..range.end as usize))
    }
}

#[allow(clippy::manual_async_fn)]
impl NetworkTransport for ScriptedTransport {
    fn fetch_range(
        &self,
        url: &str,
        range: Range<u64>,
    ) -> impl Future<Output = Result<Bytes, TransportError>> + Send {
        let source = self.source_of(url);
        async move {
            let source = source
                .ok_or_else(|| TransportError::Connection("unknown part URL".to_string()))?;
            self.requests.lock().push(RequestRecord {
                source,
                range: range.clone(),
            });

            match self.next_fault(source) {
                None => self.serve(source, &range),
                Some(Fault::Status(status)) => Err(TransportError::Status(status)),
                Some(Fault::Timeout) => Err(TransportError::Timeout),
                Some(Fault::Disconnect) => {
                    Err(TransportError::Connection("connection reset".to_string()))
                }
                Some(Fault::Hang) => futures::future::pending().await,
                Some(Fault::Delay(pause)) => {
                    tokio::time::sleep(pause).await;
                    self.serve(source, &range)
                }
            }
        }
    }
}
