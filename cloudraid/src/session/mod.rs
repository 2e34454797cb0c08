//! Transfer sessions.
//!
//! A [`TransferSession`] downloads one striped file (or a byte range of it)
//! into an [`OutputSink`]. It owns every piece of per-transfer state and is
//! the single sequencer for it:
//!
//! ```text
//!             ChunkRequest                 fetch_range
//!  scheduler ─────────────> worker[s] ─────────────────> transport
//!      ^                        │
//!      │ health changes         │ SourceEvent (mpsc)
//!      │                        v
//!  health manager <──────── run loop ──> tracker ──> sink
//! ```
//!
//! The run loop reacts to worker events, cancellation and a periodic tick
//! (hang checks, slow-source parking, stall detection, resume saves). A
//! resume token is only ever saved after the sink has been flushed, so it
//! never claims bytes the sink does not hold.

mod report;
mod stall;
mod streaming;
mod ticket;
mod worker;

pub use report::{TransferFailure, TransferReport, TransferState};
pub use streaming::{start_streaming, StreamingDownload};
pub use ticket::TransferTicket;

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TransferConfig;
use crate::error::{RaidError, RaidResult};
use crate::health::{FetchOutcome, HealthAction, HealthDecision, SourceHealthManager};
use crate::layout::StripeLayout;
use crate::limiter::{ConnectionLimiter, RateLimiter};
use crate::progress::{ProgressCallback, ProgressTracker, ResumeStore, ResumeToken};
use crate::scheduler::ChunkScheduler;
use crate::sink::OutputSink;
use crate::source::{Source, SourceHealth};
use crate::transport::{NetworkTransport, TransportError};
use stall::StallDetector;
use worker::{SourceEvent, SourceWorker, WorkerContext};

/// Period of the housekeeping tick.
const TICK_INTERVAL_MS: u64 = 100;

/// One transfer of a striped file.
pub struct TransferSession<T: NetworkTransport> {
    ticket: TransferTicket,
    layout: StripeLayout,
    transport: Arc<T>,
    config: TransferConfig,
    range: Range<u64>,
    resume: Option<ResumeToken>,
    progress: Option<ProgressCallback>,
    store: Option<Arc<dyn ResumeStore>>,
    cancel: CancellationToken,
}

impl<T: NetworkTransport> TransferSession<T> {
    /// Session for the whole file described by `ticket`.
    pub fn new(ticket: TransferTicket, transport: Arc<T>, config: TransferConfig) -> RaidResult<Self> {
        let layout = ticket.layout()?;
        Ok(Self {
            range: 0..layout.file_size(),
            ticket,
            layout,
            transport,
            config,
            resume: None,
            progress: None,
            store: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Session continuing from `token`.
    ///
    /// Output below the token's contiguous offset is assumed to be in the
    /// sink already; nothing below the line containing it is requested.
    pub fn resume(
        ticket: TransferTicket,
        token: ResumeToken,
        transport: Arc<T>,
        config: TransferConfig,
    ) -> RaidResult<Self> {
        let mut session = Self::new(ticket, transport, config)?;
        token.validate(&session.ticket.file_identity, &session.layout)?;
        session.range = token.range();
        session.resume = Some(token);
        Ok(session)
    }

    /// Restricts the session to file bytes `range`.
    pub fn with_range(mut self, range: Range<u64>) -> RaidResult<Self> {
        if range.start > range.end || range.end > self.layout.file_size() {
            return Err(RaidError::OutOfRange {
                offset: range.end.max(range.start),
                limit: self.layout.file_size(),
            });
        }
        if let Some(token) = &self.resume {
            if token.range() != range {
                return Err(RaidError::ResumeMismatch(format!(
                    "token covers {}..{}, session asked for {}..{}",
                    token.range_start, token.range_end, range.start, range.end
                )));
            }
        }
        self.range = range;
        Ok(self)
    }

    /// Calls `callback(completed_bytes, contiguous_bytes)` on every advance.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Persists the resume token periodically and on termination.
    pub fn with_resume_store(mut self, store: Arc<dyn ResumeStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Token that cancels the session when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn layout(&self) -> &StripeLayout {
        &self.layout
    }

    pub fn range(&self) -> Range<u64> {
        self.range.clone()
    }

    /// Runs the transfer to completion, cancellation or failure.
    pub async fn run<S: OutputSink>(self, sink: &mut S) -> Result<TransferReport, TransferFailure> {
        let started = Instant::now();
        let contiguous = self
            .resume
            .as_ref()
            .map(|t| t.contiguous_bytes)
            .unwrap_or(self.range.start);

        let mut runtime = match SessionRuntime::new(self, contiguous, started) {
            Ok(runtime) => runtime,
            Err(error) => {
                return Err(TransferFailure {
                    error,
                    contiguous_bytes: contiguous,
                    resume_token: None,
                    source_errors: Vec::new(),
                })
            }
        };

        let outcome = runtime.drive(sink).await;
        runtime.shutdown();
        runtime.finish(outcome, sink, started).await
    }
}

/// Mutable state of a running session.
struct SessionRuntime<T: NetworkTransport> {
    file_identity: String,
    layout: StripeLayout,
    config: TransferConfig,
    sources: Vec<Source>,
    tracker: ProgressTracker,
    scheduler: ChunkScheduler,
    health: SourceHealthManager,
    workers: Vec<Option<SourceWorker>>,
    /// Latest request error per source, cleared on success.
    last_errors: Vec<Option<TransportError>>,
    /// Why each failed source was excluded.
    exclusions: Vec<Option<RaidError>>,
    /// Kept so the channel stays open while workers come and go.
    _events_tx: mpsc::UnboundedSender<SourceEvent>,
    events: mpsc::UnboundedReceiver<SourceEvent>,
    cancel: CancellationToken,
    store: Option<Arc<dyn ResumeStore>>,
    stall: Option<StallDetector>,
    hang_checks: bool,
    parked: bool,
    last_save: Instant,
    _transport: std::marker::PhantomData<T>,
}

impl<T: NetworkTransport> SessionRuntime<T> {
    fn new(session: TransferSession<T>, contiguous: u64, now: Instant) -> RaidResult<Self> {
        let TransferSession {
            ticket,
            layout,
            transport,
            config,
            range,
            resume: _,
            progress,
            store,
            cancel,
        } = session;

        let mut tracker = ProgressTracker::resume_at(layout, range.clone(), contiguous)?;
        if let Some(callback) = progress {
            tracker.set_callback(callback);
        }
        let mut scheduler = ChunkScheduler::new(layout, &config, range.clone());
        scheduler.advance_floor(contiguous);

        let sources: Vec<Source> = ticket
            .urls
            .iter()
            .enumerate()
            .map(|(index, url)| Source::new(index, url.clone(), now))
            .collect();

        let (events_tx, events) = mpsc::unbounded_channel();
        let context = WorkerContext {
            transport,
            connections: ConnectionLimiter::new(config.max_connections()),
            rate: config.max_speed().map(|rate| Arc::new(RateLimiter::new(rate))),
            request_timeout: config.request_timeout(),
            events: events_tx.clone(),
        };
        let workers = sources
            .iter()
            .map(|source| {
                Some(SourceWorker::spawn(
                    source.index,
                    source.url.clone(),
                    context.clone(),
                    cancel.child_token(),
                ))
            })
            .collect();

        // Queued or throttled requests look like hangs, so only check when
        // every source can have a request on the wire.
        let hang_checks =
            config.max_connections() >= layout.source_count() && config.max_speed().is_none();
        let stall = config
            .stall_window()
            .map(|window| StallDetector::new(window, config.stall_min_rate(), now, contiguous));

        info!(
            file = %ticket.file_identity,
            file_size = layout.file_size(),
            sources = layout.source_count(),
            sector_size = layout.sector_size(),
            range_start = range.start,
            range_end = range.end,
            resume_from = contiguous,
            mode = ?scheduler.mode(),
            "Transfer starting"
        );

        let source_count = layout.source_count();
        Ok(Self {
            file_identity: ticket.file_identity,
            layout,
            health: SourceHealthManager::from_config(&config),
            config,
            sources,
            tracker,
            scheduler,
            workers,
            last_errors: vec![None; source_count],
            exclusions: (0..source_count).map(|_| None).collect(),
            _events_tx: events_tx,
            events,
            cancel,
            store,
            stall,
            hang_checks,
            parked: false,
            last_save: now,
            _transport: std::marker::PhantomData,
        })
    }

    /// Main loop. Returns `Completed` or `Cancelled`; errors are fatal.
    async fn drive<S: OutputSink>(&mut self, sink: &mut S) -> RaidResult<TransferState> {
        let mut tick = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // A full sink must not keep the session from seeing a cancel.
            let advanced = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                advanced = self.tracker.advance_contiguous(sink) => Some(advanced),
            };
            let contiguous = match advanced {
                Some(Ok(contiguous)) => contiguous,
                // A stream consumer that cancels usually drops its receiver too.
                Some(Err(RaidError::LocalIo(_))) | None if self.cancel.is_cancelled() => {
                    return Ok(self.cancelled());
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(self.cancelled()),
            };
            self.scheduler.advance_floor(contiguous);
            if self.tracker.is_complete() {
                sink.flush().await?;
                return Ok(TransferState::Completed);
            }
            self.dispatch(Instant::now());

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    return Ok(self.cancelled());
                }

                Some(event) = self.events.recv() => {
                    self.on_event(event)?;
                }

                _ = tick.tick() => {
                    let now = Instant::now();
                    self.on_tick(now)?;
                    if self.store.is_some()
                        && now.saturating_duration_since(self.last_save)
                            >= self.config.resume_save_interval()
                    {
                        self.checkpoint(sink).await;
                        self.last_save = now;
                    }
                }
            }
        }
    }

    fn cancelled(&self) -> TransferState {
        info!(contiguous = self.tracker.contiguous_bytes(), "Transfer cancelled");
        TransferState::Cancelled
    }

    /// Hands newly scheduled chunks to their workers.
    fn dispatch(&mut self, now: Instant) {
        let chunks = self.scheduler.next_chunks(
            &mut self.sources,
            now,
            self.config.max_outstanding_per_source(),
            self.config.max_request_bytes(),
        );
        for chunk in chunks {
            let source = chunk.source;
            let sent = match &self.workers[source] {
                Some(worker) => worker.send(chunk),
                None => Err(chunk),
            };
            if let Err(chunk) = sent {
                self.sources[source].record_completion();
                self.scheduler.on_chunk_failed(source, chunk.range);
            }
        }
    }

    fn on_event(&mut self, event: SourceEvent) -> RaidResult<()> {
        let SourceEvent {
            source,
            request,
            result,
            elapsed,
        } = event;
        let now = Instant::now();
        self.sources[source].record_completion();

        let outcome = match result {
            Ok(bytes) => {
                let len = bytes.len() as u64;
                let accepted = self
                    .tracker
                    .record_received(source, request.range.clone(), bytes)?;
                self.sources[source].record_received(accepted, now);
                self.scheduler.on_chunk_success(source);
                self.last_errors[source] = None;
                debug!(
                    source,
                    start = request.range.start,
                    end = request.range.end,
                    accepted,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Chunk received"
                );
                FetchOutcome::Success {
                    bytes: len,
                    elapsed,
                }
            }
            Err(err) => {
                debug!(
                    source,
                    start = request.range.start,
                    end = request.range.end,
                    error = %err,
                    "Chunk failed"
                );
                self.scheduler.on_chunk_failed(source, request.range);
                self.last_errors[source] = Some(err.clone());
                err.into_outcome()
            }
        };

        let decision = self
            .health
            .on_outcome(&mut self.sources, source, &outcome, now);
        self.apply(decision)
    }

    fn on_tick(&mut self, now: Instant) -> RaidResult<()> {
        if self.hang_checks {
            if let Some(decision) = self.health.check_hanging(&mut self.sources, now) {
                self.apply(decision)?;
            }
        }

        if !self.parked {
            if let Some(ratio) = self.config.slow_source_ratio() {
                let slowest = self.health.slowest_source(
                    &self.sources,
                    ratio,
                    self.config.slow_source_min_bytes(),
                    now,
                );
                if let Some(slow) = slowest {
                    self.scheduler.park(slow);
                    self.parked = true;
                }
            }
        }

        if let Some(stall) = &mut self.stall {
            stall.observe(now, self.tracker.contiguous_bytes())?;
        }
        Ok(())
    }

    /// Forwards a health decision to the scheduler and workers.
    fn apply(&mut self, decision: HealthDecision) -> RaidResult<()> {
        if let Some(change) = decision.change {
            self.scheduler.on_health_change(&change);
            if change.to == SourceHealth::Failed {
                if let Some(worker) = self.workers[change.index].take() {
                    worker.stop();
                }
                // Hanging sources fail without a request error of their own.
                let cause = match self.last_errors[change.index].take() {
                    Some(err) => err.into_source_error(change.index),
                    None => RaidError::SourceTimeout {
                        index: change.index,
                    },
                };
                info!(source = change.index, cause = %cause, "Source excluded");
                self.exclusions[change.index] = Some(cause);
            }
        }
        match decision.action {
            HealthAction::Fatal => {
                let missing = SourceHealthManager::failed_count(&self.sources);
                error!(
                    line = self.tracker.cursor_line(),
                    missing, "Transfer cannot continue"
                );
                Err(RaidError::ReconstructionImpossible {
                    line: self.tracker.cursor_line(),
                    missing,
                })
            }
            HealthAction::Continue | HealthAction::Retry { .. } | HealthAction::Exclude => Ok(()),
        }
    }

    /// Flushes the sink, then saves a token covering what it now holds.
    ///
    /// Returns the token, or `None` when the flush failed and the delivered
    /// prefix can no longer be vouched for.
    async fn checkpoint<S: OutputSink>(&mut self, sink: &mut S) -> Option<ResumeToken> {
        let token = self.tracker.resume_token(&self.file_identity);
        persist(sink, token, self.store.clone()).await
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        for worker in self.workers.iter_mut().filter_map(Option::take) {
            worker.stop();
        }
    }

    fn failed_sources(&self) -> Vec<usize> {
        self.sources
            .iter()
            .filter(|s| s.health.is_failed())
            .map(|s| s.index)
            .collect()
    }

    async fn finish<S: OutputSink>(
        mut self,
        outcome: RaidResult<TransferState>,
        sink: &mut S,
        started: Instant,
    ) -> Result<TransferReport, TransferFailure> {
        let contiguous = self.tracker.contiguous_bytes();
        match outcome {
            Ok(TransferState::Completed) => {
                if let Some(store) = self.store.clone() {
                    match tokio::task::spawn_blocking(move || store.clear()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(error = %e, "Failed to clear resume token"),
                        Err(e) => warn!(error = %e, "Resume token clear task failed"),
                    }
                }
                let elapsed = started.elapsed();
                info!(
                    file = %self.file_identity,
                    bytes = contiguous - self.tracker.range().start,
                    elapsed_ms = elapsed.as_millis() as u64,
                    failed_sources = ?self.failed_sources(),
                    "Transfer complete"
                );
                Ok(self.report(TransferState::Completed, started, None))
            }
            Ok(state) => {
                let token = self.checkpoint(sink).await;
                Ok(self.report(state, started, token))
            }
            Err(error) => {
                let token = self.checkpoint(sink).await;
                warn!(
                    file = %self.file_identity,
                    contiguous,
                    error = %error,
                    "Transfer failed"
                );
                let source_errors = self
                    .exclusions
                    .iter_mut()
                    .filter_map(Option::take)
                    .collect();
                Err(TransferFailure {
                    error,
                    contiguous_bytes: contiguous,
                    resume_token: token,
                    source_errors,
                })
            }
        }
    }

    fn report(
        &self,
        state: TransferState,
        started: Instant,
        resume_token: Option<ResumeToken>,
    ) -> TransferReport {
        TransferReport {
            state,
            contiguous_bytes: self.tracker.contiguous_bytes(),
            per_source_bytes: self.tracker.per_source_bytes_received(),
            failed_sources: self.failed_sources(),
            elapsed: started.elapsed(),
            resume_token,
        }
    }
}

async fn persist<S: OutputSink>(
    sink: &mut S,
    token: ResumeToken,
    store: Option<Arc<dyn ResumeStore>>,
) -> Option<ResumeToken> {
    if let Err(e) = sink.flush().await {
        warn!(error = %e, "Failed to flush output, not saving resume token");
        return None;
    }
    let Some(store) = store else {
        return Some(token);
    };

    let contiguous = token.contiguous_bytes;
    let saved = token.clone();
    match tokio::task::spawn_blocking(move || store.save(&saved)).await {
        Ok(Ok(())) => debug!(contiguous, "Resume token saved"),
        Ok(Err(e)) => warn!(error = %e, "Failed to save resume token"),
        Err(e) => warn!(error = %e, "Resume token save task failed"),
    }
    Some(token)
}
