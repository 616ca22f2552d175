//! Long-poll session state machine.
//!
//! The cursor is the only owner of the stream position (`ts`) and the history
//! checkpoint (`pts`). A run looks like:
//!
//! 1. acquire a server key (retried until it succeeds);
//! 2. replay missed history from the stored checkpoint into the history sink;
//! 3. poll, hand decoded events to the event sink, advance `ts`, feed `pts`
//!    through the [`CheckpointThrottle`];
//! 4. on a failure code, recover as the code demands and loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use beet_events::{decode_long_poll_batch, EventSink, HistoryMessage, HistorySink};
use tokio::sync::watch;

use crate::checkpoint::CheckpointThrottle;
use crate::envelope::{
    parse_poll_envelope, PollOutcome, FAILURE_KEY_EXPIRED, FAILURE_SESSION_LOST,
    FAILURE_TS_OUTDATED,
};
use crate::transport::{CheckpointStore, LongPollServer, LongPollTransport};


pub const DEFAULT_LONG_POLL_WAIT_SECS: u64 = 25;
pub const DEFAULT_CHECKPOINT_EVERY: u64 = 50;

#[derive(Debug, Clone)]
pub struct SessionCursorConfig {
    pub long_poll_wait_secs: u64,
    /// Pause between failed attempts to acquire a server key.
    pub reconnect_delay: Duration,
    /// Pause before re-sending a poll that failed at the transport level.
    pub poll_retry_delay: Duration,
    pub checkpoint_every: u64,
}

impl Default for SessionCursorConfig {
    fn default() -> Self {
        Self {
            long_poll_wait_secs: DEFAULT_LONG_POLL_WAIT_SECS,
            reconnect_delay: Duration::from_secs(1),
            poll_retry_delay: Duration::from_secs(1),
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorReport {
    pub polls: u64,
    pub delivered_events: u64,
    pub transport_errors: u64,
    pub ts_resets: u64,
    pub key_renewals: u64,
    pub history_replays: u64,
    pub history_messages: u64,
    pub checkpoint_writes: u64,
    pub checkpoint_write_failures: u64,
}

pub struct SessionCursor {
    transport: Arc<dyn LongPollTransport>,
    checkpoints: Arc<dyn CheckpointStore>,
    history: Arc<dyn HistorySink>,
    config: SessionCursorConfig,
    server: Option<LongPollServer>,
    resume_ts: Option<u64>,
    pts: u64,
    throttle: CheckpointThrottle,
    report: CursorReport,
}

impl SessionCursor {
    /// Builds a cursor positioned at the stored checkpoint.
    pub async fn new(
        transport: Arc<dyn LongPollTransport>,
        checkpoints: Arc<dyn CheckpointStore>,
        history: Arc<dyn HistorySink>,
        config: SessionCursorConfig,
    ) -> Result<Self> {
        let pts = checkpoints
            .load()
            .await
            .context("failed to load long-poll checkpoint")?;
        tracing::info!(pts, "long-poll cursor loaded checkpoint");
        let throttle = CheckpointThrottle::new(config.checkpoint_every);
        Ok(Self {
            transport,
            checkpoints,
            history,
            config,
            server: None,
            resume_ts: None,
            pts,
            throttle,
            report: CursorReport::default(),
        })
    }

    /// Last acknowledged history checkpoint (not necessarily persisted yet).
    pub fn checkpoint(&self) -> u64 {
        self.pts
    }

    pub fn stream_position(&self) -> Option<u64> {
        self.server.as_ref().map(|server| server.ts)
    }

    pub fn report(&self) -> &CursorReport {
        &self.report
    }

    /// Polls until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// Only a failing event sink ends the run with an error; every transport
    /// and feed fault is recovered internally.
    pub async fn run(
        &mut self,
        sink: &dyn EventSink,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut replay_history = true;
        loop {
            if *shutdown.borrow() {
                break;
            }

            let server = match self.server.clone() {
                Some(server) => server,
                None => {
                    let stored_pts = self.pts;
                    let Some(server) = self.acquire_server(&mut shutdown).await else {
                        break;
                    };
                    if replay_history && stored_pts != 0 {
                        self.replay_history(server.ts).await;
                    }
                    replay_history = false;
                    server
                }
            };

            let polled = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                polled = self.transport.poll(&server, self.config.long_poll_wait_secs) => polled,
            };
            self.report.polls = self.report.polls.saturating_add(1);

            let raw = match polled {
                Ok(raw) => raw,
                Err(error) => {
                    self.record_transport_error(&server, &error);
                    if !pause(&mut shutdown, self.config.poll_retry_delay).await {
                        break;
                    }
                    continue;
                }
            };

            let outcome = match parse_poll_envelope(&raw) {
                Ok(outcome) => outcome,
                Err(error) => {
                    self.record_transport_error(&server, &error);
                    if !pause(&mut shutdown, self.config.poll_retry_delay).await {
                        break;
                    }
                    continue;
                }
            };

            match outcome {
                PollOutcome::Batch { ts, pts } => {
                    let events = decode_long_poll_batch(&raw);
                    if !events.is_empty() {
                        let count = events.len() as u64;
                        sink.deliver(events)
                            .await
                            .context("event sink rejected long-poll batch")?;
                        self.report.delivered_events =
                            self.report.delivered_events.saturating_add(count);
                    }
                    if let Some(current) = self.server.as_mut() {
                        current.ts = ts;
                    }
                    if let Some(pts) = pts {
                        self.advance_checkpoint(pts).await;
                    }
                }
                PollOutcome::Failed {
                    code: FAILURE_TS_OUTDATED,
                    ts: Some(ts),
                } => {
                    tracing::info!(old_ts = server.ts, ts, "long-poll stream position reset");
                    self.report.ts_resets = self.report.ts_resets.saturating_add(1);
                    if let Some(current) = self.server.as_mut() {
                        current.ts = ts;
                    }
                }
                PollOutcome::Failed {
                    code: FAILURE_SESSION_LOST,
                    ..
                } => {
                    tracing::info!(
                        code = FAILURE_SESSION_LOST,
                        pts = self.pts,
                        "long-poll session lost, re-acquiring and replaying history"
                    );
                    self.server = None;
                    self.resume_ts = None;
                    replay_history = true;
                }
                PollOutcome::Failed { code, .. } => {
                    if code == FAILURE_KEY_EXPIRED {
                        tracing::info!(code, "long-poll key expired, re-acquiring");
                    } else if code == FAILURE_TS_OUTDATED {
                        tracing::warn!(code, "long-poll position reset without ts, re-acquiring key");
                    } else {
                        tracing::warn!(code, "unknown long-poll failure code, re-acquiring key");
                    }
                    self.server = None;
                    self.resume_ts = Some(server.ts);
                }
            }
        }
        tracing::info!(pts = self.pts, "long-poll cursor stopped");
        Ok(())
    }

    async fn acquire_server(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<LongPollServer> {
        loop {
            match self.transport.acquire_server().await {
                Ok(mut server) => {
                    self.report.key_renewals = self.report.key_renewals.saturating_add(1);
                    if let Some(ts) = self.resume_ts.take() {
                        server.ts = ts;
                    }
                    tracing::info!(ts = server.ts, pts = server.pts, "long-poll server acquired");
                    if self.pts == 0 && server.pts != 0 {
                        self.seed_checkpoint(server.pts).await;
                    }
                    self.server = Some(server.clone());
                    return Some(server);
                }
                Err(error) => {
                    tracing::warn!(error = %format!("{error:#}"), "failed to acquire long-poll server");
                    if !pause(shutdown, self.config.reconnect_delay).await {
                        return None;
                    }
                }
            }
        }
    }

    /// First start without a stored checkpoint: adopt the server's position.
    async fn seed_checkpoint(&mut self, pts: u64) {
        self.pts = pts;
        match self.checkpoints.save(pts).await {
            Ok(()) => {
                self.throttle.mark_persisted();
                self.report.checkpoint_writes = self.report.checkpoint_writes.saturating_add(1);
                tracing::info!(pts, "seeded long-poll checkpoint from server");
            }
            Err(error) => {
                self.report.checkpoint_write_failures =
                    self.report.checkpoint_write_failures.saturating_add(1);
                tracing::warn!(pts, error = %format!("{error:#}"), "failed to seed long-poll checkpoint");
            }
        }
    }

    async fn replay_history(&mut self, ts: u64) {
        self.report.history_replays = self.report.history_replays.saturating_add(1);
        loop {
            let page = match self.transport.fetch_history(ts, self.pts).await {
                Ok(page) => page,
                Err(error) => {
                    tracing::warn!(
                        ts,
                        pts = self.pts,
                        error = %format!("{error:#}"),
                        "history replay aborted"
                    );
                    return;
                }
            };
            if matches!(page.new_pts, Some(new_pts) if new_pts == self.pts || new_pts == 0) {
                return;
            }

            let replayed = page
                .messages
                .into_iter()
                .filter(|message| !message.is_outbox() && !message.is_service_action())
                .collect::<Vec<HistoryMessage>>();
            if !replayed.is_empty() {
                match self.history.append_history(&replayed).await {
                    Ok(()) => {
                        self.report.history_messages = self
                            .report
                            .history_messages
                            .saturating_add(replayed.len() as u64);
                    }
                    Err(error) => {
                        tracing::warn!(
                            pts = self.pts,
                            messages = replayed.len(),
                            error = %format!("{error:#}"),
                            "history sink rejected replayed page, keeping checkpoint"
                        );
                        return;
                    }
                }
            }
            tracing::debug!(pts = self.pts, new_pts = ?page.new_pts, replayed = replayed.len(), "replayed history page");

            match page.new_pts {
                Some(new_pts) => self.advance_checkpoint(new_pts).await,
                None => return,
            }
        }
    }

    async fn advance_checkpoint(&mut self, pts: u64) {
        if pts == 0 || pts == self.pts {
            return;
        }
        self.pts = pts;
        if !self.throttle.record_update() {
            return;
        }
        match self.checkpoints.save(pts).await {
            Ok(()) => {
                self.throttle.mark_persisted();
                self.report.checkpoint_writes = self.report.checkpoint_writes.saturating_add(1);
                tracing::debug!(pts, "persisted long-poll checkpoint");
            }
            Err(error) => {
                self.report.checkpoint_write_failures =
                    self.report.checkpoint_write_failures.saturating_add(1);
                tracing::warn!(pts, error = %format!("{error:#}"), "failed to persist long-poll checkpoint");
            }
        }
    }

    fn record_transport_error(&mut self, server: &LongPollServer, error: &anyhow::Error) {
        self.report.transport_errors = self.report.transport_errors.saturating_add(1);
        tracing::warn!(ts = server.ts, error = %format!("{error:#}"), "long-poll request failed, retrying");
    }
}

/// Resolves once shutdown is requested or the signal sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Sleeps for `delay`; returns `false` when shutdown won the race.
async fn pause(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown_requested(shutdown) => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
