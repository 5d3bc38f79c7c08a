//! Polling synchronizer: periodic full-snapshot fallback
//!
//! Fetches the whole collection once on `start`, then on every tick until
//! `stop`. Each fetch is diffed against the previous *fetch* (not against the
//! reconciled collection) and handed downstream together with the snapshot.
//!
//! - Ticks never overlap: the loop awaits each fetch and skips missed ticks.
//! - A failed fetch is logged and skipped; the next tick runs as usual.
//! - An authentication rejection ends the loop (`PollingState::AuthRejected`).
//! - The previous snapshot only advances once its outcome is queued for the
//!   consumer, which must drain the queue before it stops.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use types::entity::StreamEntity;

use crate::detector::{ChangeSet, SnapshotDiffer};
use crate::error::SyncError;

/// Full-collection fetch for one stream.
#[async_trait]
pub trait SnapshotFetcher<E: StreamEntity>: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<Vec<E>, SyncError>;
}

/// Lifecycle of the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollingState {
    /// Never started.
    Idle,
    Running,
    Stopped,
    /// Credentials were rejected; the loop ended and will not retry.
    AuthRejected,
}

impl fmt::Display for PollingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PollingState::Idle => "idle",
            PollingState::Running => "running",
            PollingState::Stopped => "stopped",
            PollingState::AuthRejected => "auth_rejected",
        };
        f.write_str(label)
    }
}

/// One successful poll: the fetched snapshot and its diff to the previous one.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome<E: StreamEntity> {
    pub snapshot: Vec<E>,
    pub changes: ChangeSet<E>,
}

pub struct PollingSynchronizer<E: StreamEntity> {
    state: Arc<watch::Sender<PollingState>>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<SnapshotDiffer<E>>>,
    /// Diff baseline while the loop is not running.
    differ: Option<SnapshotDiffer<E>>,
}

impl<E: StreamEntity> PollingSynchronizer<E> {
    pub fn new() -> Self {
        Self::with_previous(Vec::new())
    }

    /// Start diffing from a known collection instead of from empty.
    pub fn with_previous(previous: Vec<E>) -> Self {
        Self {
            state: Arc::new(watch::channel(PollingState::Idle).0),
            cancel: None,
            task: None,
            differ: Some(SnapshotDiffer::seeded(previous)),
        }
    }

    pub fn state(&self) -> PollingState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<PollingState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state() == PollingState::Running
    }

    /// Fetch now, then every `period`, sending each outcome to `sink`.
    ///
    /// Starting a running synchronizer is a no-op. Must be called from within
    /// a Tokio runtime.
    pub fn start(
        &mut self,
        fetcher: Arc<dyn SnapshotFetcher<E>>,
        period: Duration,
        sink: mpsc::Sender<PollOutcome<E>>,
    ) {
        if self.task.is_some() {
            debug!(stream = %E::KIND, "Polling already started");
            return;
        }
        let Some(differ) = self.differ.take() else {
            return;
        };

        let cancel = CancellationToken::new();
        let worker = PollWorker {
            fetcher,
            period,
            sink,
            state: Arc::clone(&self.state),
            cancel: cancel.clone(),
            differ,
        };
        self.state.send_replace(PollingState::Running);
        info!(stream = %E::KIND, interval_ms = period.as_millis() as u64, "Polling started");

        self.task = Some(tokio::spawn(worker.run()));
        self.cancel = Some(cancel);
    }

    /// Stop the loop and wait for it. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        let Some(task) = self.task.take() else {
            return;
        };
        match task.await {
            Ok(differ) => self.differ = Some(differ),
            Err(err) => {
                warn!(stream = %E::KIND, error = %err, "Polling task ended abnormally");
                self.differ = Some(SnapshotDiffer::new());
            }
        }
        self.state.send_if_modified(|state| {
            if *state == PollingState::Running {
                *state = PollingState::Stopped;
                true
            } else {
                false
            }
        });
        info!(stream = %E::KIND, "Polling stopped");
    }
}

impl<E: StreamEntity> Default for PollingSynchronizer<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: StreamEntity> Drop for PollingSynchronizer<E> {
    fn drop(&mut self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }
}

struct PollWorker<E: StreamEntity> {
    fetcher: Arc<dyn SnapshotFetcher<E>>,
    period: Duration,
    sink: mpsc::Sender<PollOutcome<E>>,
    state: Arc<watch::Sender<PollingState>>,
    cancel: CancellationToken,
    differ: SnapshotDiffer<E>,
}

impl<E: StreamEntity> PollWorker<E> {
    async fn run(mut self) -> SnapshotDiffer<E> {
        let stream = E::KIND;
        let mut ticker = interval(self.period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                fetched = self.fetcher.fetch_snapshot() => fetched,
            };

            let snapshot = match fetched {
                Ok(snapshot) => snapshot,
                Err(err) if err.is_terminal() => {
                    error!(stream = %stream, error = %err, "Poll rejected, stopping poller");
                    self.state.send_replace(PollingState::AuthRejected);
                    return self.differ;
                }
                Err(err) => {
                    warn!(stream = %stream, error = %err, class = err.class(), "Poll failed, skipping tick");
                    continue;
                }
            };

            let changes = self.differ.peek(&snapshot);
            debug!(
                stream = %stream,
                entities = snapshot.len(),
                added = changes.added.len(),
                changed = changes.changed.len(),
                "Poll fetched"
            );

            let outcome = PollOutcome {
                snapshot: snapshot.clone(),
                changes,
            };
            let delivered = tokio::select! {
                _ = self.cancel.cancelled() => false,
                sent = self.sink.send(outcome) => sent.is_ok(),
            };
            if !delivered {
                break;
            }
            self.differ.commit(snapshot);
        }

        self.differ
    }
}
