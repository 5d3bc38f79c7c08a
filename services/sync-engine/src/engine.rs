//! Per-stream engine: producers, one serialized processing loop, lifecycle
//!
//! ```text
//!  ConnectionManager ──Inbound──┐
//!                               ├──► StreamProcessor ──► LocalView (watch)
//!  PollingSynchronizer ─Poll────┤      │ ChangeDetector
//!                               │      │ NotificationDispatcher
//!  staff commands ──────────────┘      │ LocalStateReconciler
//!                                      └ WatermarkStore checkpoint
//! ```
//!
//! Exactly one task owns the detector, dispatcher, reconciler and store, so
//! the collection, the watermark and the notified-set each have a single
//! writer. Push and poll batches are applied one at a time in arrival order.
//!
//! `stop` cancels both producers; the batch being processed completes, the
//! state is checkpointed and the processor is handed back so the engine can
//! be started again. Repeated `start`/`stop` calls are harmless.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use types::entity::StreamEntity;
use types::ids::EventId;
use types::message::Inbound;
use types::time::CreatedAt;

use crate::config::EngineConfig;
use crate::connection::{
    ConnectionHandle, ConnectionManager, ConnectionStatus, EndpointParams, MessageStream,
    PushTransport,
};
use crate::detector::{ChangeDetector, ChangeSet};
use crate::dispatcher::{DispatchReport, NotificationDispatcher, Notifier};
use crate::error::SyncError;
use crate::polling::{PollOutcome, PollingState, PollingSynchronizer, SnapshotFetcher};
use crate::reconciler::{LocalStateReconciler, LocalView, StatusOutcome};
use crate::watermark::WatermarkStore;

/// How often buffered status changes are checked for expiry.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(5);

// ── Status ──────────────────────────────────────────────────────────

/// Observable health of one stream engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatus {
    pub running: bool,
    /// `None` when the engine has no push channel.
    pub connection: Option<ConnectionStatus>,
    pub polling: PollingState,
}

impl EngineStatus {
    /// How long the push channel has been degraded, if it is.
    pub fn degraded_for(&self, now: Instant) -> Option<Duration> {
        self.connection.and_then(|c| c.degraded_for(now))
    }

    /// Whether no transport is delivering updates.
    pub fn is_blind(&self) -> bool {
        let push_down = self.connection.map_or(true, |c| c.state.is_degraded());
        let poll_down = self.polling != PollingState::Running;
        self.running && push_down && poll_down
    }
}

/// Staff-originated instructions applied through the processing loop.
#[derive(Debug, Clone)]
enum EngineCommand<E: StreamEntity> {
    /// The backend accepted a status change made on this station.
    ConfirmStatus { id: EventId, status: E::Status },
}

// ── Processor ───────────────────────────────────────────────────────

enum Work<E: StreamEntity> {
    Push(Inbound<E>),
    Poll(PollOutcome<E>),
    Command(EngineCommand<E>),
    Housekeeping,
}

/// Single writer of all per-stream state.
struct StreamProcessor<E: StreamEntity> {
    dispatcher: NotificationDispatcher<E>,
    reconciler: LocalStateReconciler<E>,
    watermark_tx: watch::Sender<Option<CreatedAt>>,
    restored: bool,
}

impl<E: StreamEntity> StreamProcessor<E> {
    /// Adopt the persisted cache once. Returns the cached collection.
    fn restore(&mut self) -> Vec<E> {
        if self.restored {
            return self.reconciler.view().entries().to_vec();
        }
        self.restored = true;

        let Some(record) = self.dispatcher.restore() else {
            return Vec::new();
        };
        self.reconciler.apply_snapshot(record.entities.clone());
        self.watermark_tx.send_replace(self.dispatcher.watermark());
        record.entities
    }

    async fn run(
        mut self,
        cancel: CancellationToken,
        mut push: Option<MessageStream<E>>,
        mut polls: mpsc::Receiver<PollOutcome<E>>,
        mut commands: mpsc::Receiver<EngineCommand<E>>,
    ) -> Self {
        let mut housekeeping = interval(HOUSEKEEPING_INTERVAL);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut polls_open = true;
        let mut commands_open = true;

        loop {
            let work = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = commands.recv(), if commands_open => match command {
                    Some(command) => Work::Command(command),
                    None => {
                        commands_open = false;
                        continue;
                    }
                },
                message = next_push(&mut push) => match message {
                    Some(message) => Work::Push(message),
                    None => {
                        debug!(stream = %E::KIND, "Push stream ended");
                        push = None;
                        continue;
                    }
                },
                outcome = polls.recv(), if polls_open => match outcome {
                    Some(outcome) => Work::Poll(outcome),
                    None => {
                        polls_open = false;
                        continue;
                    }
                },
                _ = housekeeping.tick() => Work::Housekeeping,
            };

            // Not raced against cancellation: a dequeued batch always completes.
            self.handle(work).await;
        }

        // The poller has already committed every outcome still queued here.
        while let Ok(outcome) = polls.try_recv() {
            self.handle(Work::Poll(outcome)).await;
        }
        while let Ok(command) = commands.try_recv() {
            self.handle(Work::Command(command)).await;
        }

        self.checkpoint();
        self
    }

    async fn handle(&mut self, work: Work<E>) {
        let before = self.dispatcher.watermark();
        let changed = match work {
            Work::Push(Inbound::Snapshot(entities)) => {
                let changes = ChangeDetector::diff(self.reconciler.view().entries(), &entities);
                self.dispatch("push", &changes).await;
                self.reconciler.apply_snapshot(entities)
            }
            Work::Push(Inbound::Inserted(event)) => {
                let changes = ChangeDetector::inserted(self.reconciler.get(event.id()), event.clone());
                self.dispatch("push", &changes).await;
                self.reconciler.apply_insert(event)
            }
            Work::Push(Inbound::StatusChanged { id, status }) => {
                let changes = ChangeDetector::status_changed(self.reconciler.get(id), id, status);
                self.dispatch("push", &changes).await;
                self.reconciler.apply_status_change(id, status) == StatusOutcome::Applied
            }
            Work::Poll(outcome) => {
                self.dispatch("poll", &outcome.changes).await;
                self.reconciler.apply_snapshot(outcome.snapshot)
            }
            Work::Command(EngineCommand::ConfirmStatus { id, status }) => {
                // The echo of our own change must not alert this station.
                self.dispatcher.mark_notified(id, status);
                self.reconciler.apply_status_change(id, status) == StatusOutcome::Applied
            }
            Work::Housekeeping => {
                self.reconciler.prune_expired();
                let reconciler = &self.reconciler;
                self.dispatcher.forget_untracked(|id| reconciler.tracks(id));
                false
            }
        };

        let after = self.dispatcher.watermark();
        if after != before {
            self.watermark_tx.send_replace(after);
        }
        if changed || after != before {
            self.checkpoint();
        }
    }

    async fn dispatch(&mut self, source: &'static str, changes: &ChangeSet<E>) -> DispatchReport {
        if changes.is_empty() {
            return DispatchReport::default();
        }
        let report = self.dispatcher.process(changes).await;
        debug!(
            stream = %E::KIND,
            source,
            added = changes.added.len(),
            changed = changes.changed.len(),
            scheduled = report.scheduled,
            skipped = report.skipped,
            "Batch dispatched"
        );
        report
    }

    fn checkpoint(&self) {
        let view = self.reconciler.view();
        if let Err(err) = self.dispatcher.checkpoint(view.entries()) {
            let err = SyncError::from(err);
            warn!(stream = %E::KIND, error = %err, "Failed to persist stream cache");
        }
    }
}

async fn next_push<E: StreamEntity>(push: &mut Option<MessageStream<E>>) -> Option<Inbound<E>> {
    match push {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

// ── Engine ──────────────────────────────────────────────────────────

struct PushSource {
    transport: Arc<dyn PushTransport>,
    params: EndpointParams,
}

/// Builder for [`StreamEngine`].
pub struct StreamEngineBuilder<E: StreamEntity> {
    notifier: Arc<dyn Notifier>,
    store: WatermarkStore<E>,
    push: Option<PushSource>,
    fetcher: Option<Arc<dyn SnapshotFetcher<E>>>,
    config: EngineConfig,
}

impl<E: StreamEntity> StreamEngineBuilder<E> {
    /// Persist the watermark and collection (default: memory only).
    pub fn store(mut self, store: WatermarkStore<E>) -> Self {
        self.store = store;
        self
    }

    /// Receive updates over a push channel.
    pub fn push(mut self, transport: Arc<dyn PushTransport>, params: EndpointParams) -> Self {
        self.push = Some(PushSource { transport, params });
        self
    }

    /// Poll full snapshots from `fetcher`.
    pub fn polling(mut self, fetcher: Arc<dyn SnapshotFetcher<E>>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> StreamEngine<E> {
        let reconciler = LocalStateReconciler::new(self.config.reconciler.clone());
        let view_rx = reconciler.subscribe();
        let (watermark_tx, watermark_rx) = watch::channel(None);

        let processor = StreamProcessor {
            dispatcher: NotificationDispatcher::new(self.notifier, self.store),
            reconciler,
            watermark_tx,
            restored: false,
        };

        StreamEngine {
            config: self.config,
            push: self.push,
            fetcher: self.fetcher,
            poller: None,
            connection: None,
            processor: Some(processor),
            running: None,
            view_rx,
            watermark_rx,
        }
    }
}

struct Running<E: StreamEntity> {
    cancel: CancellationToken,
    commands: mpsc::Sender<EngineCommand<E>>,
    task: JoinHandle<StreamProcessor<E>>,
}

/// Explicitly owned synchronization engine for one stream.
pub struct StreamEngine<E: StreamEntity> {
    config: EngineConfig,
    push: Option<PushSource>,
    fetcher: Option<Arc<dyn SnapshotFetcher<E>>>,
    poller: Option<PollingSynchronizer<E>>,
    connection: Option<ConnectionHandle<E>>,
    /// Present while stopped.
    processor: Option<StreamProcessor<E>>,
    /// Present while running.
    running: Option<Running<E>>,
    view_rx: watch::Receiver<Arc<LocalView<E>>>,
    watermark_rx: watch::Receiver<Option<CreatedAt>>,
}

impl<E: StreamEntity> StreamEngine<E> {
    pub fn builder(notifier: Arc<dyn Notifier>) -> StreamEngineBuilder<E> {
        StreamEngineBuilder {
            notifier,
            store: WatermarkStore::in_memory(),
            push: None,
            fetcher: None,
            config: EngineConfig::default(),
        }
    }

    /// Restore the cache, then start the producers and the processing loop.
    ///
    /// Calling `start` on a running engine is a no-op. Must be called from
    /// within a Tokio runtime.
    pub async fn start(&mut self) {
        let Some(mut processor) = self.processor.take() else {
            debug!(stream = %E::KIND, "Engine already running");
            return;
        };

        let cached = processor.restore();
        processor.dispatcher.ensure_permission().await;

        let poller = self
            .poller
            .get_or_insert_with(|| PollingSynchronizer::with_previous(cached));

        let capacity = self.config.connection.channel_capacity.max(1);
        let (poll_tx, poll_rx) = mpsc::channel(capacity);
        let (command_tx, command_rx) = mpsc::channel(capacity);

        match &self.fetcher {
            Some(fetcher) if self.config.polling.enabled => {
                poller.start(Arc::clone(fetcher), self.config.polling.interval, poll_tx);
            }
            _ => drop(poll_tx),
        }

        let push_stream = match &self.push {
            Some(source) => {
                let manager =
                    ConnectionManager::new(Arc::clone(&source.transport), self.config.connection.clone());
                let mut handle = manager.connect::<E>(source.params.clone());
                let stream = handle.subscribe();
                self.connection = Some(handle);
                stream
            }
            None => None,
        };

        if self.push.is_none() && !(self.fetcher.is_some() && self.config.polling.enabled) {
            warn!(stream = %E::KIND, "Engine started without any transport");
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(processor.run(cancel.clone(), push_stream, poll_rx, command_rx));
        self.running = Some(Running {
            cancel,
            commands: command_tx,
            task,
        });
        info!(
            stream = %E::KIND,
            push = self.push.is_some(),
            polling = self.fetcher.is_some() && self.config.polling.enabled,
            "Stream engine started"
        );
    }

    /// Stop producers, let the current batch finish, checkpoint. Idempotent.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        if let Some(poller) = self.poller.as_mut() {
            poller.stop().await;
        }
        if let Some(connection) = self.connection.as_mut() {
            connection.disconnect().await;
        }

        running.cancel.cancel();
        drop(running.commands);
        match running.task.await {
            Ok(processor) => self.processor = Some(processor),
            Err(err) => warn!(stream = %E::KIND, error = %err, "Processing task ended abnormally"),
        }
        info!(stream = %E::KIND, "Stream engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Current collection, most recent first.
    pub fn view(&self) -> Arc<LocalView<E>> {
        self.view_rx.borrow().clone()
    }

    /// Receiver notified on every collection change.
    pub fn subscribe_view(&self) -> watch::Receiver<Arc<LocalView<E>>> {
        self.view_rx.clone()
    }

    pub fn watermark(&self) -> Option<CreatedAt> {
        *self.watermark_rx.borrow()
    }

    pub fn watch_watermark(&self) -> watch::Receiver<Option<CreatedAt>> {
        self.watermark_rx.clone()
    }

    pub fn watch_connection(&self) -> Option<watch::Receiver<ConnectionStatus>> {
        self.connection.as_ref().map(|c| c.watch_state())
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            running: self.is_running(),
            connection: self.connection.as_ref().map(|c| c.status()),
            polling: self
                .poller
                .as_ref()
                .map_or(PollingState::Idle, |p| p.state()),
        }
    }

    /// Record a status change this station made and the backend accepted.
    ///
    /// The local entry is patched right away and the push/poll echo of the
    /// same change does not notify.
    pub async fn confirm_local_status(&self, id: EventId, status: E::Status) -> Result<(), SyncError> {
        let Some(running) = &self.running else {
            return Err(SyncError::Transport("engine is not running".to_string()));
        };
        running
            .commands
            .send(EngineCommand::ConfirmStatus { id, status })
            .await
            .map_err(|_| SyncError::Transport("engine is shutting down".to_string()))
    }
}

impl<E: StreamEntity> Drop for StreamEngine<E> {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}
