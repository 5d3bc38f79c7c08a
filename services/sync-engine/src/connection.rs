//! Push-channel connection manager
//!
//! Owns the lifecycle of one hub connection per stream:
//!
//! ```text
//! Disconnected ──connect──► Connecting ──snapshot──► Connected ──drop──► Reconnecting
//!                               │                     ▲                    │
//!                               └──fail──► Reconnecting ──snapshot─────────┘
//!                                              │
//!                        N consecutive failures └──► Failed (still retrying)
//! ```
//!
//! - Reconnection uses capped exponential backoff with jitter.
//! - After `max_consecutive_failures` the state turns `Failed` so callers can
//!   surface degraded connectivity; retries go on at the capped delay.
//! - An authentication rejection is terminal: `Failed`, no retry.
//! - Right after connecting the server sends a snapshot. Only that snapshot
//!   makes the channel `Connected`. If none arrives within `snapshot_timeout`
//!   the session is dropped and counted as a failure.
//! - `disconnect` works from any state and is idempotent.
//!
//! Consumers see a single typed `Inbound` stream; reconnects are invisible
//! to them beyond the fresh snapshot each new session starts with.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use types::entity::StreamEntity;
use types::ids::RestaurantId;
use types::message::{HubMessage, Inbound};
use types::stream::StreamKind;

use crate::config::ConnectionConfig;
use crate::error::SyncError;

// ── State ───────────────────────────────────────────────────────────

/// Lifecycle state of one push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    /// Whether callers should show degraded connectivity.
    pub fn is_degraded(&self) -> bool {
        matches!(self, ConnectionState::Reconnecting | ConnectionState::Failed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Observable connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// When the current state was entered.
    pub since: Instant,
    pub consecutive_failures: u32,
}

impl ConnectionStatus {
    fn new(state: ConnectionState) -> Self {
        Self {
            state,
            since: Instant::now(),
            consecutive_failures: 0,
        }
    }

    /// How long the channel has been degraded, `None` when healthy.
    pub fn degraded_for(&self, now: Instant) -> Option<Duration> {
        self.state
            .is_degraded()
            .then(|| now.saturating_duration_since(self.since))
    }
}

// ── Transport seam ──────────────────────────────────────────────────

/// Where a stream's push channel lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointParams {
    /// Hub base URL, e.g. `https://api.example.com`.
    pub hub_base: String,
    pub restaurant_id: RestaurantId,
    /// Bearer token carried to the hub, when the deployment requires one.
    pub access_token: Option<String>,
}

impl EndpointParams {
    pub fn new(hub_base: impl Into<String>, restaurant_id: RestaurantId) -> Self {
        Self {
            hub_base: hub_base.into(),
            restaurant_id,
            access_token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

/// Opens push sessions.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn open(
        &self,
        stream: StreamKind,
        params: &EndpointParams,
    ) -> Result<Box<dyn PushSession>, SyncError>;
}

/// One live push session.
#[async_trait]
pub trait PushSession: Send {
    /// Next decoded message.
    ///
    /// `Ok(None)` means the server ended the session. A `MalformedPayload`
    /// error concerns one message only; the session stays usable.
    async fn next_message(&mut self) -> Result<Option<HubMessage>, SyncError>;

    async fn close(&mut self);
}

// ── Backoff ─────────────────────────────────────────────────────────

/// Delay before reconnection attempt number `attempt` (0-based).
///
/// `initial * multiplier^attempt`, capped, then spread by ±`jitter_factor`.
pub fn backoff_delay(attempt: u32, config: &ConnectionConfig) -> Duration {
    let exponent = attempt.min(32) as i32;
    let base = config.initial_reconnect_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    let max = config.max_reconnect_delay.as_secs_f64();
    let capped = base.min(max);

    let jitter = config.jitter_factor.clamp(0.0, 1.0);
    let spread = if jitter > 0.0 {
        rand::thread_rng().gen_range(-jitter..=jitter)
    } else {
        0.0
    };
    let jittered = (capped * (1.0 + spread)).min(max);

    Duration::from_secs_f64(jittered.max(0.0))
}

// ── Manager ─────────────────────────────────────────────────────────

/// Inbound message stream handed to the consumer.
pub type MessageStream<E> = ReceiverStream<Inbound<E>>;

/// Creates one supervised connection per `connect` call.
pub struct ConnectionManager {
    transport: Arc<dyn PushTransport>,
    config: ConnectionConfig,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn PushTransport>, config: ConnectionConfig) -> Self {
        Self { transport, config }
    }

    pub fn with_defaults(transport: Arc<dyn PushTransport>) -> Self {
        Self::new(transport, ConnectionConfig::default())
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Start connecting the push channel of `E`'s stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect<E: StreamEntity>(&self, params: EndpointParams) -> ConnectionHandle<E> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let state = Arc::new(watch::channel(ConnectionStatus::new(ConnectionState::Connecting)).0);
        let cancel = CancellationToken::new();

        let worker = ConnectionWorker::<E> {
            transport: Arc::clone(&self.transport),
            params,
            config: self.config.clone(),
            tx,
            state: Arc::clone(&state),
            cancel: cancel.clone(),
            failures: 0,
        };
        let task = tokio::spawn(worker.run());

        ConnectionHandle {
            stream: E::KIND,
            cancel,
            state,
            messages: Some(rx),
            task: Some(task),
        }
    }
}

/// Caller's grip on one connection.
///
/// Dropping the handle cancels the connection.
pub struct ConnectionHandle<E: StreamEntity> {
    stream: StreamKind,
    cancel: CancellationToken,
    state: Arc<watch::Sender<ConnectionStatus>>,
    messages: Option<mpsc::Receiver<Inbound<E>>>,
    task: Option<JoinHandle<()>>,
}

impl<E: StreamEntity> ConnectionHandle<E> {
    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().state
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionStatus> {
        self.state.subscribe()
    }

    /// Take the inbound message stream. Only the first call gets it.
    pub fn subscribe(&mut self) -> Option<MessageStream<E>> {
        self.messages.take().map(ReceiverStream::new)
    }

    /// Close the channel and wait for the worker to exit. Idempotent.
    pub async fn disconnect(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(stream = %self.stream, error = %err, "Connection task ended abnormally");
            }
            info!(stream = %self.stream, "Push channel disconnected");
        }
        self.state.send_modify(|status| {
            if status.state != ConnectionState::Disconnected {
                *status = ConnectionStatus::new(ConnectionState::Disconnected);
            }
        });
    }
}

impl<E: StreamEntity> Drop for ConnectionHandle<E> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Worker ──────────────────────────────────────────────────────────

/// Why a session ended.
enum SessionEnd {
    Cancelled,
    ConsumerGone,
    Dropped(String),
    Rejected(SyncError),
}

enum Step {
    Cancelled,
    SnapshotTimeout,
    Message(Result<Option<HubMessage>, SyncError>),
}

struct ConnectionWorker<E: StreamEntity> {
    transport: Arc<dyn PushTransport>,
    params: EndpointParams,
    config: ConnectionConfig,
    tx: mpsc::Sender<Inbound<E>>,
    state: Arc<watch::Sender<ConnectionStatus>>,
    cancel: CancellationToken,
    failures: u32,
}

impl<E: StreamEntity> ConnectionWorker<E> {
    async fn run(mut self) {
        let stream = E::KIND;
        let mut connected_once = false;

        loop {
            let attempt_state = if self.exhausted() {
                ConnectionState::Failed
            } else if connected_once || self.failures > 0 {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            };
            self.set_state(attempt_state);

            let opened = tokio::select! {
                _ = self.cancel.cancelled() => break,
                opened = timeout(self.config.connect_timeout, self.transport.open(stream, &self.params)) => opened,
            };

            match opened {
                Ok(Ok(session)) => {
                    connected_once = true;
                    info!(stream = %stream, "Push channel opened, awaiting snapshot");

                    match self.drive(session).await {
                        SessionEnd::Cancelled | SessionEnd::ConsumerGone => break,
                        SessionEnd::Rejected(err) => {
                            self.reject(err);
                            return;
                        }
                        SessionEnd::Dropped(reason) => {
                            self.failures += 1;
                            warn!(
                                stream = %stream,
                                failures = self.failures,
                                reason = %reason,
                                "Push channel dropped"
                            );
                        }
                    }
                }
                Ok(Err(err)) if err.is_terminal() => {
                    self.reject(err);
                    return;
                }
                Ok(Err(err)) => {
                    self.failures += 1;
                    warn!(
                        stream = %stream,
                        failures = self.failures,
                        error = %err,
                        "Push channel connect failed"
                    );
                }
                Err(_) => {
                    self.failures += 1;
                    warn!(
                        stream = %stream,
                        failures = self.failures,
                        timeout_ms = self.config.connect_timeout.as_millis() as u64,
                        "Push channel connect timed out"
                    );
                }
            }

            let delay = backoff_delay(self.failures.saturating_sub(1), &self.config);
            if self.exhausted() {
                self.set_state(ConnectionState::Failed);
            } else {
                self.set_state(ConnectionState::Reconnecting);
            }
            debug!(stream = %stream, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
    }

    /// Pump one session until it ends.
    async fn drive(&mut self, mut session: Box<dyn PushSession>) -> SessionEnd {
        let stream = E::KIND;
        let deadline = Instant::now() + self.config.snapshot_timeout;
        let mut snapshot_seen = false;

        loop {
            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Cancelled,
                _ = sleep_until(deadline), if !snapshot_seen => Step::SnapshotTimeout,
                message = session.next_message() => Step::Message(message),
            };

            let message = match step {
                Step::Cancelled => {
                    session.close().await;
                    return SessionEnd::Cancelled;
                }
                Step::SnapshotTimeout => {
                    session.close().await;
                    return SessionEnd::Dropped("no snapshot received after connecting".to_string());
                }
                Step::Message(Ok(Some(message))) => message,
                Step::Message(Ok(None)) => {
                    return SessionEnd::Dropped("closed by server".to_string());
                }
                Step::Message(Err(SyncError::MalformedPayload(err))) => {
                    warn!(stream = %stream, error = %err, "Dropping malformed push message");
                    continue;
                }
                Step::Message(Err(err)) if err.is_terminal() => {
                    session.close().await;
                    return SessionEnd::Rejected(err);
                }
                Step::Message(Err(err)) => {
                    return SessionEnd::Dropped(err.to_string());
                }
            };

            let target = message.target();
            let Some(inbound) = E::from_hub(message) else {
                debug!(stream = %stream, target, "Ignoring message for another stream");
                continue;
            };

            if inbound.is_snapshot() && !snapshot_seen {
                snapshot_seen = true;
                self.failures = 0;
                self.set_state(ConnectionState::Connected);
            }
            debug!(stream = %stream, kind = inbound.kind_label(), "Push message received");

            let sent = tokio::select! {
                _ = self.cancel.cancelled() => None,
                sent = self.tx.send(inbound) => Some(sent),
            };
            match sent {
                None => {
                    session.close().await;
                    return SessionEnd::Cancelled;
                }
                Some(Err(_)) => {
                    debug!(stream = %stream, "Message consumer gone, closing push channel");
                    session.close().await;
                    return SessionEnd::ConsumerGone;
                }
                Some(Ok(())) => {}
            }
        }
    }

    fn exhausted(&self) -> bool {
        self.config.max_consecutive_failures > 0
            && self.failures >= self.config.max_consecutive_failures
    }

    fn reject(&self, err: SyncError) {
        error!(stream = %E::KIND, error = %err, "Push channel rejected, not retrying");
        self.set_state(ConnectionState::Failed);
    }

    /// Publish a state, keeping `since` when the state does not change.
    fn set_state(&self, state: ConnectionState) {
        let failures = self.failures;
        self.state.send_if_modified(|status| {
            if status.state == state && status.consecutive_failures == failures {
                return false;
            }
            if status.state != state {
                debug!(stream = %E::KIND, from = %status.state, to = %state, "Connection state changed");
                status.state = state;
                status.since = Instant::now();
            }
            status.consecutive_failures = failures;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use types::ids::EventId;
    use types::request::RequestRecord;

    type Script = Vec<Result<Option<HubMessage>, SyncError>>;

    /// Hands out scripted sessions; refuses once the scripts run out.
    #[derive(Default)]
    struct ScriptedTransport {
        sessions: Mutex<VecDeque<Result<Script, SyncError>>>,
        attempts: AtomicU32,
    }

    impl ScriptedTransport {
        fn with(sessions: Vec<Result<Script, SyncError>>) -> Arc<Self> {
            Arc::new(Self {
                sessions: Mutex::new(sessions.into()),
                attempts: AtomicU32::new(0),
            })
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PushTransport for ScriptedTransport {
        async fn open(
            &self,
            _stream: StreamKind,
            _params: &EndpointParams,
        ) -> Result<Box<dyn PushSession>, SyncError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.sessions.lock().unwrap().pop_front();
            match next {
                Some(Ok(script)) => Ok(Box::new(ScriptedSession {
                    script: script.into(),
                })),
                Some(Err(err)) => Err(err),
                None => Err(SyncError::Transport("connection refused".to_string())),
            }
        }
    }

    struct ScriptedSession {
        script: VecDeque<Result<Option<HubMessage>, SyncError>>,
    }

    #[async_trait]
    impl PushSession for ScriptedSession {
        async fn next_message(&mut self) -> Result<Option<HubMessage>, SyncError> {
            match self.script.pop_front() {
                Some(next) => next,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {}
    }

    fn params() -> EndpointParams {
        EndpointParams::new("http://hub.test", RestaurantId::new(1))
    }

    fn snapshot(ids: &[u64]) -> HubMessage {
        let items: Vec<_> = ids
            .iter()
            .map(|id| json!({"id": id, "status": "pending", "createdAt": *id as i64 * 10}))
            .collect();
        HubMessage::decode("LoadCurrentRequest", &[json!(items)])
            .unwrap()
            .message
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            jitter_factor: 0.0,
            ..ConnectionConfig::default()
        }
    }

    async fn wait_for_state(
        rx: &mut watch::Receiver<ConnectionStatus>,
        state: ConnectionState,
    ) -> ConnectionStatus {
        let status = tokio::time::timeout(Duration::from_secs(3600), rx.wait_for(|s| s.state == state))
            .await
            .expect("state not reached")
            .expect("state channel closed");
        *status
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = config();
        assert_eq!(backoff_delay(0, &config), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, &config), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, &config), Duration::from_secs(8));
        assert_eq!(backoff_delay(10, &config), Duration::from_secs(30));
        assert_eq!(backoff_delay(u32::MAX, &config), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_jitter_stays_in_bounds() {
        let config = ConnectionConfig::default();
        for attempt in 0..8 {
            let delay = backoff_delay(attempt, &config).as_secs_f64();
            let base = (2f64.powi(attempt as i32)).min(30.0);
            assert!(delay >= base * 0.8 - 1e-9, "attempt {attempt}: {delay}");
            assert!(delay <= (base * 1.2).min(30.0) + 1e-9, "attempt {attempt}: {delay}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_forwarded_and_connected() {
        let transport = ScriptedTransport::with(vec![Ok(vec![Ok(Some(snapshot(&[1, 2])))])]);
        let manager = ConnectionManager::new(transport.clone(), config());
        let mut handle = manager.connect::<RequestRecord>(params());
        let mut messages = handle.subscribe().unwrap();
        assert!(handle.subscribe().is_none());

        match messages.next().await {
            Some(Inbound::Snapshot(records)) => assert_eq!(records.len(), 2),
            other => panic!("Expected Snapshot, got {:?}", other),
        }
        let mut rx = handle.watch_state();
        let status = wait_for_state(&mut rx, ConnectionState::Connected).await;
        assert_eq!(status.consecutive_failures, 0);

        handle.disconnect().await;
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaches_failed_after_consecutive_failures() {
        let transport = ScriptedTransport::with(Vec::new());
        let manager = ConnectionManager::new(transport.clone(), config());
        let mut handle = manager.connect::<RequestRecord>(params());

        let mut rx = handle.watch_state();
        let status = wait_for_state(&mut rx, ConnectionState::Failed).await;
        assert!(status.consecutive_failures >= 5);
        assert!(transport.attempts() >= 5);

        // Still retrying after Failed.
        let before = transport.attempts();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(transport.attempts() > before);

        handle.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_to_connected_after_failed() {
        let mut sessions: Vec<Result<Script, SyncError>> = (0..5)
            .map(|_| Err(SyncError::Transport("refused".to_string())))
            .collect();
        sessions.push(Ok(vec![Ok(Some(snapshot(&[1])))]));
        let transport = ScriptedTransport::with(sessions);
        let manager = ConnectionManager::new(transport.clone(), config());
        let mut handle = manager.connect::<RequestRecord>(params());
        let mut messages = handle.subscribe().unwrap();

        let mut rx = handle.watch_state();
        wait_for_state(&mut rx, ConnectionState::Failed).await;
        assert!(matches!(messages.next().await, Some(Inbound::Snapshot(_))));
        let status = wait_for_state(&mut rx, ConnectionState::Connected).await;
        assert_eq!(status.consecutive_failures, 0);

        handle.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_sessions_stay_failed() {
        let sessions: Vec<Result<Script, SyncError>> = (0..100).map(|_| Ok(Vec::new())).collect();
        let transport = ScriptedTransport::with(sessions);
        let manager = ConnectionManager::new(
            transport.clone(),
            ConnectionConfig {
                max_consecutive_failures: 2,
                ..config()
            },
        );
        let mut handle = manager.connect::<RequestRecord>(params());
        let _messages = handle.subscribe().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut recorder = handle.watch_state();
        let recorded = seen.clone();
        let recording = tokio::spawn(async move {
            while recorder.changed().await.is_ok() {
                let state = recorder.borrow_and_update().state;
                recorded.lock().unwrap().push(state);
            }
        });

        let mut rx = handle.watch_state();
        let failed = wait_for_state(&mut rx, ConnectionState::Failed).await;
        let attempts = transport.attempts();
        tokio::time::sleep(Duration::from_secs(300)).await;

        assert!(transport.attempts() > attempts);
        let status = *rx.borrow();
        assert_eq!(status.state, ConnectionState::Failed);
        assert_eq!(status.since, failed.since);
        assert!(status.degraded_for(Instant::now()).unwrap() >= Duration::from_secs(300));
        assert!(!seen.lock().unwrap().contains(&ConnectionState::Connected));

        handle.disconnect().await;
        recording.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_rejection_is_terminal() {
        let transport = ScriptedTransport::with(vec![Err(SyncError::Auth("401".to_string()))]);
        let manager = ConnectionManager::new(transport.clone(), config());
        let mut handle = manager.connect::<RequestRecord>(params());

        let mut rx = handle.watch_state();
        wait_for_state(&mut rx, ConnectionState::Failed).await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(transport.attempts(), 1);
        assert_eq!(handle.state(), ConnectionState::Failed);

        handle.disconnect().await;
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_snapshot_triggers_reconnect() {
        let insert = HubMessage::decode(
            "ReceiveNewRequest",
            &[json!({"id": 3, "status": "pending", "createdAt": 30})],
        )
        .unwrap()
        .message;
        let transport = ScriptedTransport::with(vec![
            Ok(vec![Ok(Some(insert))]),
            Ok(vec![Ok(Some(snapshot(&[3])))]),
        ]);
        let manager = ConnectionManager::new(transport.clone(), config());
        let mut handle = manager.connect::<RequestRecord>(params());
        let mut messages = handle.subscribe().unwrap();

        // The early insert still reaches the consumer.
        match messages.next().await {
            Some(Inbound::Inserted(record)) => assert_eq!(record.id, EventId::new(3)),
            other => panic!("Expected Inserted, got {:?}", other),
        }
        assert!(matches!(messages.next().await, Some(Inbound::Snapshot(_))));
        assert_eq!(transport.attempts(), 2);

        handle.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_message_keeps_session() {
        let malformed = Err(SyncError::MalformedPayload(
            types::errors::PayloadError::UnknownTarget("Nope".to_string()),
        ));
        let transport = ScriptedTransport::with(vec![Ok(vec![
            Ok(Some(snapshot(&[1]))),
            malformed,
            Ok(Some(snapshot(&[1, 2]))),
        ])]);
        let manager = ConnectionManager::new(transport.clone(), config());
        let mut handle = manager.connect::<RequestRecord>(params());
        let mut messages = handle.subscribe().unwrap();

        assert!(matches!(messages.next().await, Some(Inbound::Snapshot(_))));
        match messages.next().await {
            Some(Inbound::Snapshot(records)) => assert_eq!(records.len(), 2),
            other => panic!("Expected Snapshot, got {:?}", other),
        }
        assert_eq!(transport.attempts(), 1);

        handle.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let transport = ScriptedTransport::with(Vec::new());
        let manager = ConnectionManager::new(transport, config());
        let mut handle = manager.connect::<RequestRecord>(params());

        handle.disconnect().await;
        handle.disconnect().await;
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_degraded_states() {
        assert!(ConnectionState::Reconnecting.is_degraded());
        assert!(ConnectionState::Failed.is_degraded());
        assert!(!ConnectionState::Connected.is_degraded());
        assert!(!ConnectionState::Disconnected.is_degraded());
    }
}
