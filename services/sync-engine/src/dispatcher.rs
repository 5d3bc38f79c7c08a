//! Notification dispatcher
//!
//! Deduplication uses two layers:
//! 1. The stream watermark: an added event notifies only when its
//!    `created_at` is newer than every event already processed. An event
//!    exactly at the watermark notifies unless its `(id, status)` was
//!    already surfaced.
//! 2. The session notified-set of `(id, status)` pairs: a status change on
//!    an old id notifies once per new status.
//!
//! Added events are processed oldest first so alerts appear in real-world
//! arrival order whatever order the batch came in. After the batch the
//! watermark moves to the newest `created_at` among the added events.
//!
//! Scheduling goes through the `Notifier` capability. A failure to schedule
//! is logged and the batch goes on; a denied permission suppresses the
//! schedule call while all bookkeeping continues.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use types::entity::{NotificationText, StreamEntity};
use types::ids::EventId;
use types::time::CreatedAt;

use crate::detector::ChangeSet;
use crate::error::SyncError;
use crate::watermark::{CachedStream, StoreError, WatermarkStore};

// ── Notification capability ─────────────────────────────────────────

/// Outcome of the one-time permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// One alert handed to the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// `{stream}:{id}:{status}`; lets the platform collapse repeats.
    pub dedup_key: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Notification permission denied")]
    PermissionDenied,

    #[error("Scheduling rejected: {0}")]
    Rejected(String),
}

impl From<NotifyError> for SyncError {
    fn from(err: NotifyError) -> Self {
        SyncError::NotificationScheduling(err.to_string())
    }
}

/// Platform notification capability.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn request_permission(&self) -> Permission;

    async fn schedule(&self, notification: Notification) -> Result<(), NotifyError>;
}

// ── Dispatch report ─────────────────────────────────────────────────

/// Per-batch accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Schedule calls that succeeded.
    pub scheduled: usize,
    /// Qualifying events not scheduled because permission was denied.
    pub suppressed: usize,
    /// Schedule calls that failed.
    pub failed: usize,
    /// Events that did not qualify (older than the watermark or already notified).
    pub skipped: usize,
}

impl DispatchReport {
    /// Events that passed deduplication, whatever happened to the schedule call.
    pub fn qualified(&self) -> usize {
        self.scheduled + self.suppressed + self.failed
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────

pub struct NotificationDispatcher<E: StreamEntity> {
    notifier: Arc<dyn Notifier>,
    store: WatermarkStore<E>,
    notified: HashSet<(EventId, E::Status)>,
    permission: Option<Permission>,
}

impl<E: StreamEntity> NotificationDispatcher<E> {
    pub fn new(notifier: Arc<dyn Notifier>, store: WatermarkStore<E>) -> Self {
        Self {
            notifier,
            store,
            notified: HashSet::new(),
            permission: None,
        }
    }

    /// Load the persisted record, adopt its watermark and seed the
    /// notified-set from its entities. Returns the cached record.
    pub fn restore(&mut self) -> Option<CachedStream<E>> {
        let record = self.store.load()?;
        self.seed(&record.entities);
        Some(record)
    }

    /// Mark every `(id, status)` of `entities` as already surfaced.
    pub fn seed(&mut self, entities: &[E]) {
        self.notified
            .extend(entities.iter().map(|e| (e.id(), e.status())));
    }

    /// Treat `(id, status)` as surfaced without alerting.
    pub fn mark_notified(&mut self, id: EventId, status: E::Status) {
        self.notified.insert((id, status));
    }

    /// Drop surfaced pairs whose id `tracked` no longer knows.
    ///
    /// Returns the number of forgotten pairs.
    pub fn forget_untracked(&mut self, tracked: impl Fn(EventId) -> bool) -> usize {
        let before = self.notified.len();
        self.notified.retain(|(id, _)| tracked(*id));
        let forgotten = before - self.notified.len();
        if forgotten > 0 {
            debug!(stream = %E::KIND, forgotten, "Forgot notified pairs for departed events");
        }
        forgotten
    }

    /// Ask for permission the first time, then reuse the answer.
    pub async fn ensure_permission(&mut self) -> Permission {
        if let Some(permission) = self.permission {
            return permission;
        }
        let permission = self.notifier.request_permission().await;
        info!(stream = %E::KIND, ?permission, "Notification permission resolved");
        self.permission = Some(permission);
        permission
    }

    /// Deduplicate a change set and schedule what qualifies.
    pub async fn process(&mut self, changes: &ChangeSet<E>) -> DispatchReport {
        let mut report = DispatchReport::default();
        let watermark = self.store.watermark();

        let mut added: Vec<&E> = changes.added.iter().collect();
        added.sort_by_key(|e| (e.created_at(), e.id()));

        for event in &added {
            let key = (event.id(), event.status());
            if !self.is_fresh(event.created_at(), watermark) || self.notified.contains(&key) {
                report.skipped += 1;
                continue;
            }
            self.emit(key, event.describe_new(), &mut report).await;
        }

        for change in &changes.changed {
            let key = (change.id, change.new);
            if self.notified.contains(&key) {
                report.skipped += 1;
                continue;
            }
            self.emit(key, E::describe_status(change.id, change.new), &mut report)
                .await;
        }

        if let Some(newest) = added.last().map(|e| e.created_at()) {
            self.store.advance(newest);
        }

        if report.qualified() > 0 || report.skipped > 0 {
            debug!(
                stream = %E::KIND,
                scheduled = report.scheduled,
                suppressed = report.suppressed,
                failed = report.failed,
                skipped = report.skipped,
                "Dispatched change set"
            );
        }
        report
    }

    /// Ties with the watermark pass; the `(id, status)` set stops repeats.
    fn is_fresh(&self, created_at: CreatedAt, watermark: Option<CreatedAt>) -> bool {
        match watermark {
            None => true,
            Some(w) => created_at >= w,
        }
    }

    async fn emit(
        &mut self,
        key: (EventId, E::Status),
        text: NotificationText,
        report: &mut DispatchReport,
    ) {
        self.notified.insert(key);
        if self.ensure_permission().await == Permission::Denied {
            report.suppressed += 1;
            return;
        }

        let (id, status) = key;
        let notification = Notification {
            title: text.title,
            body: text.body,
            dedup_key: format!("{}:{}:{}", E::KIND.label(), id, status),
        };
        match self.notifier.schedule(notification).await {
            Ok(()) => report.scheduled += 1,
            Err(err) => {
                let err = SyncError::from(err);
                warn!(
                    stream = %E::KIND,
                    event_id = %id,
                    %status,
                    error = %err,
                    "Failed to schedule notification"
                );
                report.failed += 1;
            }
        }
    }

    pub fn watermark(&self) -> Option<CreatedAt> {
        self.store.watermark()
    }

    pub fn has_notified(&self, id: EventId, status: E::Status) -> bool {
        self.notified.contains(&(id, status))
    }

    pub fn permission(&self) -> Option<Permission> {
        self.permission
    }

    /// Persist the watermark together with the current collection.
    pub fn checkpoint(&self, entities: &[E]) -> Result<(), StoreError> {
        self.store.save(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{ChangeDetector, StatusChange};
    use proptest::prelude::*;
    use std::sync::Mutex;
    use types::request::{RequestRecord, RequestStatus};

    #[derive(Default)]
    struct RecordingNotifier {
        deny: bool,
        fail_bodies_containing: Option<String>,
        scheduled: Mutex<Vec<Notification>>,
        permission_requests: Mutex<usize>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn request_permission(&self) -> Permission {
            *self.permission_requests.lock().unwrap() += 1;
            if self.deny {
                Permission::Denied
            } else {
                Permission::Granted
            }
        }

        async fn schedule(&self, notification: Notification) -> Result<(), NotifyError> {
            if let Some(pattern) = &self.fail_bodies_containing {
                if notification.body.contains(pattern.as_str()) {
                    return Err(NotifyError::Rejected("quota".to_string()));
                }
            }
            self.scheduled.lock().unwrap().push(notification);
            Ok(())
        }
    }

    impl RecordingNotifier {
        fn keys(&self) -> Vec<String> {
            self.scheduled
                .lock()
                .unwrap()
                .iter()
                .map(|n| n.dedup_key.clone())
                .collect()
        }
    }

    fn request(id: u64, created_at: i64, status: RequestStatus) -> RequestRecord {
        RequestRecord {
            id: EventId::new(id),
            order_id: None,
            table_name: Some(format!("T{}", id)),
            type_name: Some("Call staff".to_string()),
            note: None,
            status,
            created_at: CreatedAt::from_millis(created_at),
        }
    }

    fn dispatcher(notifier: Arc<RecordingNotifier>) -> NotificationDispatcher<RequestRecord> {
        NotificationDispatcher::new(notifier, WatermarkStore::in_memory())
    }

    fn added(events: Vec<RequestRecord>) -> ChangeSet<RequestRecord> {
        ChangeSet {
            added: events,
            changed: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_out_of_order_batch_notifies_ascending() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut dispatcher = dispatcher(notifier.clone());

        let report = dispatcher
            .process(&added(vec![
                request(2, 10, RequestStatus::Pending),
                request(1, 5, RequestStatus::Pending),
            ]))
            .await;

        assert_eq!(report.scheduled, 2);
        assert_eq!(notifier.keys(), vec!["requests:1:pending", "requests:2:pending"]);
        assert_eq!(dispatcher.watermark(), Some(CreatedAt::from_millis(10)));
    }

    #[tokio::test]
    async fn test_older_than_watermark_is_skipped() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut dispatcher = dispatcher(notifier.clone());

        dispatcher.process(&added(vec![request(2, 100, RequestStatus::Pending)])).await;
        let report = dispatcher.process(&added(vec![request(1, 50, RequestStatus::Pending)])).await;

        assert_eq!(report.skipped, 1);
        assert_eq!(notifier.keys(), vec!["requests:2:pending"]);
        assert_eq!(dispatcher.watermark(), Some(CreatedAt::from_millis(100)));
    }

    #[tokio::test]
    async fn test_same_created_at_sibling_still_notifies() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut dispatcher = dispatcher(notifier.clone());

        dispatcher.process(&added(vec![request(1, 100, RequestStatus::Pending)])).await;
        let report = dispatcher
            .process(&added(vec![
                request(1, 100, RequestStatus::Pending),
                request(2, 100, RequestStatus::Pending),
            ]))
            .await;

        assert_eq!(report.scheduled, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(notifier.keys(), vec!["requests:1:pending", "requests:2:pending"]);
    }

    #[tokio::test]
    async fn test_status_change_renotifies_once() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut dispatcher = dispatcher(notifier.clone());
        dispatcher.process(&added(vec![request(7, 100, RequestStatus::Pending)])).await;

        let change = ChangeSet {
            added: Vec::new(),
            changed: vec![StatusChange {
                id: EventId::new(7),
                old: Some(RequestStatus::Pending),
                new: RequestStatus::InProgress,
            }],
        };
        assert_eq!(dispatcher.process(&change).await.scheduled, 1);
        assert_eq!(dispatcher.process(&change).await.scheduled, 0);

        assert_eq!(
            notifier.keys(),
            vec!["requests:7:pending", "requests:7:inProgress"]
        );
        let texts = notifier.scheduled.lock().unwrap();
        assert_eq!(texts[1].title, "Request updated");
        assert_eq!(texts[1].body, "Request 7 is now inProgress");
    }

    #[tokio::test]
    async fn test_changed_only_batch_keeps_watermark() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut dispatcher = dispatcher(notifier);
        dispatcher.process(&added(vec![request(1, 100, RequestStatus::Pending)])).await;

        let known = request(1, 100, RequestStatus::Pending);
        let changes = ChangeDetector::status_changed(Some(&known), known.id, RequestStatus::Completed);
        dispatcher.process(&changes).await;
        assert_eq!(dispatcher.watermark(), Some(CreatedAt::from_millis(100)));
    }

    #[tokio::test]
    async fn test_denied_permission_suppresses_but_advances() {
        let notifier = Arc::new(RecordingNotifier {
            deny: true,
            ..Default::default()
        });
        let mut dispatcher = dispatcher(notifier.clone());

        let first = dispatcher.process(&added(vec![request(1, 100, RequestStatus::Pending)])).await;
        let second = dispatcher.process(&added(vec![request(2, 200, RequestStatus::Pending)])).await;

        assert_eq!(first.suppressed, 1);
        assert_eq!(second.suppressed, 1);
        assert!(notifier.keys().is_empty());
        assert_eq!(dispatcher.watermark(), Some(CreatedAt::from_millis(200)));
        assert!(dispatcher.has_notified(EventId::new(2), RequestStatus::Pending));
        assert_eq!(*notifier.permission_requests.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_schedule_failure_does_not_block_batch() {
        let notifier = Arc::new(RecordingNotifier {
            fail_bodies_containing: Some("T1:".to_string()),
            ..Default::default()
        });
        let mut dispatcher = dispatcher(notifier.clone());

        let report = dispatcher
            .process(&added(vec![
                request(1, 100, RequestStatus::Pending),
                request(2, 200, RequestStatus::Pending),
            ]))
            .await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.scheduled, 1);
        assert_eq!(notifier.keys(), vec!["requests:2:pending"]);
        assert_eq!(dispatcher.watermark(), Some(CreatedAt::from_millis(200)));
    }

    #[tokio::test]
    async fn test_seeded_events_at_watermark_do_not_renotify() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut dispatcher = dispatcher(notifier.clone());
        let cached = vec![request(1, 100, RequestStatus::Pending)];
        dispatcher.seed(&cached);

        let report = dispatcher.process(&added(cached)).await;
        assert_eq!(report.scheduled, 0);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_new_request_text() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut dispatcher = dispatcher(notifier.clone());
        dispatcher.process(&added(vec![request(3, 1, RequestStatus::Pending)])).await;

        let scheduled = notifier.scheduled.lock().unwrap();
        assert_eq!(scheduled[0].title, "New request");
        assert_eq!(scheduled[0].body, "Table T3: Call staff");
    }

    #[tokio::test]
    async fn test_forget_untracked_drops_departed_ids() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut dispatcher = dispatcher(notifier.clone());
        dispatcher
            .process(&added(vec![
                request(1, 100, RequestStatus::Pending),
                request(2, 200, RequestStatus::Pending),
            ]))
            .await;
        dispatcher.mark_notified(EventId::new(2), RequestStatus::Completed);

        let forgotten = dispatcher.forget_untracked(|id| id == EventId::new(2));
        assert_eq!(forgotten, 1);
        assert!(!dispatcher.has_notified(EventId::new(1), RequestStatus::Pending));
        assert!(dispatcher.has_notified(EventId::new(2), RequestStatus::Completed));

        // Older than the watermark, so a departed id does not alert again.
        let report = dispatcher
            .process(&added(vec![request(1, 100, RequestStatus::Pending)]))
            .await;
        assert_eq!(report.skipped, 1);
        assert_eq!(notifier.keys(), vec!["requests:1:pending", "requests:2:pending"]);
    }

    fn batch() -> impl Strategy<Value = (Vec<(u64, i64)>, Vec<u64>)> {
        (
            proptest::collection::vec((0u64..40, 0i64..1_000), 0..8),
            proptest::collection::vec(0u64..40, 0..4),
        )
    }

    proptest! {
        #[test]
        fn prop_watermark_tracks_newest_added(batches in proptest::collection::vec(batch(), 1..12)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let mut dispatcher = dispatcher(Arc::new(RecordingNotifier::default()));

            for (added_events, changed_ids) in batches {
                let before = dispatcher.watermark();
                let newest = added_events.iter().map(|&(_, at)| CreatedAt::from_millis(at)).max();
                let changes = ChangeSet {
                    added: added_events
                        .iter()
                        .map(|&(id, at)| request(id, at, RequestStatus::Pending))
                        .collect(),
                    changed: changed_ids
                        .iter()
                        .map(|&id| StatusChange {
                            id: EventId::new(id),
                            old: Some(RequestStatus::Pending),
                            new: RequestStatus::InProgress,
                        })
                        .collect(),
                };

                runtime.block_on(dispatcher.process(&changes));
                let after = dispatcher.watermark();

                prop_assert!(after >= before);
                prop_assert_eq!(after, before.max(newest));
                if added_events.is_empty() {
                    prop_assert_eq!(after, before);
                }
            }
        }
    }
}
