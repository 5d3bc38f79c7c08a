//! Local state reconciler
//!
//! Every screen reads from here and nothing else writes to it. Entries are
//! kept in a `BTreeMap` keyed by `Reverse((created_at, id))`, so iteration
//! is most-recent-first with a total, stable order even when two events
//! share a creation time.
//!
//! The reconciler processes:
//! - `apply_snapshot` → replace the whole collection
//! - `apply_insert` → add one entry unless its id is already present
//! - `apply_status_change` → patch in place, or buffer until the entry shows up
//!
//! All three are idempotent. Each effective mutation publishes a fresh
//! immutable `LocalView` on a `watch` channel.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};
use types::entity::StreamEntity;
use types::ids::EventId;
use types::time::CreatedAt;

use crate::config::ReconcilerConfig;

type SortKey = Reverse<(CreatedAt, EventId)>;

fn sort_key<E: StreamEntity>(event: &E) -> SortKey {
    Reverse((event.created_at(), event.id()))
}

// ── Read-only view ──────────────────────────────────────────────────

/// Immutable snapshot of a stream's collection, most recent first.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalView<E: StreamEntity> {
    entries: Vec<E>,
    index: HashMap<EventId, usize>,
}

impl<E: StreamEntity> LocalView<E> {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn from_sorted(entries: Vec<E>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(pos, e)| (e.id(), pos))
            .collect();
        Self { entries, index }
    }

    /// All entries ordered by `created_at` descending.
    pub fn entries(&self) -> &[E] {
        &self.entries
    }

    pub fn get(&self, id: EventId) -> Option<&E> {
        self.index.get(&id).map(|&pos| &self.entries[pos])
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries created on the given (UTC) day, most recent first.
    pub fn created_on(&self, date: NaiveDate) -> Vec<&E> {
        self.entries
            .iter()
            .filter(|e| e.created_at().date() == Some(date))
            .collect()
    }

    /// Ids in display order.
    pub fn ids(&self) -> Vec<EventId> {
        self.entries.iter().map(|e| e.id()).collect()
    }
}

impl<E: StreamEntity> Default for LocalView<E> {
    fn default() -> Self {
        Self::empty()
    }
}

// ── Reconciler ──────────────────────────────────────────────────────

/// Result of applying a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The entry was patched.
    Applied,
    /// The entry already had that status.
    Unchanged,
    /// The id is not known yet; the change waits for its entry.
    Buffered,
}

#[derive(Debug, Clone, Copy)]
struct PendingStatus<S> {
    status: S,
    received_at: Instant,
}

/// Sole owner of one stream's local collection.
pub struct LocalStateReconciler<E: StreamEntity> {
    entries: BTreeMap<SortKey, E>,
    /// id → sort key, for O(log n) patching by id.
    index: HashMap<EventId, SortKey>,
    /// Status changes that arrived before their entry.
    pending: HashMap<EventId, PendingStatus<E::Status>>,
    config: ReconcilerConfig,
    view_tx: watch::Sender<Arc<LocalView<E>>>,
}

impl<E: StreamEntity> LocalStateReconciler<E> {
    pub fn new(config: ReconcilerConfig) -> Self {
        let (view_tx, _) = watch::channel(Arc::new(LocalView::empty()));
        Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            pending: HashMap::new(),
            config,
            view_tx,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ReconcilerConfig::default())
    }

    /// Replace the whole collection.
    ///
    /// Duplicate ids collapse to their first occurrence. The snapshot is newer
    /// than any buffered status change, so buffered changes for ids it
    /// contains are dropped.
    /// Returns whether the collection changed.
    pub fn apply_snapshot(&mut self, entities: Vec<E>) -> bool {
        let mut entries = BTreeMap::new();
        let mut index = HashMap::with_capacity(entities.len());
        let mut duplicates = 0usize;

        for event in entities {
            if index.contains_key(&event.id()) {
                duplicates += 1;
                continue;
            }
            if self.pending.remove(&event.id()).is_some() {
                debug!(stream = %E::KIND, event_id = %event.id(), "Snapshot supersedes buffered status");
            }
            let key = sort_key(&event);
            index.insert(event.id(), key);
            entries.insert(key, event);
        }

        if duplicates > 0 {
            warn!(stream = %E::KIND, duplicates, "Snapshot contained duplicate ids");
        }

        let changed = entries != self.entries;
        self.entries = entries;
        self.index = index;
        debug!(stream = %E::KIND, entries = self.entries.len(), changed, "Snapshot applied");
        if changed {
            self.publish();
        }
        changed
    }

    /// Insert one entry at its sorted position.
    ///
    /// A known id is a no-op: both transports may deliver the same insert.
    pub fn apply_insert(&mut self, mut event: E) -> bool {
        if self.index.contains_key(&event.id()) {
            debug!(stream = %E::KIND, event_id = %event.id(), "Insert of known id ignored");
            return false;
        }
        if let Some(pending) = self.pending.remove(&event.id()) {
            debug!(
                stream = %E::KIND,
                event_id = %event.id(),
                status = %pending.status,
                "Applying buffered status to inserted entry"
            );
            event.set_status(pending.status);
        }

        let key = sort_key(&event);
        self.index.insert(event.id(), key);
        self.entries.insert(key, event);
        self.publish();
        true
    }

    /// Patch the status of an entry in place.
    pub fn apply_status_change(&mut self, id: EventId, status: E::Status) -> StatusOutcome {
        let Some(key) = self.index.get(&id).copied() else {
            debug!(stream = %E::KIND, event_id = %id, %status, "Buffering status for unknown id");
            self.pending.insert(
                id,
                PendingStatus {
                    status,
                    received_at: Instant::now(),
                },
            );
            return StatusOutcome::Buffered;
        };

        let Some(entry) = self.entries.get_mut(&key) else {
            return StatusOutcome::Unchanged;
        };
        if entry.status() == status {
            return StatusOutcome::Unchanged;
        }
        entry.set_status(status);
        self.publish();
        StatusOutcome::Applied
    }

    /// Drop buffered status changes older than the configured bound.
    ///
    /// Returns the number of dropped changes.
    pub fn prune_expired(&mut self) -> usize {
        let now = Instant::now();
        let ttl = self.config.pending_status_ttl;
        let before = self.pending.len();

        self.pending.retain(|id, pending| {
            let keep = now.saturating_duration_since(pending.received_at) < ttl;
            if !keep {
                warn!(
                    stream = %E::KIND,
                    event_id = %id,
                    status = %pending.status,
                    "Inconsistency: status change for unknown id dropped"
                );
            }
            keep
        });

        before - self.pending.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `id` is in the collection or has a buffered status change.
    pub fn tracks(&self, id: EventId) -> bool {
        self.index.contains_key(&id) || self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: EventId) -> Option<&E> {
        self.index.get(&id).and_then(|key| self.entries.get(key))
    }

    /// Current published view.
    pub fn view(&self) -> Arc<LocalView<E>> {
        self.view_tx.borrow().clone()
    }

    /// A receiver that observes every published view.
    pub fn subscribe(&self) -> watch::Receiver<Arc<LocalView<E>>> {
        self.view_tx.subscribe()
    }

    fn publish(&self) {
        let entries: Vec<E> = self.entries.values().cloned().collect();
        self.view_tx.send_replace(Arc::new(LocalView::from_sorted(entries)));
    }
}
