//! Change detector for previous vs current collections
//!
//! Produces the `{added, changed}` set the dispatcher consumes, independent
//! of which transport delivered the data:
//! - `diff` compares two full snapshots through an id-keyed lookup (O(n))
//! - `inserted` / `status_changed` wrap single push deltas in the same shape
//!
//! Items that disappear from the current collection are never reported;
//! the backend only appends or transitions status.

use std::collections::{HashMap, HashSet};

use types::entity::StreamEntity;
use types::ids::EventId;

/// A status transition found by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange<S> {
    pub id: EventId,
    /// Status before the change; `None` when the id was not known locally.
    pub old: Option<S>,
    pub new: S,
}

/// Normalized detector output.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet<E: StreamEntity> {
    pub added: Vec<E>,
    pub changed: Vec<StatusChange<E::Status>>,
}

impl<E: StreamEntity> ChangeSet<E> {
    pub fn empty() -> Self {
        Self {
            added: Vec::new(),
            changed: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.changed.len()
    }
}

impl<E: StreamEntity> Default for ChangeSet<E> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Stateless diff functions.
pub struct ChangeDetector;

impl ChangeDetector {
    /// Diff two full collections keyed by id.
    ///
    /// Duplicate ids inside `current` are reported once; the first
    /// occurrence wins.
    pub fn diff<E: StreamEntity>(previous: &[E], current: &[E]) -> ChangeSet<E> {
        let lookup: HashMap<EventId, E::Status> =
            previous.iter().map(|e| (e.id(), e.status())).collect();
        let mut seen = HashSet::with_capacity(current.len());
        let mut changes = ChangeSet::empty();

        for event in current {
            if !seen.insert(event.id()) {
                continue;
            }
            match lookup.get(&event.id()) {
                None => changes.added.push(event.clone()),
                Some(&old) if old != event.status() => changes.changed.push(StatusChange {
                    id: event.id(),
                    old: Some(old),
                    new: event.status(),
                }),
                Some(_) => {}
            }
        }

        changes
    }

    /// Change set for a single pushed insert.
    ///
    /// `existing` is the locally known record with the same id, if any; an
    /// already known id is not `added`.
    pub fn inserted<E: StreamEntity>(existing: Option<&E>, event: E) -> ChangeSet<E> {
        let mut changes = ChangeSet::empty();
        if existing.is_none() {
            changes.added.push(event);
        }
        changes
    }

    /// Change set for a single pushed status transition.
    ///
    /// A transition to the status the record already has is not a change.
    pub fn status_changed<E: StreamEntity>(
        existing: Option<&E>,
        id: EventId,
        status: E::Status,
    ) -> ChangeSet<E> {
        let old = existing.map(|e| e.status());
        let mut changes = ChangeSet::empty();
        if old != Some(status) {
            changes.changed.push(StatusChange {
                id,
                old,
                new: status,
            });
        }
        changes
    }
}

/// Stateful differ that remembers the last snapshot it saw.
///
/// Used by the poller, which diffs each fetch against the previous fetch
/// rather than against the reconciled collection.
pub struct SnapshotDiffer<E: StreamEntity> {
    previous: Vec<E>,
}

impl<E: StreamEntity> SnapshotDiffer<E> {
    pub fn new() -> Self {
        Self {
            previous: Vec::new(),
        }
    }

    /// Start from a known collection (e.g. the cached one after a restart).
    pub fn seeded(previous: Vec<E>) -> Self {
        Self { previous }
    }

    /// Diff `current` against the previous snapshot and remember it.
    pub fn observe(&mut self, current: Vec<E>) -> ChangeSet<E> {
        let changes = self.peek(&current);
        self.commit(current);
        changes
    }

    /// Diff without remembering; pair with `commit` once the result is delivered.
    pub fn peek(&self, current: &[E]) -> ChangeSet<E> {
        ChangeDetector::diff(&self.previous, current)
    }

    pub fn commit(&mut self, current: Vec<E>) {
        self.previous = current;
    }

    pub fn previous(&self) -> &[E] {
        &self.previous
    }
}

impl<E: StreamEntity> Default for SnapshotDiffer<E> {
    fn default() -> Self {
        Self::new()
    }
}
