//! Per-stream watermark store
//!
//! Each stream persists one JSON record:
//!
//! ```json
//! { "version": 1, "entities": [...], "lastSeenCreatedAt": 1708123456789 }
//! ```
//!
//! The watermark is monotonically non-decreasing: `advance` keeps the max of
//! the stored value and the candidate. The cached entities let a restarted
//! engine show the last known collection and remember what it already
//! notified about.
//!
//! A missing, unreadable or corrupt record is never fatal: the store logs it
//! and starts empty, accepting a one-time re-notification risk.

use std::fs::{self, File};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use types::entity::StreamEntity;
use types::time::CreatedAt;

use crate::error::SyncError;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unsupported cache version: {0}")]
    UnsupportedVersion(u32),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::CacheIo(err.to_string())
    }
}

// ── Cached record ───────────────────────────────────────────────────

/// Current cache record format version.
pub const CACHE_VERSION: u32 = 1;

fn default_version() -> u32 {
    CACHE_VERSION
}

/// Persisted state of one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedStream<E> {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "Vec::new")]
    pub entities: Vec<E>,
    #[serde(default)]
    pub last_seen_created_at: Option<CreatedAt>,
}

// ── Store ───────────────────────────────────────────────────────────

/// Owner of one stream's persisted watermark.
pub struct WatermarkStore<E: StreamEntity> {
    /// Record location; `None` keeps everything in memory.
    path: Option<PathBuf>,
    watermark: Option<CreatedAt>,
    _entity: PhantomData<E>,
}

impl<E: StreamEntity> WatermarkStore<E> {
    /// A store that persists into `<dir>/<stream>.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let path = dir.as_ref().join(format!("{}.json", E::KIND.label()));
        Self {
            path: Some(path),
            watermark: None,
            _entity: PhantomData,
        }
    }

    /// A store that never touches the disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            watermark: None,
            _entity: PhantomData,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current watermark, `None` when nothing was ever seen.
    pub fn watermark(&self) -> Option<CreatedAt> {
        self.watermark
    }

    /// Move the watermark forward to `candidate` if it is newer.
    ///
    /// Returns the watermark after the call; it never decreases.
    pub fn advance(&mut self, candidate: CreatedAt) -> CreatedAt {
        let next = match self.watermark {
            Some(current) if current >= candidate => current,
            _ => candidate,
        };
        if self.watermark != Some(next) {
            debug!(stream = %E::KIND, watermark = next.as_millis(), "Watermark advanced");
        }
        self.watermark = Some(next);
        next
    }

    /// Load the persisted record and adopt its watermark.
    ///
    /// Failures are logged and yield `None`; the in-memory watermark is only
    /// replaced when the stored one is newer.
    pub fn load(&mut self) -> Option<CachedStream<E>> {
        let path = self.path.clone()?;
        match read_record::<E>(&path) {
            Ok(Some(record)) => {
                if let Some(stored) = record.last_seen_created_at {
                    self.advance(stored);
                }
                info!(
                    stream = %E::KIND,
                    entities = record.entities.len(),
                    watermark = ?record.last_seen_created_at.map(|w| w.as_millis()),
                    "Loaded cached stream state"
                );
                Some(record)
            }
            Ok(None) => {
                debug!(stream = %E::KIND, path = %path.display(), "No cached stream state");
                None
            }
            Err(err) => {
                warn!(
                    stream = %E::KIND,
                    path = %path.display(),
                    error = %err,
                    "Ignoring unreadable stream cache"
                );
                None
            }
        }
    }

    /// Persist the watermark together with the given entities.
    ///
    /// Written atomically: temp file, fsync, rename.
    pub fn save(&self, entities: &[E]) -> Result<(), StoreError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let record = CachedStreamRef {
            version: CACHE_VERSION,
            entities,
            last_seen_created_at: self.watermark,
        };
        let data = serde_json::to_vec(&record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let tmp_path = path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

/// Borrowing twin of `CachedStream` so saving does not clone the collection.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CachedStreamRef<'a, E> {
    version: u32,
    entities: &'a [E],
    last_seen_created_at: Option<CreatedAt>,
}

fn read_record<E: StreamEntity>(path: &Path) -> Result<Option<CachedStream<E>>, StoreError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let record: CachedStream<E> = serde_json::from_slice(&data)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    if record.version > CACHE_VERSION {
        return Err(StoreError::UnsupportedVersion(record.version));
    }
    Ok(Some(record))
}
