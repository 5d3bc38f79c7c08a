//! Staff event synchronization engine
//!
//! Keeps restaurant staff stations in step with the backend's customer
//! requests and kitchen orders, and raises exactly one alert per new event
//! or status transition, however many times and by whichever path the event
//! arrives.
//!
//! # Architecture
//!
//! ```text
//!   Hub (WebSocket)            REST (GET /requests, /orders)
//!        │                              │
//! ┌──────▼────────────┐     ┌───────────▼─────────┐
//! │ ConnectionManager │     │ PollingSynchronizer │
//! └──────┬────────────┘     └───────────┬─────────┘
//!        │      Inbound / PollOutcome   │
//!        └──────────────┬───────────────┘
//!                ┌──────▼───────┐
//!                │ StreamEngine │  ← one serialized loop per stream
//!                └──────┬───────┘
//!     ChangeDetector → NotificationDispatcher → LocalStateReconciler
//!                             │                        │
//!                       WatermarkStore            LocalView (watch)
//! ```
//!
//! Streams (requests, orders) are fully independent engines.

pub mod config;
pub mod connection;
pub mod detector;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod polling;
pub mod reconciler;
pub mod transport;
pub mod watermark;

pub use config::{ConnectionConfig, EngineConfig, PollingConfig, ReconcilerConfig};
pub use connection::{
    ConnectionHandle, ConnectionManager, ConnectionState, ConnectionStatus, EndpointParams,
    PushSession, PushTransport,
};
pub use detector::{ChangeDetector, ChangeSet, StatusChange};
pub use dispatcher::{DispatchReport, Notification, NotificationDispatcher, Notifier, NotifyError, Permission};
pub use engine::{EngineStatus, StreamEngine, StreamEngineBuilder};
pub use error::SyncError;
pub use polling::{PollOutcome, PollingState, PollingSynchronizer, SnapshotFetcher};
pub use reconciler::{LocalStateReconciler, LocalView, StatusOutcome};
pub use watermark::{CachedStream, WatermarkStore};

// Service version
pub const SERVICE_VERSION: &str = "0.1.0";
