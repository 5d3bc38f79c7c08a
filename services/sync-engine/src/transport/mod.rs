//! Concrete transports behind the engine's seams
//!
//! - `signalr`: hub wire protocol codec
//! - `websocket`: `PushTransport` over WebSocket
//! - `http`: `SnapshotFetcher` and status-transition client over REST

pub mod http;
pub mod signalr;
pub mod websocket;

pub use http::{ApiClient, FetchError};
pub use websocket::WebSocketTransport;
