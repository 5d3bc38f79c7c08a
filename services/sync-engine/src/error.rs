//! Error taxonomy for the sync engine
//!
//! Every failure the engine can meet falls in one of five classes, and the
//! class decides the handling:
//! - `Transport` → retried (backoff on the push channel, next tick on poll)
//! - `Auth` → terminal for the stream, never retried
//! - `MalformedPayload` → the offending event is dropped, the batch goes on
//! - `NotificationScheduling` → logged, reconciliation is unaffected
//! - `CacheIo` → logged, the in-memory watermark keeps working

use thiserror::Error;
use types::errors::PayloadError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] PayloadError),

    #[error("Notification scheduling failed: {0}")]
    NotificationScheduling(String),

    #[error("Cache I/O error: {0}")]
    CacheIo(String),
}

impl SyncError {
    /// Whether the error ends the stream instead of being retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }

    /// Short class label for structured logs.
    pub fn class(&self) -> &'static str {
        match self {
            SyncError::Transport(_) => "transport",
            SyncError::Auth(_) => "auth",
            SyncError::MalformedPayload(_) => "malformed_payload",
            SyncError::NotificationScheduling(_) => "notification",
            SyncError::CacheIo(_) => "cache_io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_auth_is_terminal() {
        assert!(SyncError::Auth("401".to_string()).is_terminal());
        assert!(!SyncError::Transport("reset".to_string()).is_terminal());
        assert!(!SyncError::CacheIo("disk full".to_string()).is_terminal());
    }

    #[test]
    fn test_payload_error_conversion() {
        let err: SyncError = PayloadError::UnknownTarget("Foo".to_string()).into();
        assert_eq!(err.class(), "malformed_payload");
        assert_eq!(err.to_string(), "Malformed payload: Unknown message target: Foo");
    }
}
