//! Error types for payload decoding
//!
//! A payload error concerns one message or one element; callers drop the
//! offending item and keep processing the rest.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Unknown message target: {0}")]
    UnknownTarget(String),

    #[error("Message {target} carries no argument")]
    MissingArgument { target: String },

    #[error("Malformed {kind} payload: {reason}")]
    Malformed { kind: String, reason: String },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
