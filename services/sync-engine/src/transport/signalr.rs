//! Hub wire protocol (JSON flavour)
//!
//! Framing rules:
//! - every record is a JSON object terminated by the record separator `0x1E`
//! - one transport message may carry several records, or end mid-record
//! - the client opens with `{"protocol":"json","version":1}␞`; the server
//!   answers `{}␞` or `{"error":"..."}␞`
//!
//! Record types used here:
//! - `1` invocation: `{"type":1,"target":"ReceiveNewOrder","arguments":[...]}`
//! - `6` ping (both directions, keep-alive)
//! - `7` close: `{"type":7,"error":"..."}`
//!
//! Other record types (completions, stream items) are surfaced as
//! `HubFrame::Other` and ignored by the session.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Record terminator.
pub const RECORD_SEPARATOR: char = '\u{1e}';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("Invalid hub record: {0}")]
    InvalidRecord(String),

    #[error("Record carries no type")]
    MissingType,
}

/// One parsed hub record.
#[derive(Debug, Clone, PartialEq)]
pub enum HubFrame {
    Invocation { target: String, arguments: Vec<Value> },
    Ping,
    Close { error: Option<String> },
    Other(u8),
}

/// Handshake request, separator included.
pub fn handshake_request() -> String {
    format!(r#"{{"protocol":"json","version":1}}{}"#, RECORD_SEPARATOR)
}

/// Keep-alive ping record, separator included.
pub fn ping_record() -> String {
    format!(r#"{{"type":6}}{}"#, RECORD_SEPARATOR)
}

#[derive(Deserialize)]
struct HandshakeResponse {
    #[serde(default)]
    error: Option<String>,
}

/// Check the server's handshake answer (one record, without separator).
pub fn parse_handshake_response(record: &str) -> Result<(), ProtocolError> {
    let response: HandshakeResponse = serde_json::from_str(record)
        .map_err(|e| ProtocolError::InvalidRecord(e.to_string()))?;
    match response.error {
        Some(error) => Err(ProtocolError::HandshakeRejected(error)),
        None => Ok(()),
    }
}

#[derive(Deserialize)]
struct RawRecord {
    #[serde(rename = "type")]
    kind: Option<u8>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Parse one record (without separator).
pub fn parse_record(record: &str) -> Result<HubFrame, ProtocolError> {
    let raw: RawRecord =
        serde_json::from_str(record).map_err(|e| ProtocolError::InvalidRecord(e.to_string()))?;

    match raw.kind.ok_or(ProtocolError::MissingType)? {
        1 => {
            let target = raw
                .target
                .ok_or_else(|| ProtocolError::InvalidRecord("invocation without target".to_string()))?;
            Ok(HubFrame::Invocation {
                target,
                arguments: raw.arguments,
            })
        }
        6 => Ok(HubFrame::Ping),
        7 => Ok(HubFrame::Close { error: raw.error }),
        other => Ok(HubFrame::Other(other)),
    }
}

/// Accumulates transport text and yields complete records.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    partial: String,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `text` and drain every record it completes.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.partial.push_str(text);
        let Some(last) = self.partial.rfind(RECORD_SEPARATOR) else {
            return Vec::new();
        };

        let rest = self.partial.split_off(last + RECORD_SEPARATOR.len_utf8());
        let complete = std::mem::replace(&mut self.partial, rest);
        complete
            .split(RECORD_SEPARATOR)
            .filter(|record| !record.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }
}
