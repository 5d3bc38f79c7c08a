//! Creation timestamps
//!
//! `CreatedAt` is the source of truth for ordering and deduplication. It is
//! stored as Unix milliseconds; on the wire the backend may send either an
//! integer or a date-time string, so deserialization accepts:
//! - epoch milliseconds (`1708123456789`)
//! - `YYYY-MM-DD HH:mm:ss[.fff]` (naive, read as UTC)
//! - `YYYY-MM-DDTHH:mm:ss[.fff]` (naive, read as UTC)
//! - RFC 3339 with an offset
//!
//! Serialization always emits the integer form.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::errors::PayloadError;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Creation time of an event, in Unix milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CreatedAt(i64);

impl CreatedAt {
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// Parse any of the accepted string forms.
    pub fn parse(s: &str) -> Result<Self, PayloadError> {
        let s = s.trim();
        if let Ok(millis) = s.parse::<i64>() {
            return Ok(Self(millis));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self::from_datetime(dt.with_timezone(&Utc)));
        }
        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                return Ok(Self::from_datetime(naive.and_utc()));
            }
        }
        Err(PayloadError::InvalidTimestamp(s.to_string()))
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }

    /// Calendar day (UTC) this event was created on.
    pub fn date(&self) -> Option<NaiveDate> {
        self.to_datetime().map(|dt| dt.date_naive())
    }
}

impl fmt::Display for CreatedAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            None => write!(f, "{}ms", self.0),
        }
    }
}

struct CreatedAtVisitor;

impl<'de> Visitor<'de> for CreatedAtVisitor {
    type Value = CreatedAt;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("epoch milliseconds or a date-time string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<CreatedAt, E> {
        Ok(CreatedAt(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<CreatedAt, E> {
        i64::try_from(v)
            .map(CreatedAt)
            .map_err(|_| E::custom(format!("timestamp {v} out of range")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<CreatedAt, E> {
        CreatedAt::parse(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for CreatedAt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(CreatedAtVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_space_separated() {
        let ts = CreatedAt::parse("2025-03-01 10:15:30").unwrap();
        assert_eq!(ts.to_string(), "2025-03-01 10:15:30");
    }

    #[test]
    fn test_parse_iso_with_fraction() {
        let whole = CreatedAt::parse("2025-03-01T10:15:30").unwrap();
        let fractional = CreatedAt::parse("2025-03-01T10:15:30.250").unwrap();
        assert_eq!(fractional.as_millis() - whole.as_millis(), 250);
    }

    #[test]
    fn test_parse_rfc3339_offset() {
        let utc = CreatedAt::parse("2025-03-01T03:00:00Z").unwrap();
        let local = CreatedAt::parse("2025-03-01T10:00:00+07:00").unwrap();
        assert_eq!(utc, local);
    }

    #[test]
    fn test_parse_invalid() {
        let err = CreatedAt::parse("yesterday").unwrap_err();
        assert_eq!(err, PayloadError::InvalidTimestamp("yesterday".to_string()));
    }

    #[test]
    fn test_deserialize_number_and_string() {
        let from_number: CreatedAt = serde_json::from_str("1700000000000").unwrap();
        assert_eq!(from_number.as_millis(), 1_700_000_000_000);

        let from_string: CreatedAt = serde_json::from_str("\"2023-11-14 22:13:20\"").unwrap();
        assert_eq!(from_string, from_number);
    }

    #[test]
    fn test_serializes_as_millis() {
        let ts = CreatedAt::from_millis(150);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "150");
    }

    #[test]
    fn test_date() {
        let ts = CreatedAt::parse("2025-03-01 23:59:59").unwrap();
        assert_eq!(ts.date(), NaiveDate::from_ymd_opt(2025, 3, 1));
    }
}
