//! Stream kinds
//!
//! A stream is one independent category of events with its own watermark,
//! collection and push channel. Each kind knows the backend paths and hub
//! message targets that belong to it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::EventId;
use crate::message::targets;

/// Independent event category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Customer table requests (call waiter, bill, ...)
    Request,
    /// Kitchen order details (one dish line of a customer order)
    Order,
}

impl StreamKind {
    pub const ALL: [StreamKind; 2] = [StreamKind::Request, StreamKind::Order];

    /// Stable label used in logs, cache file names and dedup keys.
    pub fn label(&self) -> &'static str {
        match self {
            StreamKind::Request => "requests",
            StreamKind::Order => "orders",
        }
    }

    /// Hub path of the push channel, relative to the hub base URL.
    pub fn hub_path(&self) -> &'static str {
        match self {
            StreamKind::Request => "hub/requests",
            StreamKind::Order => "hub/order-details",
        }
    }

    /// Collection path for full-snapshot polling, relative to the API base URL.
    pub fn collection_path(&self) -> &'static str {
        match self {
            StreamKind::Request => "requests",
            StreamKind::Order => "orders",
        }
    }

    /// Path accepting a `{status}` patch for one entity.
    pub fn status_path(&self, id: EventId) -> String {
        match self {
            StreamKind::Request => format!("requests/{}", id),
            StreamKind::Order => format!("orders/details/{}", id),
        }
    }

    /// Hub target carrying the full snapshot sent right after connecting.
    pub fn snapshot_target(&self) -> &'static str {
        match self {
            StreamKind::Request => targets::LOAD_CURRENT_REQUEST,
            StreamKind::Order => targets::LOAD_CURRENT_ORDERS,
        }
    }

    pub fn insert_target(&self) -> &'static str {
        match self {
            StreamKind::Request => targets::RECEIVE_NEW_REQUEST,
            StreamKind::Order => targets::RECEIVE_NEW_ORDER,
        }
    }

    pub fn status_target(&self) -> &'static str {
        match self {
            StreamKind::Request => targets::UPDATE_REQUEST_STATUS,
            StreamKind::Order => targets::UPDATE_ORDER_DETAIL_STATUS,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for StreamKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "request" | "requests" => Ok(StreamKind::Request),
            "order" | "orders" | "order-details" => Ok(StreamKind::Order),
            other => Err(format!("unknown stream kind: {other}")),
        }
    }
}
