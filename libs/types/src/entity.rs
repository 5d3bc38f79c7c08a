//! The `StreamEntity` trait
//!
//! Every record type that flows through a stream implements this trait. The
//! sync engine is generic over it, so detection, dispatch and reconciliation
//! work the same for requests and orders while each keeps its own strongly
//! typed payload and status enum.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::hash::Hash;

use crate::ids::EventId;
use crate::message::{HubMessage, Inbound};
use crate::stream::StreamKind;
use crate::time::CreatedAt;

/// User-facing notification text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationText {
    pub title: String,
    pub body: String,
}

impl NotificationText {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

/// A record belonging to one stream
pub trait StreamEntity:
    Clone + fmt::Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Stream-specific status enum
    type Status: Copy
        + Eq
        + Hash
        + fmt::Debug
        + fmt::Display
        + Send
        + Sync
        + Serialize
        + DeserializeOwned
        + 'static;

    /// The stream this record type belongs to
    const KIND: StreamKind;

    fn id(&self) -> EventId;

    fn created_at(&self) -> CreatedAt;

    fn status(&self) -> Self::Status;

    fn set_status(&mut self, status: Self::Status);

    /// Text announcing a newly created record.
    fn describe_new(&self) -> NotificationText;

    /// Text announcing a status transition.
    fn describe_status(id: EventId, status: Self::Status) -> NotificationText;

    /// Narrow a decoded hub message to this stream.
    ///
    /// Returns `None` for messages that belong to the other stream.
    fn from_hub(message: HubMessage) -> Option<Inbound<Self>>;
}
