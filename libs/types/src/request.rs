//! Customer table requests
//!
//! A request is raised from a table (call staff, ask for the bill, ...) and
//! walks through `pending → inProgress → completed`, or gets cancelled.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entity::{NotificationText, StreamEntity};
use crate::ids::{EventId, OrderId};
use crate::message::{HubMessage, Inbound};
use crate::stream::StreamKind;
use crate::time::CreatedAt;

/// Request status as sent by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestStatus {
    /// Raised, nobody picked it up yet
    Pending,
    /// A staff member is handling it
    InProgress,
    /// Handled (terminal)
    Completed,
    /// Withdrawn (terminal)
    Cancelled,
}

impl RequestStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::InProgress => "inProgress",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One customer request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub id: EventId,
    #[serde(default)]
    pub order_id: Option<OrderId>,
    #[serde(default)]
    pub table_name: Option<String>,
    /// Request type label ("Call staff", "Bill", ...)
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    pub status: RequestStatus,
    pub created_at: CreatedAt,
}

impl StreamEntity for RequestRecord {
    type Status = RequestStatus;

    const KIND: StreamKind = StreamKind::Request;

    fn id(&self) -> EventId {
        self.id
    }

    fn created_at(&self) -> CreatedAt {
        self.created_at
    }

    fn status(&self) -> RequestStatus {
        self.status
    }

    fn set_status(&mut self, status: RequestStatus) {
        self.status = status;
    }

    fn describe_new(&self) -> NotificationText {
        NotificationText::new(
            "New request",
            format!(
                "Table {}: {}",
                self.table_name.as_deref().unwrap_or("?"),
                self.type_name.as_deref().unwrap_or("request"),
            ),
        )
    }

    fn describe_status(id: EventId, status: RequestStatus) -> NotificationText {
        NotificationText::new("Request updated", format!("Request {} is now {}", id, status))
    }

    fn from_hub(message: HubMessage) -> Option<Inbound<Self>> {
        match message {
            HubMessage::LoadCurrentRequest(records) => Some(Inbound::Snapshot(records)),
            HubMessage::ReceiveNewRequest(record) => Some(Inbound::Inserted(record)),
            HubMessage::UpdateRequestStatus(update) => Some(Inbound::StatusChanged {
                id: update.id,
                status: update.status,
            }),
            _ => None,
        }
    }
}
