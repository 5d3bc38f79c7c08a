//! Kitchen order details
//!
//! The kitchen works on order *details*: one dish line of a customer order,
//! each with its own status.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entity::{NotificationText, StreamEntity};
use crate::ids::{EventId, OrderId};
use crate::message::{HubMessage, Inbound};
use crate::stream::StreamKind;
use crate::time::CreatedAt;

/// Order detail status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    /// Placed by the customer
    Pending,
    /// Accepted by staff
    Confirmed,
    /// Being prepared
    Cooking,
    /// Brought to the table
    Served,
    /// Paid and closed (terminal)
    Completed,
    /// Cancelled (terminal)
    Cancelled,
}

impl OrderStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Cooking => "cooking",
            OrderStatus::Served => "served",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dish line of a customer order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetailRecord {
    pub id: EventId,
    #[serde(default)]
    pub order_id: Option<OrderId>,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub dish_name: Option<String>,
    #[serde(default)]
    pub dish_image: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    /// Unit price in VND
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub note: Option<String>,
    pub status: OrderStatus,
    pub created_at: CreatedAt,
}

fn default_quantity() -> u32 {
    1
}

impl OrderDetailRecord {
    /// Line total (price × quantity), when the price is known.
    pub fn line_total(&self) -> Option<Decimal> {
        self.price.map(|price| price * Decimal::from(self.quantity))
    }
}

impl StreamEntity for OrderDetailRecord {
    type Status = OrderStatus;

    const KIND: StreamKind = StreamKind::Order;

    fn id(&self) -> EventId {
        self.id
    }

    fn created_at(&self) -> CreatedAt {
        self.created_at
    }

    fn status(&self) -> OrderStatus {
        self.status
    }

    fn set_status(&mut self, status: OrderStatus) {
        self.status = status;
    }

    fn describe_new(&self) -> NotificationText {
        NotificationText::new(
            "New order",
            format!(
                "Table {}: {} x{}",
                self.table_name.as_deref().unwrap_or("?"),
                self.dish_name.as_deref().unwrap_or("dish"),
                self.quantity,
            ),
        )
    }

    fn describe_status(id: EventId, status: OrderStatus) -> NotificationText {
        NotificationText::new("Order updated", format!("Order {} is now {}", id, status))
    }

    fn from_hub(message: HubMessage) -> Option<Inbound<Self>> {
        match message {
            HubMessage::LoadCurrentOrders(records) => Some(Inbound::Snapshot(records)),
            HubMessage::ReceiveNewOrder(record) => Some(Inbound::Inserted(record)),
            HubMessage::UpdateOrderDetailStatus(update) => Some(Inbound::StatusChanged {
                id: update.id,
                status: update.status,
            }),
            _ => None,
        }
    }
}
