//! Typed hub messages
//!
//! The push channel delivers invocations addressed by a target name with a
//! list of JSON arguments. `HubMessage` turns those into one variant per
//! (stream, message kind) pair, each carrying its own typed payload.
//! `Inbound` is the per-stream form the engine consumes:
//! `Snapshot | Inserted | StatusChanged`.
//!
//! Snapshot elements are decoded one by one: a malformed element is
//! rejected on its own and the rest of the snapshot survives.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::StreamEntity;
use crate::errors::PayloadError;
use crate::ids::EventId;
use crate::order::{OrderDetailRecord, OrderStatus};
use crate::request::{RequestRecord, RequestStatus};
use crate::stream::StreamKind;

/// Hub target names
pub mod targets {
    pub const LOAD_CURRENT_REQUEST: &str = "LoadCurrentRequest";
    pub const RECEIVE_NEW_REQUEST: &str = "ReceiveNewRequest";
    pub const UPDATE_REQUEST_STATUS: &str = "UpdateRequestStatus";
    pub const LOAD_CURRENT_ORDERS: &str = "LoadCurrentOrders";
    pub const RECEIVE_NEW_ORDER: &str = "ReceiveNewOrder";
    pub const UPDATE_ORDER_DETAIL_STATUS: &str = "UpdateOrderDetailStatus";
}

/// Status transition pushed by the backend
///
/// The backend may send the whole updated record; only `id` and `status`
/// are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate<S> {
    pub id: EventId,
    pub status: S,
}

/// One decoded hub invocation
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    LoadCurrentRequest(Vec<RequestRecord>),
    ReceiveNewRequest(RequestRecord),
    UpdateRequestStatus(StatusUpdate<RequestStatus>),
    LoadCurrentOrders(Vec<OrderDetailRecord>),
    ReceiveNewOrder(OrderDetailRecord),
    UpdateOrderDetailStatus(StatusUpdate<OrderStatus>),
}

/// A decoded message plus the snapshot elements that had to be dropped
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub message: HubMessage,
    pub rejected: Vec<PayloadError>,
}

impl HubMessage {
    /// Decode an invocation by target name.
    pub fn decode(target: &str, arguments: &[Value]) -> Result<Decoded, PayloadError> {
        let first = arguments
            .first()
            .cloned()
            .ok_or_else(|| PayloadError::MissingArgument {
                target: target.to_string(),
            })?;

        let mut rejected = Vec::new();
        let message = match target {
            targets::LOAD_CURRENT_REQUEST => {
                let (records, dropped) = decode_collection(target, first)?;
                rejected = dropped;
                HubMessage::LoadCurrentRequest(records)
            }
            targets::RECEIVE_NEW_REQUEST => HubMessage::ReceiveNewRequest(decode_one(target, first)?),
            targets::UPDATE_REQUEST_STATUS => {
                HubMessage::UpdateRequestStatus(decode_one(target, first)?)
            }
            targets::LOAD_CURRENT_ORDERS => {
                let (records, dropped) = decode_collection(target, first)?;
                rejected = dropped;
                HubMessage::LoadCurrentOrders(records)
            }
            targets::RECEIVE_NEW_ORDER => HubMessage::ReceiveNewOrder(decode_one(target, first)?),
            targets::UPDATE_ORDER_DETAIL_STATUS => {
                HubMessage::UpdateOrderDetailStatus(decode_one(target, first)?)
            }
            other => return Err(PayloadError::UnknownTarget(other.to_string())),
        };

        Ok(Decoded { message, rejected })
    }

    /// Stream this message belongs to.
    pub fn stream(&self) -> StreamKind {
        match self {
            HubMessage::LoadCurrentRequest(_)
            | HubMessage::ReceiveNewRequest(_)
            | HubMessage::UpdateRequestStatus(_) => StreamKind::Request,
            HubMessage::LoadCurrentOrders(_)
            | HubMessage::ReceiveNewOrder(_)
            | HubMessage::UpdateOrderDetailStatus(_) => StreamKind::Order,
        }
    }

    /// Target name for logging.
    pub fn target(&self) -> &'static str {
        match self {
            HubMessage::LoadCurrentRequest(_) => targets::LOAD_CURRENT_REQUEST,
            HubMessage::ReceiveNewRequest(_) => targets::RECEIVE_NEW_REQUEST,
            HubMessage::UpdateRequestStatus(_) => targets::UPDATE_REQUEST_STATUS,
            HubMessage::LoadCurrentOrders(_) => targets::LOAD_CURRENT_ORDERS,
            HubMessage::ReceiveNewOrder(_) => targets::RECEIVE_NEW_ORDER,
            HubMessage::UpdateOrderDetailStatus(_) => targets::UPDATE_ORDER_DETAIL_STATUS,
        }
    }
}

/// Per-stream inbound message consumed by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound<E: StreamEntity> {
    /// Full listing of all live entities
    Snapshot(Vec<E>),
    /// A single new entity
    Inserted(E),
    /// A status transition of an existing entity
    StatusChanged { id: EventId, status: E::Status },
}

impl<E: StreamEntity> Inbound<E> {
    pub fn kind_label(&self) -> &'static str {
        match self {
            Inbound::Snapshot(_) => "snapshot",
            Inbound::Inserted(_) => "inserted",
            Inbound::StatusChanged { .. } => "status_changed",
        }
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(self, Inbound::Snapshot(_))
    }
}

fn decode_one<T: DeserializeOwned>(target: &str, value: Value) -> Result<T, PayloadError> {
    serde_json::from_value(value).map_err(|e| PayloadError::Malformed {
        kind: target.to_string(),
        reason: e.to_string(),
    })
}

fn decode_collection<T: DeserializeOwned>(
    target: &str,
    value: Value,
) -> Result<(Vec<T>, Vec<PayloadError>), PayloadError> {
    match value {
        Value::Array(items) => Ok(decode_lenient(target, items)),
        other => Err(PayloadError::Malformed {
            kind: target.to_string(),
            reason: format!("expected an array, got {}", json_type(&other)),
        }),
    }
}

/// Decode each element independently, collecting failures instead of
/// failing the whole collection.
pub fn decode_lenient<T: DeserializeOwned>(
    kind: &str,
    items: Vec<Value>,
) -> (Vec<T>, Vec<PayloadError>) {
    let mut decoded = Vec::with_capacity(items.len());
    let mut rejected = Vec::new();
    for item in items {
        match serde_json::from_value(item) {
            Ok(value) => decoded.push(value),
            Err(e) => rejected.push(PayloadError::Malformed {
                kind: kind.to_string(),
                reason: e.to_string(),
            }),
        }
    }
    (decoded, rejected)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_order_snapshot_drops_malformed_elements() {
        let args = vec![json!([
            {"id": 1, "tableName": "A1", "dishName": "Pho", "quantity": 1, "status": "pending", "createdAt": 100},
            {"id": 2, "tableName": "A2"},
            {"id": 3, "status": "cooking", "createdAt": 300}
        ])];
        let decoded = HubMessage::decode("LoadCurrentOrders", &args).unwrap();
        match decoded.message {
            HubMessage::LoadCurrentOrders(records) => {
                let ids: Vec<u64> = records.iter().map(|r| r.id.get()).collect();
                assert_eq!(ids, vec![1, 3]);
            }
            other => panic!("Expected LoadCurrentOrders, got {:?}", other),
        }
        assert_eq!(decoded.rejected.len(), 1);
    }

    #[test]
    fn test_decode_status_update_ignores_extra_fields() {
        let args = vec![json!({"id": 7, "status": "completed", "tableName": "B1"})];
        let decoded = HubMessage::decode("UpdateRequestStatus", &args).unwrap();
        assert_eq!(
            decoded.message,
            HubMessage::UpdateRequestStatus(StatusUpdate {
                id: EventId::new(7),
                status: RequestStatus::Completed,
            })
        );
        assert_eq!(decoded.message.stream(), StreamKind::Request);
    }

    #[test]
    fn test_decode_unknown_target() {
        let err = HubMessage::decode("ReceiveMenu", &[json!({})]).unwrap_err();
        assert_eq!(err, PayloadError::UnknownTarget("ReceiveMenu".to_string()));
    }

    #[test]
    fn test_decode_missing_argument() {
        let err = HubMessage::decode("ReceiveNewOrder", &[]).unwrap_err();
        assert!(matches!(err, PayloadError::MissingArgument { .. }));
    }

    #[test]
    fn test_decode_snapshot_not_an_array() {
        let err = HubMessage::decode("LoadCurrentRequest", &[json!({"id": 1})]).unwrap_err();
        match err {
            PayloadError::Malformed { kind, reason } => {
                assert_eq!(kind, "LoadCurrentRequest");
                assert!(reason.contains("an object"));
            }
            err => panic!("Expected Malformed, got {:?}", err),
        }
    }

    #[test]
    fn test_from_hub_narrows_to_stream() {
        let args = vec![json!({"id": 5, "status": "pending", "createdAt": 10})];
        let decoded = HubMessage::decode("ReceiveNewRequest", &args).unwrap();

        assert!(OrderDetailRecord::from_hub(decoded.message.clone()).is_none());
        match RequestRecord::from_hub(decoded.message) {
            Some(Inbound::Inserted(record)) => assert_eq!(record.id, EventId::new(5)),
            other => panic!("Expected Inserted, got {:?}", other),
        }
    }
}
