use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message travelling over the host bus.
///
/// Notes:
/// - `destination` is an endpoint address (e.g. `loopback://local/orders`).
/// - `message_type` routes the payload to consumers; the bus never inspects
///   `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    message_id: Uuid,
    destination: String,
    message_type: String,
    payload: serde_json::Value,
    sent_at: DateTime<Utc>,
}

impl BusMessage {
    pub fn new(
        destination: impl Into<String>,
        message_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            message_id: Uuid::now_v7(),
            destination: destination.into(),
            message_type: message_type.into(),
            payload,
            sent_at: Utc::now(),
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    pub fn into_payload(self) -> serde_json::Value {
        self.payload
    }
}
