use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// In-flight delivery status of a direct message. Transitions only ever
/// forward: `Sent` -> `Delivered` -> `Viewed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Viewed,
}

/// Server-stamped transport representation of a message. The coordinator
/// owns only the in-flight copy; long-term storage belongs to the
/// relational store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: Uuid,
    /// Conversation this message belongs to; `None` for direct sends.
    pub room_id: Option<i64>,
    pub sender_id: i64,
    pub sender_name: String,
    pub sender_contact: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub status: DeliveryStatus,
}
