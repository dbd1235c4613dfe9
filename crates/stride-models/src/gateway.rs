use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// Client -> Server opcodes
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_EVENT: u8 = 2;

// Server -> Client opcodes
pub const OP_DISPATCH: u8 = 0;
pub const OP_INVALID_SESSION: u8 = 9;
pub const OP_HELLO: u8 = 10;
pub const OP_HEARTBEAT_ACK: u8 = 11;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

/// Closed set of events a client may send over the gateway. Every handler
/// matches this exhaustively; unknown variants fail deserialization instead
/// of silently routing through a string-keyed table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", content = "d", rename_all = "snake_case")]
pub enum ClientEvent {
    Authenticate {
        user_id: i64,
        contact: String,
        display_name: String,
    },
    JoinRoom {
        room_id: i64,
    },
    LeaveRoom {
        room_id: i64,
    },
    SendMessage {
        room_id: i64,
        payload: Value,
    },
    SendDirect {
        recipient_id: i64,
        payload: Value,
    },
    Delivered {
        message_id: Uuid,
    },
    Viewed {
        message_ids: Vec<Uuid>,
    },
    Typing {
        room_id: i64,
        is_typing: bool,
    },
    GetOnlineList,
}

// Dispatch event names (server -> client)
pub const EVENT_ONLINE_USERS: &str = "ONLINE_USERS";
pub const EVENT_MESSAGE_RECEIVED: &str = "MESSAGE_RECEIVED";
pub const EVENT_MESSAGE_SENT_ACK: &str = "MESSAGE_SENT_ACK";
pub const EVENT_MESSAGE_STATUS: &str = "MESSAGE_STATUS";
pub const EVENT_READ_RECEIPT: &str = "READ_RECEIPT";
pub const EVENT_USER_TYPING: &str = "USER_TYPING";
pub const EVENT_NEW_NOTIFICATION: &str = "NEW_NOTIFICATION";
pub const EVENT_UNREAD_COUNT_UPDATE: &str = "UNREAD_COUNT_UPDATE";
