use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ServerEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
    /// Room this event is scoped to, if applicable.
    pub room_id: Option<i64>,
    /// When set, only deliver this event to the specified user IDs.
    pub target_user_ids: Option<Vec<i64>>,
    /// Session that originated the event; it never receives its own echo.
    pub exclude_session: Option<Uuid>,
}

/// Broadcast-based event bus for real-time dispatch. Every gateway session
/// subscribes once and filters events against its own scope.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: ServerEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Publish a global event visible to every connected session.
    pub fn dispatch(&self, event_type: &str, payload: serde_json::Value) {
        self.publish(ServerEvent {
            event_type: event_type.to_string(),
            payload,
            room_id: None,
            target_user_ids: None,
            exclude_session: None,
        });
    }

    /// Publish a room-scoped event, optionally skipping the sender session.
    pub fn dispatch_to_room(
        &self,
        event_type: &str,
        payload: serde_json::Value,
        room_id: i64,
        exclude_session: Option<Uuid>,
    ) {
        self.publish(ServerEvent {
            event_type: event_type.to_string(),
            payload,
            room_id: Some(room_id),
            target_user_ids: None,
            exclude_session,
        });
    }

    /// Publish a targeted event delivered only to the specified users.
    pub fn dispatch_to_users(
        &self,
        event_type: &str,
        payload: serde_json::Value,
        target_user_ids: Vec<i64>,
    ) {
        self.publish(ServerEvent {
            event_type: event_type.to_string(),
            payload,
            room_id: None,
            target_user_ids: Some(target_user_ids),
            exclude_session: None,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(4096)
    }
}
