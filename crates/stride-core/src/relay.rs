use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use stride_db::DbPool;
use stride_models::gateway::{
    EVENT_MESSAGE_RECEIVED, EVENT_MESSAGE_STATUS, EVENT_READ_RECEIPT, EVENT_USER_TYPING,
};
use stride_models::message::{DeliveryStatus, MessageEnvelope};
use stride_models::presence::Identity;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::CoreError;
use crate::escalation::EscalationScheduler;
use crate::events::EventBus;
use crate::presence::PresenceRegistry;
use crate::rooms::RoomManager;

/// How long the relay remembers where an envelope went, for routing late
/// read receipts. Matches the escalation window; anything older can no
/// longer transition.
const INFLIGHT_TTL: Duration = Duration::from_secs(15 * 60);

struct InFlightMessage {
    room_id: Option<i64>,
    sender_id: i64,
    stamped_at: Instant,
}

/// Stamps envelopes and fans them out: room broadcast for conversation
/// messages, targeted dispatch plus escalation scheduling for direct sends.
pub struct MessageRelay {
    presence: Arc<PresenceRegistry>,
    rooms: Arc<RoomManager>,
    bus: EventBus,
    escalations: Arc<EscalationScheduler>,
    /// Envelope routing info for in-flight status transitions only.
    inflight: DashMap<Uuid, InFlightMessage>,
}

impl MessageRelay {
    pub fn new(
        presence: Arc<PresenceRegistry>,
        rooms: Arc<RoomManager>,
        bus: EventBus,
        escalations: Arc<EscalationScheduler>,
    ) -> Self {
        Self {
            presence,
            rooms,
            bus,
            escalations,
            inflight: DashMap::new(),
        }
    }

    fn sender_identity(&self, session_id: Uuid) -> Result<Identity, CoreError> {
        self.presence
            .identity_of_session(session_id)
            .ok_or(CoreError::Unauthenticated)
    }

    fn stamp(&self, sender: &Identity, room_id: Option<i64>, payload: serde_json::Value) -> MessageEnvelope {
        let envelope = MessageEnvelope {
            id: Uuid::new_v4(),
            room_id,
            sender_id: sender.user_id,
            sender_name: sender.display_name.clone(),
            sender_contact: sender.contact.clone(),
            payload,
            timestamp: Utc::now(),
            status: DeliveryStatus::Sent,
        };
        self.prune_inflight();
        self.inflight.insert(
            envelope.id,
            InFlightMessage {
                room_id,
                sender_id: sender.user_id,
                stamped_at: Instant::now(),
            },
        );
        envelope
    }

    fn prune_inflight(&self) {
        self.inflight
            .retain(|_, v| v.stamped_at.elapsed() < INFLIGHT_TTL);
    }

    /// Fan a message out to every other session in a room. The sender never
    /// receives its own echo; the caller acknowledges the sender directly.
    pub fn relay(
        &self,
        sender_session: Uuid,
        room_id: i64,
        payload: serde_json::Value,
    ) -> Result<MessageEnvelope, CoreError> {
        let sender = self.sender_identity(sender_session)?;
        let envelope = self.stamp(&sender, Some(room_id), payload);
        self.bus.dispatch_to_room(
            EVENT_MESSAGE_RECEIVED,
            serde_json::to_value(&envelope).map_err(|e| CoreError::Internal(e.to_string()))?,
            room_id,
            Some(sender_session),
        );
        tracing::debug!(message_id = %envelope.id, room_id, sender = sender.user_id, "message relayed to room");
        Ok(envelope)
    }

    /// Deliver a message to one recipient identity. Succeeds for the "sent"
    /// leg even when the recipient is offline; every direct send schedules
    /// an escalation which only a delivery ack cancels.
    pub async fn relay_direct(
        &self,
        pool: &DbPool,
        sender_session: Uuid,
        recipient_id: i64,
        payload: serde_json::Value,
    ) -> Result<(MessageEnvelope, bool), CoreError> {
        let sender = self.sender_identity(sender_session)?;
        let recipient = stride_db::users::get_user_by_id(pool, recipient_id)
            .await?
            .ok_or(CoreError::NotFound)?;

        let envelope = self.stamp(&sender, None, payload);
        let live = self.presence.is_online(recipient_id);
        if live {
            self.bus.dispatch_to_users(
                EVENT_MESSAGE_RECEIVED,
                serde_json::to_value(&envelope)
                    .map_err(|e| CoreError::Internal(e.to_string()))?,
                vec![recipient_id],
            );
        }

        self.escalations.schedule(
            envelope.id,
            sender.user_id,
            &sender.contact,
            &recipient.email,
            envelope.timestamp,
        );
        tracing::debug!(
            message_id = %envelope.id,
            recipient = recipient_id,
            live,
            "direct message relayed, escalation scheduled"
        );
        Ok((envelope, live))
    }

    /// Delivery ack from the recipient: cancels the pending escalation and
    /// tells the sender's live sessions. Unknown or already-resolved ids are
    /// benign no-ops. The inflight routing entry stays: a later viewed ack
    /// still needs it to route the read receipt.
    pub fn acknowledge_delivered(&self, message_id: Uuid) {
        let Some(escalation) = self.escalations.acknowledge_delivered(message_id) else {
            return;
        };
        self.bus.dispatch_to_users(
            EVENT_MESSAGE_STATUS,
            json!({
                "message_id": message_id,
                "status": DeliveryStatus::Delivered,
            }),
            vec![escalation.sender_id],
        );
    }

    /// Read receipts for a batch of messages. Viewing implies delivery, so
    /// each id also cancels its escalation if one is still pending.
    pub fn acknowledge_viewed(&self, viewer_session: Uuid, message_ids: &[Uuid]) {
        let Ok(viewer) = self.sender_identity(viewer_session) else {
            return;
        };
        let viewed_at = Utc::now();
        for &message_id in message_ids {
            let sender_id = match self.escalations.acknowledge_delivered(message_id) {
                Some(escalation) => Some(escalation.sender_id),
                None => None,
            };
            let inflight = self.inflight.remove(&message_id).map(|(_, v)| v);

            let receipt = json!({
                "message_id": message_id,
                "viewer_id": viewer.user_id,
                "viewer_name": viewer.display_name,
                "viewed_at": viewed_at,
            });
            match inflight.as_ref().and_then(|m| m.room_id) {
                Some(room_id) => {
                    self.bus.dispatch_to_room(
                        EVENT_READ_RECEIPT,
                        receipt,
                        room_id,
                        Some(viewer_session),
                    );
                }
                None => {
                    if let Some(sender_id) =
                        sender_id.or(inflight.as_ref().map(|m| m.sender_id))
                    {
                        self.bus
                            .dispatch_to_users(EVENT_READ_RECEIPT, receipt, vec![sender_id]);
                    }
                }
            }

            // Tell the sender the message reached its recipient.
            if let Some(sender_id) = sender_id {
                self.bus.dispatch_to_users(
                    EVENT_MESSAGE_STATUS,
                    json!({
                        "message_id": message_id,
                        "status": DeliveryStatus::Delivered,
                    }),
                    vec![sender_id],
                );
            }
        }
    }

    /// Transient typing indicator fan-out; nothing is retained.
    pub fn set_typing(&self, session_id: Uuid, room_id: i64, is_typing: bool) {
        let Ok(identity) = self.sender_identity(session_id) else {
            return;
        };
        if !self.rooms.is_member(session_id, room_id) {
            return;
        }
        self.bus.dispatch_to_room(
            EVENT_USER_TYPING,
            json!({
                "user_id": identity.user_id,
                "user_name": identity.display_name,
                "room_id": room_id,
                "is_typing": is_typing,
            }),
            room_id,
            Some(session_id),
        );
    }
}
