use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::notify::NotifyError;

/// Out-of-band notifier invoked when a direct message is never acknowledged
/// as delivered within the escalation window.
#[async_trait]
pub trait FallbackNotifier: Send + Sync {
    async fn send_fallback(
        &self,
        sender_contact: &str,
        recipient_contact: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), NotifyError>;
}

/// Escalation state for one direct message. Owned exclusively by the
/// scheduler's pending table; removal from that table is the terminal
/// transition (delivered or escalated).
pub struct PendingEscalation {
    pub sender_id: i64,
    pub sender_contact: String,
    pub recipient_contact: String,
    pub sent_at: DateTime<Utc>,
    timer: AbortHandle,
}

/// Guarantees that every scheduled message either gets a delivery ack or
/// triggers exactly one fallback notification, never both, never neither.
///
/// The cancel-vs-fire race is resolved by a single atomic take on the
/// pending table: whichever of {explicit ack, timer fire} removes the entry
/// first wins, and the loser observes it already gone.
pub struct EscalationScheduler {
    pending: Arc<DashMap<Uuid, PendingEscalation>>,
    notifier: Arc<dyn FallbackNotifier>,
    timeout: Duration,
}

impl EscalationScheduler {
    pub fn new(notifier: Arc<dyn FallbackNotifier>, timeout: Duration) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            notifier,
            timeout,
        }
    }

    /// Start the countdown for a direct message. At most one pending entry
    /// exists per message id; re-scheduling a still-pending id keeps the
    /// original countdown.
    pub fn schedule(
        &self,
        message_id: Uuid,
        sender_id: i64,
        sender_contact: &str,
        recipient_contact: &str,
        sent_at: DateTime<Utc>,
    ) -> bool {
        let slot = match self.pending.entry(message_id) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => slot,
        };

        let pending = self.pending.clone();
        let notifier = self.notifier.clone();
        let timeout = self.timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // Atomic take: only the winner of the remove performs the side
            // effect. A concurrent ack that got here first leaves nothing
            // to fire.
            let Some((_, escalation)) = pending.remove(&message_id) else {
                return;
            };
            tracing::info!(
                %message_id,
                recipient = %escalation.recipient_contact,
                "delivery window elapsed, sending fallback notification"
            );
            if let Err(err) = notifier
                .send_fallback(
                    &escalation.sender_contact,
                    &escalation.recipient_contact,
                    escalation.sent_at,
                )
                .await
            {
                // The message stays escalated; the fallback itself is not
                // retried.
                tracing::warn!(%message_id, error = %err, "fallback notification failed");
            }
        });

        slot.insert(PendingEscalation {
            sender_id,
            sender_contact: sender_contact.to_string(),
            recipient_contact: recipient_contact.to_string(),
            sent_at,
            timer: task.abort_handle(),
        });
        true
    }

    /// Cancel the countdown because delivery was acknowledged. Returns the
    /// taken entry, or `None` if the message already escalated or was never
    /// scheduled; the latter is a benign no-op and never un-escalates.
    pub fn acknowledge_delivered(&self, message_id: Uuid) -> Option<PendingEscalation> {
        let (_, escalation) = self.pending.remove(&message_id)?;
        escalation.timer.abort();
        tracing::debug!(%message_id, "escalation cancelled by delivery ack");
        Some(escalation)
    }

    pub fn is_pending(&self, message_id: Uuid) -> bool {
        self.pending.contains_key(&message_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
