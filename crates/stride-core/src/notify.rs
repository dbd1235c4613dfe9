use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use stride_db::notifications::NotificationRow;
use stride_db::{DbError, DbPool};
use stride_models::gateway::{EVENT_NEW_NOTIFICATION, EVENT_UNREAD_COUNT_UPDATE};
use stride_models::notification::NewNotification;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("store error: {0}")]
    Store(#[from] DbError),
    #[error("notifier error: {0}")]
    Notifier(String),
}

/// Narrow interface to the external notification store. The coordinator
/// creates and reads records through this; it never mutates one after
/// creation except by the recipient's own mark-read path.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// `None` means the recipient identity is unknown to the store.
    async fn notifications_enabled(&self, user_id: i64) -> Result<Option<bool>, DbError>;
    async fn insert(&self, notification: &NewNotification) -> Result<NotificationRow, DbError>;
    async fn mark_all_read(&self, user_id: i64) -> Result<u64, DbError>;
    async fn list(
        &self,
        user_id: i64,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<NotificationRow>, DbError>;
    async fn unread_count(&self, user_id: i64) -> Result<i64, DbError>;
}

/// SQL-backed store, the production implementation.
pub struct DbNotificationStore {
    pool: DbPool,
}

impl DbNotificationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for DbNotificationStore {
    async fn notifications_enabled(&self, user_id: i64) -> Result<Option<bool>, DbError> {
        let user = stride_db::users::get_user_by_id(&self.pool, user_id).await?;
        Ok(user.map(|u| u.notifications_enabled))
    }

    async fn insert(&self, notification: &NewNotification) -> Result<NotificationRow, DbError> {
        stride_db::notifications::insert_notification(&self.pool, notification).await
    }

    async fn mark_all_read(&self, user_id: i64) -> Result<u64, DbError> {
        stride_db::notifications::mark_all_read(&self.pool, user_id).await
    }

    async fn list(
        &self,
        user_id: i64,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<NotificationRow>, DbError> {
        stride_db::notifications::get_notifications(&self.pool, user_id, unread_only, limit).await
    }

    async fn unread_count(&self, user_id: i64) -> Result<i64, DbError> {
        stride_db::notifications::get_unread_count(&self.pool, user_id).await
    }
}

/// Store-then-notify fan-out. Persistence is the correctness requirement;
/// the live push to the recipient's sessions is a latency optimization.
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    bus: crate::events::EventBus,
}

impl NotificationService {
    pub fn new(store: Arc<dyn NotificationStore>, bus: crate::events::EventBus) -> Self {
        Self { store, bus }
    }

    /// Persist first; only a durably stored record is pushed live. Returns
    /// `Ok(None)` when the recipient is unknown or has notifications
    /// disabled. A failed push still reports success: the record exists and
    /// is visible on the next fetch.
    pub async fn create_and_push(
        &self,
        notification: NewNotification,
    ) -> Result<Option<NotificationRow>, NotifyError> {
        match self.store.notifications_enabled(notification.user_id).await? {
            None => {
                tracing::warn!(user_id = notification.user_id, "recipient unknown, skipping notification");
                return Ok(None);
            }
            Some(false) => {
                tracing::debug!(user_id = notification.user_id, "notifications disabled, skipping");
                return Ok(None);
            }
            Some(true) => {}
        }

        let record = self.store.insert(&notification).await?;

        let payload = json!({
            "id": record.id,
            "user_id": record.user_id,
            "kind": record.kind,
            "title": record.title,
            "body": record.body,
            "data": record.data,
            "priority": record.priority,
            "created_at": record.created_at,
        });
        self.bus
            .dispatch_to_users(EVENT_NEW_NOTIFICATION, payload, vec![record.user_id]);
        tracing::debug!(id = record.id, user_id = record.user_id, "notification stored and pushed");
        Ok(Some(record))
    }

    /// Fire-and-forget hint telling one participant's sessions to refresh
    /// their unread counter. Carries identifiers only; the store remains the
    /// source of truth for counts.
    pub fn emit_unread_count_update(&self, room_id: i64, participant_id: i64) {
        self.bus.dispatch_to_users(
            EVENT_UNREAD_COUNT_UPDATE,
            json!({ "room_id": room_id, "participant_id": participant_id }),
            vec![participant_id],
        );
    }

    pub async fn mark_all_read(&self, user_id: i64) -> Result<u64, NotifyError> {
        Ok(self.store.mark_all_read(user_id).await?)
    }

    pub async fn list(
        &self,
        user_id: i64,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<NotificationRow>, NotifyError> {
        Ok(self.store.list(user_id, unread_only, limit).await?)
    }

    pub async fn unread_count(&self, user_id: i64) -> Result<i64, NotifyError> {
        Ok(self.store.unread_count(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockStore {
        enabled: Option<bool>,
        fail_insert: bool,
        inserts: AtomicUsize,
    }

    impl MockStore {
        fn new(enabled: Option<bool>, fail_insert: bool) -> Arc<Self> {
            Arc::new(Self {
                enabled,
                fail_insert,
                inserts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl NotificationStore for MockStore {
        async fn notifications_enabled(&self, _user_id: i64) -> Result<Option<bool>, DbError> {
            Ok(self.enabled)
        }

        async fn insert(&self, n: &NewNotification) -> Result<NotificationRow, DbError> {
            if self.fail_insert {
                return Err(DbError::Sqlx(sqlx::Error::PoolClosed));
            }
            self.inserts.fetch_add(1, Ordering::SeqCst);
            Ok(NotificationRow {
                id: 1,
                user_id: n.user_id,
                kind: n.kind.as_str().to_string(),
                title: n.title.clone(),
                body: n.body.clone(),
                data: n.data.clone(),
                priority: n.priority.as_str().to_string(),
                read: false,
                created_at: Utc::now(),
            })
        }

        async fn mark_all_read(&self, _user_id: i64) -> Result<u64, DbError> {
            Ok(0)
        }

        async fn list(
            &self,
            _user_id: i64,
            _unread_only: bool,
            _limit: i64,
        ) -> Result<Vec<NotificationRow>, DbError> {
            Ok(Vec::new())
        }

        async fn unread_count(&self, _user_id: i64) -> Result<i64, DbError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn persisted_record_is_pushed_live() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let service = NotificationService::new(MockStore::new(Some(true), false), bus);

        let record = service
            .create_and_push(NewNotification::daily_checkin(42, 7, "Robin"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.user_id, 42);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, EVENT_NEW_NOTIFICATION);
        assert_eq!(event.target_user_ids, Some(vec![42]));
    }

    #[tokio::test]
    async fn failed_persistence_makes_no_push_attempt() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let service = NotificationService::new(MockStore::new(Some(true), true), bus);

        let result = service
            .create_and_push(NewNotification::daily_checkin(42, 7, "Robin"))
            .await;
        assert!(matches!(result, Err(NotifyError::Store(_))));
        assert!(rx.try_recv().is_err(), "no live push for unstored data");
    }

    #[tokio::test]
    async fn disabled_recipient_skips_store_and_push() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let store = MockStore::new(Some(false), false);
        let service = NotificationService::new(store.clone(), bus);

        let result = service
            .create_and_push(NewNotification::daily_checkin(42, 7, "Robin"))
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(store.inserts.load(Ordering::SeqCst), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn push_without_live_sessions_still_succeeds() {
        // No subscriber on the bus: the live push goes nowhere, but the call
        // reports success because the record is durable.
        let service =
            NotificationService::new(MockStore::new(Some(true), false), EventBus::default());
        let record = service
            .create_and_push(NewNotification::goal_achieved(1, 2, "Ash", "5k run"))
            .await
            .unwrap();
        assert!(record.is_some());
    }

    #[tokio::test]
    async fn unread_hint_targets_one_participant() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let service = NotificationService::new(MockStore::new(Some(true), false), bus);

        service.emit_unread_count_update(10, 3);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, EVENT_UNREAD_COUNT_UPDATE);
        assert_eq!(event.payload["room_id"], 10);
        assert_eq!(event.target_user_ids, Some(vec![3]));
    }
}
