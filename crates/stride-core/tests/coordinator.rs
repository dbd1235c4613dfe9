use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stride_core::escalation::FallbackNotifier;
use stride_core::notify::{DbNotificationStore, NotifyError};
use stride_core::{AppState, GatewayConfig};
use stride_models::gateway::{EVENT_MESSAGE_RECEIVED, EVENT_MESSAGE_STATUS, EVENT_READ_RECEIPT};
use stride_models::presence::Identity;
use uuid::Uuid;

struct RecordingNotifier {
    fired: AtomicUsize,
    last: Mutex<Option<(String, String, DateTime<Utc>)>>,
}

impl RecordingNotifier {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fired: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }
}

#[async_trait]
impl FallbackNotifier for RecordingNotifier {
    async fn send_fallback(
        &self,
        sender_contact: &str,
        recipient_contact: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        self.fired.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some((
            sender_contact.to_string(),
            recipient_contact.to_string(),
            sent_at,
        ));
        Ok(())
    }
}

async fn test_state(notifier: Arc<RecordingNotifier>) -> AppState {
    let pool = stride_db::create_pool("sqlite::memory:", 1).await.unwrap();
    stride_db::run_migrations_for_engine(&pool, stride_db::DatabaseEngine::Sqlite)
        .await
        .unwrap();
    let store = Arc::new(DbNotificationStore::new(pool.clone()));
    AppState::new(
        pool,
        notifier,
        store,
        Duration::from_secs(900),
        GatewayConfig::default(),
    )
}

fn identity(user_id: i64, name: &str) -> Identity {
    Identity {
        user_id,
        display_name: name.to_string(),
        contact: format!("{}@example.com", name.to_lowercase()),
    }
}

async fn create_user(state: &AppState, user_id: i64, name: &str) {
    stride_db::users::create_user(
        &state.db,
        user_id,
        name,
        &format!("{}@example.com", name.to_lowercase()),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn room_messages_keep_emission_order_and_skip_sender() {
    let state = test_state(RecordingNotifier::new()).await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    state.presence.authenticate(identity(1, "Alice"), alice);
    state.presence.authenticate(identity(2, "Bob"), bob);
    state.rooms.join(alice, 10);
    state.rooms.join(bob, 10);

    let mut rx = state.bus.subscribe();
    let m1 = state.relay.relay(alice, 10, json!({"text": "m1"})).unwrap();
    let m2 = state.relay.relay(bob, 10, json!({"text": "m2"})).unwrap();
    let m3 = state.relay.relay(alice, 10, json!({"text": "m3"})).unwrap();

    for (expected, sender) in [(&m1, alice), (&m2, bob), (&m3, alice)] {
        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, EVENT_MESSAGE_RECEIVED);
        assert_eq!(event.room_id, Some(10));
        assert_eq!(event.exclude_session, Some(sender));
        assert_eq!(event.payload["id"], json!(expected.id));
        assert_eq!(event.payload["payload"]["text"], expected.payload["text"]);
    }
}

#[tokio::test]
async fn relay_from_unauthenticated_session_is_rejected() {
    let state = test_state(RecordingNotifier::new()).await;
    let result = state.relay.relay(Uuid::new_v4(), 10, json!({"text": "hi"}));
    assert!(result.is_err());
}

#[tokio::test]
async fn unacked_direct_message_escalates_exactly_once() {
    let notifier = RecordingNotifier::new();
    let state = test_state(notifier.clone()).await;
    create_user(&state, 2, "Bob").await;

    let alice = Uuid::new_v4();
    state.presence.authenticate(identity(1, "Alice"), alice);

    // Bob is offline: the sent leg still succeeds, no live delivery.
    let (envelope, live) = state
        .relay
        .relay_direct(&state.db, alice, 2, json!({"text": "checking in"}))
        .await
        .unwrap();
    assert!(!live);
    assert!(state.escalations.is_pending(envelope.id));

    // DB setup is done; pause the clock only for the timer-advance phase so
    // the paused-clock auto-advance cannot time out sqlx pool acquires.
    tokio::time::pause();
    tokio::time::sleep(Duration::from_secs(901)).await;
    assert_eq!(notifier.fired.load(Ordering::SeqCst), 1);
    assert!(!state.escalations.is_pending(envelope.id));

    let (sender, recipient, sent_at) = notifier.last.lock().unwrap().clone().unwrap();
    assert_eq!(sender, "alice@example.com");
    assert_eq!(recipient, "bob@example.com");
    assert_eq!(sent_at, envelope.timestamp);

    // A late delivery ack is a no-op: no un-escalation, no double fire.
    state.relay.acknowledge_delivered(envelope.id);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(notifier.fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn delivery_ack_cancels_escalation_and_tells_sender() {
    let notifier = RecordingNotifier::new();
    let state = test_state(notifier.clone()).await;
    create_user(&state, 2, "Bob").await;

    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    state.presence.authenticate(identity(1, "Alice"), alice);
    state.presence.authenticate(identity(2, "Bob"), bob);

    let mut rx = state.bus.subscribe();
    let (envelope, live) = state
        .relay
        .relay_direct(&state.db, alice, 2, json!({"text": "hello"}))
        .await
        .unwrap();
    tokio::time::pause();
    assert!(live);
    // Targeted delivery to Bob only.
    let delivered = rx.try_recv().unwrap();
    assert_eq!(delivered.event_type, EVENT_MESSAGE_RECEIVED);
    assert_eq!(delivered.target_user_ids, Some(vec![2]));

    state.relay.acknowledge_delivered(envelope.id);
    let status = rx.try_recv().unwrap();
    assert_eq!(status.event_type, EVENT_MESSAGE_STATUS);
    assert_eq!(status.target_user_ids, Some(vec![1]));
    assert_eq!(status.payload["status"], "delivered");

    tokio::time::sleep(Duration::from_secs(1000)).await;
    assert_eq!(notifier.fired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn viewing_implies_delivery_and_cancels_escalation() {
    let notifier = RecordingNotifier::new();
    let state = test_state(notifier.clone()).await;
    create_user(&state, 2, "Bob").await;

    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    state.presence.authenticate(identity(1, "Alice"), alice);
    state.presence.authenticate(identity(2, "Bob"), bob);

    let (envelope, _) = state
        .relay
        .relay_direct(&state.db, alice, 2, json!({"text": "hello"}))
        .await
        .unwrap();
    tokio::time::pause();
    assert!(state.escalations.is_pending(envelope.id));

    let mut rx = state.bus.subscribe();
    state.relay.acknowledge_viewed(bob, &[envelope.id]);
    assert!(!state.escalations.is_pending(envelope.id));

    // Read receipt reaches the original sender, then the status update.
    let receipt = rx.try_recv().unwrap();
    assert_eq!(receipt.event_type, EVENT_READ_RECEIPT);
    assert_eq!(receipt.target_user_ids, Some(vec![1]));
    assert_eq!(receipt.payload["viewer_id"], 2);
    let status = rx.try_recv().unwrap();
    assert_eq!(status.event_type, EVENT_MESSAGE_STATUS);
    assert_eq!(status.payload["status"], "delivered");

    tokio::time::sleep(Duration::from_secs(1000)).await;
    assert_eq!(notifier.fired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn read_receipt_still_reaches_sender_after_delivered_ack() {
    let notifier = RecordingNotifier::new();
    let state = test_state(notifier.clone()).await;
    create_user(&state, 2, "Bob").await;

    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    state.presence.authenticate(identity(1, "Alice"), alice);
    state.presence.authenticate(identity(2, "Bob"), bob);

    let (envelope, _) = state
        .relay
        .relay_direct(&state.db, alice, 2, json!({"text": "hello"}))
        .await
        .unwrap();
    tokio::time::pause();

    // Ordinary sequence: delivered first, viewed later.
    state.relay.acknowledge_delivered(envelope.id);
    assert!(!state.escalations.is_pending(envelope.id));

    let mut rx = state.bus.subscribe();
    state.relay.acknowledge_viewed(bob, &[envelope.id]);

    let receipt = rx.try_recv().unwrap();
    assert_eq!(receipt.event_type, EVENT_READ_RECEIPT);
    assert_eq!(receipt.target_user_ids, Some(vec![1]));
    assert_eq!(receipt.payload["message_id"], json!(envelope.id));
    assert_eq!(receipt.payload["viewer_id"], 2);

    tokio::time::sleep(Duration::from_secs(1000)).await;
    assert_eq!(notifier.fired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn typing_indicator_fans_out_to_room_only() {
    let state = test_state(RecordingNotifier::new()).await;
    let alice = Uuid::new_v4();
    state.presence.authenticate(identity(1, "Alice"), alice);
    state.rooms.join(alice, 10);

    let mut rx = state.bus.subscribe();
    state.relay.set_typing(alice, 10, true);
    let event = rx.try_recv().unwrap();
    assert_eq!(event.room_id, Some(10));
    assert_eq!(event.exclude_session, Some(alice));
    assert_eq!(event.payload["is_typing"], true);

    // Typing in a room the session never joined is dropped.
    state.relay.set_typing(alice, 11, true);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn disconnect_cleans_presence_and_rooms() {
    let state = test_state(RecordingNotifier::new()).await;
    let alice = Uuid::new_v4();
    state.presence.authenticate(identity(1, "Alice"), alice);
    state.rooms.join(alice, 10);
    state.rooms.join(alice, 11);

    state.rooms.on_disconnect(alice);
    let (_, offline) = state.presence.remove(alice).unwrap();
    assert!(offline);
    assert!(!state.presence.is_online(1));
    assert!(state.rooms.members_of(10).is_empty());
    assert!(state.rooms.members_of(11).is_empty());
}
