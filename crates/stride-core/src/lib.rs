pub mod error;
pub mod escalation;
pub mod events;
pub mod mailer;
pub mod notify;
pub mod presence;
pub mod relay;
pub mod rooms;

use std::sync::Arc;
use std::time::Duration;
use stride_db::DbPool;
use tokio::sync::Notify;

use escalation::{EscalationScheduler, FallbackNotifier};
use events::EventBus;
use notify::{NotificationService, NotificationStore};
use presence::PresenceRegistry;
use relay::MessageRelay;
use rooms::RoomManager;

/// Default escalation window for unacknowledged direct messages.
pub const DEFAULT_ESCALATION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Gateway tuning knobs, loaded from the server config.
#[derive(Clone, Copy, Debug)]
pub struct GatewayConfig {
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub identify_timeout_secs: u64,
    pub max_global_connections: usize,
    pub max_sessions_per_user: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 41_250,
            heartbeat_timeout_ms: 90_000,
            identify_timeout_secs: 30,
            max_global_connections: 2_000,
            max_sessions_per_user: 5,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub bus: EventBus,
    pub presence: Arc<PresenceRegistry>,
    pub rooms: Arc<RoomManager>,
    pub relay: Arc<MessageRelay>,
    pub escalations: Arc<EscalationScheduler>,
    pub notifications: Arc<NotificationService>,
    pub config: GatewayConfig,
    pub shutdown: Arc<Notify>,
}

impl AppState {
    /// Wire up the coordinator. The fallback notifier and notification store
    /// are injected so callers never reach into process-wide state.
    pub fn new(
        db: DbPool,
        notifier: Arc<dyn FallbackNotifier>,
        store: Arc<dyn NotificationStore>,
        escalation_timeout: Duration,
        config: GatewayConfig,
    ) -> Self {
        let bus = EventBus::default();
        let presence = Arc::new(PresenceRegistry::new());
        let rooms = Arc::new(RoomManager::new());
        let escalations = Arc::new(EscalationScheduler::new(notifier, escalation_timeout));
        let relay = Arc::new(MessageRelay::new(
            presence.clone(),
            rooms.clone(),
            bus.clone(),
            escalations.clone(),
        ));
        let notifications = Arc::new(NotificationService::new(store, bus.clone()));
        Self {
            db,
            bus,
            presence,
            rooms,
            relay,
            escalations,
            notifications,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }
}
