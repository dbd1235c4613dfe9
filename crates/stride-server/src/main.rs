use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::routing::get;
use axum::Json;
use chrono::{DateTime, Utc};
use clap::Parser;
use stride_core::escalation::FallbackNotifier;
use stride_core::mailer::{EmailJsNotifier, MailerConfig};
use stride_core::notify::{DbNotificationStore, NotifyError};
use stride_core::{AppState, GatewayConfig};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

/// Stands in for the mailer when no credentials are configured. Escalations
/// still resolve; the fallback leg only lands in the log.
struct LogOnlyNotifier;

#[async_trait]
impl FallbackNotifier for LogOnlyNotifier {
    async fn send_fallback(
        &self,
        sender_contact: &str,
        recipient_contact: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        tracing::warn!(
            sender = sender_contact,
            recipient = recipient_contact,
            %sent_at,
            "mailer disabled, dropping fallback notification"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stride=info,tower_http=debug")),
        )
        .init();

    let args = cli::Args::parse();
    let mut config = config::Config::load(&args.config)?;

    // CLI --bind-address overrides the config file
    if let Some(bind) = args.bind_address {
        config.server.bind_address = bind;
    }

    ensure_data_dir(&config.database.url);

    let db = stride_db::create_pool(&config.database.url, config.database.max_connections).await?;
    stride_db::run_migrations(&db).await?;
    tracing::info!(url = %config.database.url, "database ready");

    let notifier: Arc<dyn FallbackNotifier> = if config.mailer.enabled {
        Arc::new(EmailJsNotifier::new(MailerConfig {
            service_id: config.mailer.service_id.clone(),
            template_id: config.mailer.template_id.clone(),
            public_key: config.mailer.public_key.clone(),
            private_key: config.mailer.private_key.clone(),
            endpoint: config.mailer.endpoint.clone(),
        }))
    } else {
        Arc::new(LogOnlyNotifier)
    };

    let store = Arc::new(DbNotificationStore::new(db.clone()));
    let state = AppState::new(
        db,
        notifier,
        store,
        Duration::from_secs(config.escalation.timeout_secs),
        GatewayConfig {
            heartbeat_interval_ms: config.gateway.heartbeat_interval_ms,
            heartbeat_timeout_ms: config.gateway.heartbeat_timeout_ms,
            identify_timeout_secs: config.gateway.identify_timeout_secs,
            max_global_connections: config.gateway.max_global_connections,
            max_sessions_per_user: config.gateway.max_sessions_per_user,
        },
    );
    let shutdown_notify = state.shutdown.clone();

    let cors = match config
        .server
        .public_url
        .as_deref()
        .and_then(|url| url.parse::<axum::http::HeaderValue>().ok())
    {
        Some(origin) => tower_http::cors::CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
        None => tower_http::cors::CorsLayer::permissive(),
    };

    let app = stride_ws::gateway_router()
        .route("/health", get(health))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(
        bind = %config.server.bind_address,
        escalation_timeout_secs = config.escalation.timeout_secs,
        mailer_enabled = config.mailer.enabled,
        "stride coordinator listening"
    );

    let shutdown_signal = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down (ctrl-c)...");
            }
            _ = shutdown_notify.notified() => {
                tracing::info!("Shutting down (requested)...");
            }
        }
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Ensure the sqlite data directory exists before the pool opens the file.
fn ensure_data_dir(database_url: &str) {
    let Some(path) = database_url
        .strip_prefix("sqlite://")
        .map(|rest| rest.split('?').next().unwrap_or(rest))
    else {
        return;
    };
    if path.starts_with(':') {
        // :memory: has no backing file
        return;
    }
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                tracing::warn!("Could not create data directory {:?}: {}", parent, err);
            }
        }
    }
}
