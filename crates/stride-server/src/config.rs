use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayTuning,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub mailer: MailerSettings,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Public URL of this server (e.g., https://coach.example.com).
    /// Used for CORS auto-configuration.
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".into(),
            public_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// sqlite:// or postgres:// URL; the engine is detected from the scheme.
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/stride.db?mode=rwc".into(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GatewayTuning {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_identify_timeout_secs")]
    pub identify_timeout_secs: u64,
    #[serde(default = "default_max_global_connections")]
    pub max_global_connections: usize,
    #[serde(default = "default_max_sessions_per_user")]
    pub max_sessions_per_user: usize,
}

impl Default for GatewayTuning {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            identify_timeout_secs: default_identify_timeout_secs(),
            max_global_connections: default_max_global_connections(),
            max_sessions_per_user: default_max_sessions_per_user(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EscalationConfig {
    /// Seconds an unacknowledged direct message waits before the fallback
    /// notifier fires.
    #[serde(default = "default_escalation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_escalation_timeout_secs(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct MailerSettings {
    /// Disabled until credentials are filled in; escalations are logged
    /// instead of mailed while disabled.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub template_id: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub private_key: String,
    /// Override for self-hosted EmailJS-compatible relays.
    pub endpoint: Option<String>,
}

fn default_max_connections() -> u32 {
    20
}

fn default_heartbeat_interval_ms() -> u64 {
    41_250
}

fn default_heartbeat_timeout_ms() -> u64 {
    90_000
}

fn default_identify_timeout_secs() -> u64 {
    30
}

fn default_max_global_connections() -> usize {
    2_000
}

fn default_max_sessions_per_user() -> usize {
    5
}

fn default_escalation_timeout_secs() -> u64 {
    15 * 60
}

// ── Config Loading ───────────────────────────────────────────────────────────

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!(
                "Config file not found at '{}', generating defaults...",
                path
            );
            let config = Config::default();

            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, toml::to_string_pretty(&config)?)?;
            tracing::info!("Generated default config at '{}'", path);
            config
        };

        // Environment variable overrides
        if let Ok(value) = std::env::var("STRIDE_BIND_ADDRESS") {
            config.server.bind_address = value;
        }
        if let Ok(value) = std::env::var("STRIDE_PUBLIC_URL") {
            config.server.public_url = Some(value);
        }
        if let Ok(value) = std::env::var("STRIDE_DATABASE_URL") {
            config.database.url = value;
        }
        if let Ok(value) = std::env::var("STRIDE_DATABASE_MAX_CONNECTIONS") {
            if let Ok(parsed) = value.parse::<u32>() {
                config.database.max_connections = parsed;
            }
        }
        if let Ok(value) = std::env::var("STRIDE_ESCALATION_TIMEOUT_SECS") {
            if let Ok(parsed) = value.parse::<u64>() {
                config.escalation.timeout_secs = parsed;
            }
        }
        if let Ok(value) = std::env::var("STRIDE_MAILER_ENABLED") {
            if let Ok(parsed) = value.parse::<bool>() {
                config.mailer.enabled = parsed;
            }
        }
        if let Ok(value) = std::env::var("STRIDE_MAILER_SERVICE_ID") {
            config.mailer.service_id = value;
        }
        if let Ok(value) = std::env::var("STRIDE_MAILER_TEMPLATE_ID") {
            config.mailer.template_id = value;
        }
        if let Ok(value) = std::env::var("STRIDE_MAILER_PUBLIC_KEY") {
            config.mailer.public_key = value;
        }
        if let Ok(value) = std::env::var("STRIDE_MAILER_PRIVATE_KEY") {
            config.mailer.private_key = value;
        }
        if let Ok(value) = std::env::var("STRIDE_MAILER_ENDPOINT") {
            config.mailer.endpoint = Some(value);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Config::load reads process env, so tests that load a config or set
    // env vars must not interleave.
    static ENV_GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn gateway_defaults_are_sane() {
        let gateway = GatewayTuning::default();
        assert!(gateway.heartbeat_timeout_ms > gateway.heartbeat_interval_ms);
        assert_eq!(gateway.max_sessions_per_user, 5);
    }

    #[test]
    fn escalation_defaults_to_fifteen_minutes() {
        assert_eq!(EscalationConfig::default().timeout_secs, 900);
    }

    #[test]
    fn mailer_is_disabled_by_default() {
        assert!(!MailerSettings::default().enabled);
    }

    #[test]
    fn missing_config_file_generates_defaults() {
        let _guard = ENV_GUARD.lock().unwrap_or_else(|e| e.into_inner());
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("stride-test.toml");
        let config =
            Config::load(config_path.to_str().expect("config path utf8")).expect("load config");
        assert!(config_path.exists());
        assert_eq!(config.database.max_connections, 20);
    }

    #[test]
    fn env_override_takes_precedence() {
        let _guard = ENV_GUARD.lock().unwrap_or_else(|e| e.into_inner());
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("stride-env-test.toml");
        std::env::set_var("STRIDE_ESCALATION_TIMEOUT_SECS", "120");
        let config =
            Config::load(config_path.to_str().expect("config path utf8")).expect("load config");
        std::env::remove_var("STRIDE_ESCALATION_TIMEOUT_SECS");
        assert_eq!(config.escalation.timeout_secs, 120);
    }
}
