//! `AutarchConfig`: layered configuration (defaults -> TOML file -> env),
//! following the teacher's `CoreConfig::load()` pattern
//! (`pagi-core/src/shared.rs`).

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls_cert: Option<String>,
    #[serde(default)]
    pub tls_key: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    7667
}

impl ControlPlaneConfig {
    /// TLS is enabled iff both a cert and a key are configured (spec §6).
    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetacognitiveConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_learning_cooldown_seconds")]
    pub learning_cooldown_seconds: u64,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_confidence_threshold() -> f64 {
    0.60
}
fn default_learning_cooldown_seconds() -> u64 {
    300
}
fn default_min_samples() -> usize {
    10
}
fn default_history_window() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesConfig {
    #[serde(default = "default_heartbeat_timeout_seconds")]
    pub heartbeat_timeout_seconds: u64,
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,
    #[serde(default = "default_replay_window_seconds")]
    pub replay_window_seconds: u64,
    #[serde(default = "default_reputation_up")]
    pub reputation_up: f64,
    #[serde(default = "default_reputation_down")]
    pub reputation_down: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_registration_max_failures")]
    pub registration_max_failures: u32,
    #[serde(default = "default_registration_backoff_seconds")]
    pub registration_backoff_seconds: i64,
}

fn default_heartbeat_timeout_seconds() -> u64 {
    90
}
fn default_heartbeat_interval_seconds() -> u64 {
    30
}
fn default_replay_window_seconds() -> u64 {
    300
}
fn default_reputation_up() -> f64 {
    0.02
}
fn default_reputation_down() -> f64 {
    0.05
}
fn default_max_retries() -> u32 {
    2
}
fn default_registration_max_failures() -> u32 {
    5
}
fn default_registration_backoff_seconds() -> i64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_backup_interval_seconds")]
    pub backup_interval_seconds: u64,
    #[serde(default = "default_backup_retention")]
    pub backup_retention: usize,
}

fn default_database_path() -> String {
    "./data/autarch_store".to_string()
}
fn default_backup_interval_seconds() -> u64 {
    3600
}
fn default_backup_retention() -> usize {
    24
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_subscriber_queue_size")]
    pub subscriber_queue_size: usize,
}

fn default_buffer_size() -> usize {
    1000
}
fn default_subscriber_queue_size() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentConfig {
    /// Tool invoked for unmatched intents (spec §9 open question — resolved
    /// in DESIGN.md). Configurable so operators are not locked into the choice.
    #[serde(default = "default_default_tool")]
    pub default_tool: String,
}

fn default_default_tool() -> String {
    "echo".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls_cert: None,
            tls_key: None,
        }
    }
}
impl Default for MetacognitiveConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            learning_cooldown_seconds: default_learning_cooldown_seconds(),
            min_samples: default_min_samples(),
            history_window: default_history_window(),
        }
    }
}
impl Default for NodesConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_seconds: default_heartbeat_timeout_seconds(),
            heartbeat_interval_seconds: default_heartbeat_interval_seconds(),
            replay_window_seconds: default_replay_window_seconds(),
            reputation_up: default_reputation_up(),
            reputation_down: default_reputation_down(),
            max_retries: default_max_retries(),
            registration_max_failures: default_registration_max_failures(),
            registration_backoff_seconds: default_registration_backoff_seconds(),
        }
    }
}
impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            backup_interval_seconds: default_backup_interval_seconds(),
            backup_retention: default_backup_retention(),
        }
    }
}
impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            subscriber_queue_size: default_subscriber_queue_size(),
        }
    }
}
impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            default_tool: default_default_tool(),
        }
    }
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Top-level configuration object. Recognized by `AutarchConfig::load()`
/// (layered: programmatic defaults -> optional TOML file -> `AUTARCH__` env
/// overrides, double-underscore separated for nesting).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutarchConfig {
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
    #[serde(default)]
    pub metacognitive: MetacognitiveConfig,
    #[serde(default)]
    pub nodes: NodesConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub intent: IntentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AutarchConfig {
    /// Load config from file and environment. Precedence: env `AUTARCH_CONFIG`
    /// path > `config/autarch.toml` > built-in defaults; environment variables
    /// under the `AUTARCH__` prefix override everything (e.g.
    /// `AUTARCH__NODES__MAX_RETRIES=5`).
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("AUTARCH_CONFIG").unwrap_or_else(|_| "config/autarch".to_string());

        let defaults = AutarchConfig::default();
        let defaults_json = serde_json::to_value(&defaults)
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = config::Config::builder();
        builder = Self::seed_defaults(builder, &defaults_json)?;

        let path = Path::new(&config_path);
        if path.exists() || Path::new(&format!("{config_path}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(&config_path).required(false));
        }

        let built = builder
            .add_source(config::Environment::with_prefix("AUTARCH").separator("__"))
            .build()?;

        built.try_deserialize()
    }

    fn seed_defaults(
        mut builder: config::ConfigBuilder<config::builder::DefaultState>,
        defaults: &serde_json::Value,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        // Flatten the serialized defaults into dotted keys the `config` crate understands.
        fn walk(
            prefix: &str,
            value: &serde_json::Value,
            out: &mut Vec<(String, config::Value)>,
        ) {
            match value {
                serde_json::Value::Object(map) => {
                    for (k, v) in map {
                        let key = if prefix.is_empty() {
                            k.clone()
                        } else {
                            format!("{prefix}.{k}")
                        };
                        walk(&key, v, out);
                    }
                }
                serde_json::Value::String(s) => out.push((prefix.to_string(), s.clone().into())),
                serde_json::Value::Bool(b) => out.push((prefix.to_string(), (*b).into())),
                serde_json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        out.push((prefix.to_string(), i.into()));
                    } else if let Some(f) = n.as_f64() {
                        out.push((prefix.to_string(), f.into()));
                    }
                }
                _ => {}
            }
        }
        let mut flat = Vec::new();
        walk("", defaults, &mut flat);
        for (key, value) in flat {
            builder = builder.set_default(&key, value)?;
        }
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = AutarchConfig::default();
        assert_eq!(cfg.metacognitive.confidence_threshold, 0.60);
        assert_eq!(cfg.metacognitive.learning_cooldown_seconds, 300);
        assert_eq!(cfg.nodes.heartbeat_timeout_seconds, 90);
        assert_eq!(cfg.nodes.max_retries, 2);
        assert_eq!(cfg.persistence.backup_retention, 24);
        assert_eq!(cfg.events.buffer_size, 1000);
        assert_eq!(cfg.intent.default_tool, "echo");
    }

    #[test]
    fn control_plane_tls_enabled_requires_both() {
        let mut cp = ControlPlaneConfig::default();
        assert!(!cp.tls_enabled());
        cp.tls_cert = Some("cert.pem".into());
        assert!(!cp.tls_enabled());
        cp.tls_key = Some("key.pem".into());
        assert!(cp.tls_enabled());
    }
}
