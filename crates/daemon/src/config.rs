// Daemon configuration.
//
// Sources, lowest precedence first:
//   built-in defaults → `~/.wikidoc/config.toml` (or `--config`) → WIKIDOC_* env vars
// CLI flags are applied on top by `main`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::content::DEFAULT_HISTORY_RETENTION;
use crate::lock::DEFAULT_LEASE_SECS;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7410";
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Root directory for wikidoc state: `~/.wikidoc/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".wikidoc"))
}

/// Path to the config file: `~/.wikidoc/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

/// Path to the database when none is configured: `~/.wikidoc/meta.db`.
pub fn default_db_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("meta.db"))
}

// ── Config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// HTTP listen address.
    pub listen_addr: SocketAddr,
    /// SQLite database file. Defaults to `~/.wikidoc/meta.db`.
    pub db_path: Option<PathBuf>,
    /// `tracing` filter directive; `RUST_LOG` wins when set.
    pub log_filter: String,
    /// Emit logs as JSON lines.
    pub log_json: bool,
    pub history: HistoryConfig,
    pub locks: LocksConfig,
    pub events: EventsConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 7410)),
            db_path: None,
            log_filter: "info".into(),
            log_json: false,
            history: HistoryConfig::default(),
            locks: LocksConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HistoryConfig {
    /// Snapshots kept per page.
    pub retention: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { retention: DEFAULT_HISTORY_RETENTION }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LocksConfig {
    pub lease_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self { lease_secs: DEFAULT_LEASE_SECS, sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct EventsConfig {
    pub sink: EventSink,
}

/// Where page events go.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventSink {
    /// In-process subscribers only.
    #[default]
    Broadcast,
    /// Durable `event_outbox` table, drained over HTTP.
    Outbox,
    None,
}

impl EventSink {
    fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "broadcast" => Some(Self::Broadcast),
            "outbox" => Some(Self::Outbox),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

impl DaemonConfig {
    /// Load the file at `path`, or the default config file when `path` is
    /// `None`. A missing default file yields defaults; a missing explicit
    /// file is an error. Environment overrides are applied afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::load_from(path)?,
            None => match default_config_path() {
                Some(default) if default.exists() => Self::load_from(&default)?,
                _ => Self::default(),
            },
        };
        base.with_env_fn(|key| std::env::var(key))
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Apply `WIKIDOC_*` overrides through an environment lookup function.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `WIKIDOC_LISTEN_ADDR` | `listen_addr` |
    /// | `WIKIDOC_DB_PATH` | `db_path` |
    /// | `WIKIDOC_LOG_FILTER` | `log_filter` |
    /// | `WIKIDOC_HISTORY_RETENTION` | `history.retention` |
    /// | `WIKIDOC_LOCK_LEASE_SECS` | `locks.lease_secs` |
    /// | `WIKIDOC_LOCK_SWEEP_INTERVAL_SECS` | `locks.sweep_interval_secs` |
    /// | `WIKIDOC_EVENT_SINK` | `events.sink` |
    pub fn with_env_fn<F>(mut self, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        if let Ok(value) = env("WIKIDOC_LISTEN_ADDR") {
            self.listen_addr = parse_env("WIKIDOC_LISTEN_ADDR", &value)?;
        }
        if let Ok(value) = env("WIKIDOC_DB_PATH") {
            self.db_path = Some(PathBuf::from(value));
        }
        if let Ok(value) = env("WIKIDOC_LOG_FILTER") {
            self.log_filter = value;
        }
        if let Ok(value) = env("WIKIDOC_HISTORY_RETENTION") {
            self.history.retention = parse_env("WIKIDOC_HISTORY_RETENTION", &value)?;
        }
        if let Ok(value) = env("WIKIDOC_LOCK_LEASE_SECS") {
            self.locks.lease_secs = parse_env("WIKIDOC_LOCK_LEASE_SECS", &value)?;
        }
        if let Ok(value) = env("WIKIDOC_LOCK_SWEEP_INTERVAL_SECS") {
            self.locks.sweep_interval_secs =
                parse_env("WIKIDOC_LOCK_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Ok(value) = env("WIKIDOC_EVENT_SINK") {
            self.events.sink = EventSink::parse(&value)
                .ok_or_else(|| ConfigError::Env { key: "WIKIDOC_EVENT_SINK", value })?;
        }
        Ok(self)
    }

    /// Configured database path, falling back to `~/.wikidoc/meta.db`.
    pub fn resolved_db_path(&self) -> Result<PathBuf, ConfigError> {
        self.db_path.clone().or_else(default_db_path).ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine home directory",
            ))
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env { key, value: value.to_string() })
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Env { key: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Env { key, value } => write!(f, "invalid value `{value}` for {key}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| map.get(key).map(|v| v.to_string()).ok_or(std::env::VarError::NotPresent)
    }

    #[test]
    fn defaults() {
        let cfg = DaemonConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), DEFAULT_LISTEN_ADDR);
        assert!(cfg.db_path.is_none());
        assert_eq!(cfg.log_filter, "info");
        assert!(!cfg.log_json);
        assert_eq!(cfg.history.retention, 50);
        assert_eq!(cfg.locks.lease_secs, 300);
        assert_eq!(cfg.locks.sweep_interval_secs, 60);
        assert_eq!(cfg.events.sink, EventSink::Broadcast);
    }

    #[test]
    fn parse_partial_toml_keeps_defaults_for_missing_fields() {
        let toml_str = r#"
listen_addr = "0.0.0.0:9000"
log_json = true

[locks]
lease_secs = 120

[events]
sink = "outbox"
"#;
        let cfg: DaemonConfig = toml::from_str(toml_str).expect("config should parse");
        assert_eq!(cfg.listen_addr.port(), 9000);
        assert!(cfg.log_json);
        assert_eq!(cfg.locks.lease_secs, 120);
        assert_eq!(cfg.locks.sweep_interval_secs, 60);
        assert_eq!(cfg.history.retention, 50);
        assert_eq!(cfg.events.sink, EventSink::Outbox);
    }

    #[test]
    fn load_from_file_round_trips() {
        let dir = TempDir::new().expect("tempdir should be created");
        let path = dir.path().join("config.toml");
        let cfg = DaemonConfig {
            db_path: Some(dir.path().join("meta.db")),
            history: HistoryConfig { retention: 10 },
            events: EventsConfig { sink: EventSink::None },
            ..DaemonConfig::default()
        };
        std::fs::write(&path, toml::to_string_pretty(&cfg).expect("serialize"))
            .expect("config should be written");

        assert_eq!(DaemonConfig::load_from(&path).expect("config should load"), cfg);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = TempDir::new().expect("tempdir should be created");
        let error = DaemonConfig::load_from(&dir.path().join("absent.toml"))
            .expect_err("missing file should fail");
        assert!(matches!(error, ConfigError::Io(_)));
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let dir = TempDir::new().expect("tempdir should be created");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "listen_addr = 42").expect("config should be written");

        let error = DaemonConfig::load_from(&path).expect_err("parse should fail");
        assert!(matches!(error, ConfigError::Parse(_)));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut m = HashMap::new();
        m.insert("WIKIDOC_LISTEN_ADDR", "127.0.0.1:8088");
        m.insert("WIKIDOC_DB_PATH", "/tmp/wiki.db");
        m.insert("WIKIDOC_LOG_FILTER", "wikidoc_daemon=debug");
        m.insert("WIKIDOC_HISTORY_RETENTION", "25");
        m.insert("WIKIDOC_LOCK_LEASE_SECS", "90");
        m.insert("WIKIDOC_LOCK_SWEEP_INTERVAL_SECS", "15");
        m.insert("WIKIDOC_EVENT_SINK", "none");

        let cfg = DaemonConfig::default().with_env_fn(env_from_map(m)).expect("env should apply");
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8088");
        assert_eq!(cfg.db_path, Some(PathBuf::from("/tmp/wiki.db")));
        assert_eq!(cfg.log_filter, "wikidoc_daemon=debug");
        assert_eq!(cfg.history.retention, 25);
        assert_eq!(cfg.locks.lease_secs, 90);
        assert_eq!(cfg.locks.sweep_interval_secs, 15);
        assert_eq!(cfg.events.sink, EventSink::None);
    }

    #[test]
    fn no_env_vars_leaves_config_unchanged() {
        let cfg = DaemonConfig::default()
            .with_env_fn(env_from_map(HashMap::new()))
            .expect("env should apply");
        assert_eq!(cfg, DaemonConfig::default());
    }

    #[test]
    fn malformed_env_value_names_the_variable() {
        let mut m = HashMap::new();
        m.insert("WIKIDOC_LOCK_LEASE_SECS", "five minutes");
        let error = DaemonConfig::default().with_env_fn(env_from_map(m)).expect_err("should fail");
        assert_eq!(error.to_string(), "invalid value `five minutes` for WIKIDOC_LOCK_LEASE_SECS");

        let mut m = HashMap::new();
        m.insert("WIKIDOC_EVENT_SINK", "kafka");
        let error = DaemonConfig::default().with_env_fn(env_from_map(m)).expect_err("should fail");
        assert!(matches!(error, ConfigError::Env { key: "WIKIDOC_EVENT_SINK", .. }));
    }

    #[test]
    fn explicit_db_path_wins_over_default() {
        let cfg = DaemonConfig { db_path: Some(PathBuf::from("/data/meta.db")), ..Default::default() };
        assert_eq!(cfg.resolved_db_path().expect("path"), PathBuf::from("/data/meta.db"));
    }
}
