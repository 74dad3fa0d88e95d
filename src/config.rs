//! Application configuration, loaded from an optional JSON file.
//!
//! Every section has defaults, so an empty object (or no file at all) is a
//! valid configuration. Command line flags override the file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LogError, Result};
use crate::logs::data::{Server, ServerId, ServerSettings};
use crate::web::WebConfig;

/// Log collection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// How often each server log is polled
    pub poll_interval_ms: u64,
    /// Read existing log content on startup instead of only new lines
    pub read_from_start: bool,
    /// Re-open resolved errors when they occur again
    pub reopen_on_recurrence: bool,
    /// Where error records are snapshotted; in-memory only when unset
    pub store_path: Option<PathBuf>,
    pub snapshot_interval_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: crate::DEFAULT_POLL_INTERVAL_MS,
            read_from_start: false,
            reopen_on_recurrence: false,
            store_path: None,
            snapshot_interval_secs: 60,
        }
    }
}

impl CollectorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }
}

/// Notification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Public panel URL used in links
    pub base_url: String,
    pub app_name: String,
    pub database_enabled: bool,
    pub mail_enabled: bool,
    /// Delivery attempts per channel
    pub max_attempts: u32,
    /// Delay before the first retry, doubled each time
    pub retry_backoff_ms: u64,
    /// Where stored notifications are snapshotted; in-memory only when unset
    pub notifications_path: Option<PathBuf>,
    /// Stored notifications kept, oldest dropped first
    pub max_notifications: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            app_name: "Luawatch".to_string(),
            database_enabled: true,
            mail_enabled: true,
            max_attempts: 3,
            retry_backoff_ms: 500,
            notifications_path: None,
            max_notifications: crate::DEFAULT_MAX_NOTIFICATIONS,
        }
    }
}

/// File log sink settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for daily log files; console only when unset
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
    pub retention_days: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            file_prefix: "luawatch".to_string(),
            retention_days: crate::DEFAULT_LOG_RETENTION_DAYS,
        }
    }
}

/// One game server entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub id: u32,
    pub name: String,
    pub owner_id: String,
    #[serde(default)]
    pub owner_email: Option<String>,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub collection_enabled: bool,
    #[serde(default = "default_true")]
    pub control_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl From<&ServerConfig> for Server {
    fn from(config: &ServerConfig) -> Self {
        Server {
            id: ServerId(config.id),
            name: config.name.clone(),
            owner_id: config.owner_id.clone(),
            owner_email: config.owner_email.clone(),
            log_path: config.log_path.clone(),
            settings: ServerSettings {
                collection_enabled: config.collection_enabled,
                control_enabled: config.control_enabled,
            },
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub web: WebConfig,
    pub collector: CollectorConfig,
    pub notifier: NotifierConfig,
    pub logging: LoggingConfig,
    pub servers: Vec<ServerConfig>,
}

impl AppConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LogError::config_error(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from JSON text.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| LogError::config_error(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.collector.poll_interval_ms == 0 {
            return Err(LogError::config_error("collector.poll_interval_ms must be positive"));
        }
        if self.collector.snapshot_interval_secs == 0 {
            return Err(LogError::config_error(
                "collector.snapshot_interval_secs must be positive",
            ));
        }
        if self.logging.retention_days == 0 {
            return Err(LogError::config_error("logging.retention_days must be positive"));
        }
        if self.notifier.max_attempts == 0 {
            return Err(LogError::config_error("notifier.max_attempts must be positive"));
        }
        if self.notifier.max_notifications == 0 {
            return Err(LogError::config_error("notifier.max_notifications must be positive"));
        }

        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.id) {
                return Err(LogError::config_error(format!(
                    "duplicate server id {}",
                    server.id
                )));
            }
            if server.owner_id.is_empty() {
                return Err(LogError::config_error(format!(
                    "server {} has no owner_id",
                    server.id
                )));
            }
        }
        Ok(())
    }

    /// Servers described by the configuration.
    pub fn servers(&self) -> Vec<Server> {
        self.servers.iter().map(Server::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config.collector.poll_interval_ms, crate::DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.logging.retention_days, 14);
        assert_eq!(config.notifier.max_attempts, 3);
        assert_eq!(config.notifier.max_notifications, 1000);
        assert!(config.notifier.notifications_path.is_none());
        assert!(config.servers.is_empty());
    }

    #[test]
    fn test_server_entries() {
        let config = AppConfig::from_json(
            r#"{
                "servers": [
                    {"id": 1, "name": "DarkRP", "owner_id": "42", "log_path": "/srv/1/console.log"},
                    {"id": 2, "name": "TTT", "owner_id": "43", "control_enabled": false}
                ]
            }"#,
        )
        .unwrap();

        let servers = config.servers();
        assert_eq!(servers.len(), 2);
        assert!(servers[0].settings.collection_enabled);
        assert_eq!(servers[0].log_path, Some(PathBuf::from("/srv/1/console.log")));
        assert!(!servers[1].settings.control_enabled);
    }

    #[test]
    fn test_duplicate_server_ids_rejected() {
        let err = AppConfig::from_json(
            r#"{"servers": [
                {"id": 1, "name": "a", "owner_id": "x"},
                {"id": 1, "name": "b", "owner_id": "y"}
            ]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate server id 1"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(AppConfig::from_json(r#"{"collector": {"poll_interval_ms": 0}}"#).is_err());
        assert!(AppConfig::from_json(r#"{"notifier": {"max_notifications": 0}}"#).is_err());
    }
}
