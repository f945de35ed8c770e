//! # Engine Configuration
//!
//! Two kinds of settings drive the engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Static Engine Config (EngineConfig)                  │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     BEACON_INTEGRATION_ID=beacon                                       │
//! │     BEACON_DEVICE_WORKERS=4                                            │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/beacon/beacon.toml (Linux)                               │
//! │     ~/Library/Application Support/io.beacon.beacon/beacon.toml (macOS) │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                 Runtime Settings (value store, user editable)           │
//! │                                                                         │
//! │  {integration}.integration.scheduled_data_fetch.{enabled,period}       │
//! │  {integration}.integration.webhook.{enabled,secret_key}                │
//! │                                                                         │
//! │  Read with a prefix lookup, grouped into an object, decoded with serde │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # beacon.toml
//! [integration]
//! id = "beacon"
//!
//! [sync]
//! device_workers = 4
//! device_page_size = 10
//! history_page_size = 100
//! history_lookback_secs = 86400
//!
//! [webhook]
//! freshness_window_secs = 60
//! max_failures = 10
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use beacon_core::keys;
use beacon_core::payload::decode_grouped;

use crate::error::{SyncError, SyncResult};
use crate::ports::ValueStore;

/// Lower bound on concurrent per-device tasks.
pub const MIN_DEVICE_WORKERS: usize = 2;

/// Upper bound on concurrent per-device tasks.
pub const MAX_DEVICE_WORKERS: usize = 4;

// =============================================================================
// Integration Fields
// =============================================================================

/// Field names under `{integration}.integration.`.
pub mod fields {
    pub const SCHEDULED_DATA_FETCH: &str = "scheduled_data_fetch";
    pub const WEBHOOK: &str = "webhook";
    pub const WEBHOOK_STATUS: &str = "webhook_status";
    pub const OPENAPI_STATUS: &str = "openapi_status";
    pub const SYNC_DEVICE: &str = "sync_device";
    pub const ADD_DEVICE: &str = "add_device";
    pub const DELETE_DEVICE: &str = "delete_device";
}

// =============================================================================
// Integration Section
// =============================================================================

/// Identity of the integration the engine runs for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationSection {
    /// Integration id, first segment of every key the engine owns.
    #[serde(default = "default_integration_id")]
    pub id: String,
}

fn default_integration_id() -> String {
    "beacon".to_string()
}

impl Default for IntegrationSection {
    fn default() -> Self {
        IntegrationSection {
            id: default_integration_id(),
        }
    }
}

// =============================================================================
// Sync Section
// =============================================================================

/// Device diff and history pull settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    /// Concurrent per-device tasks (1..=16).
    #[serde(default = "default_device_workers")]
    pub device_workers: usize,

    /// Remote devices requested per page.
    #[serde(default = "default_device_page_size")]
    pub device_page_size: u32,

    /// History records requested per page.
    #[serde(default = "default_history_page_size")]
    pub history_page_size: u32,

    /// How far back a delta cycle looks at most (seconds).
    #[serde(default = "default_history_lookback")]
    pub history_lookback_secs: i64,
}

fn default_device_workers() -> usize {
    4
}

fn default_device_page_size() -> u32 {
    10
}

fn default_history_page_size() -> u32 {
    100
}

fn default_history_lookback() -> i64 {
    86_400
}

impl Default for SyncSection {
    fn default() -> Self {
        SyncSection {
            device_workers: default_device_workers(),
            device_page_size: default_device_page_size(),
            history_page_size: default_history_page_size(),
            history_lookback_secs: default_history_lookback(),
        }
    }
}

// =============================================================================
// Webhook Section
// =============================================================================

/// Webhook validation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSection {
    /// A delivery older than this many seconds is stale.
    #[serde(default = "default_freshness_window")]
    pub freshness_window_secs: i64,

    /// Consecutive failures tolerated before health turns ERROR.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
}

fn default_freshness_window() -> i64 {
    60
}

fn default_max_failures() -> u32 {
    10
}

impl Default for WebhookSection {
    fn default() -> Self {
        WebhookSection {
            freshness_window_secs: default_freshness_window(),
            max_failures: default_max_failures(),
        }
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete static configuration of the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub integration: IntegrationSection,

    #[serde(default)]
    pub sync: SyncSection,

    #[serde(default)]
    pub webhook: WebhookSection,
}

impl EngineConfig {
    /// Creates a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (beacon.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let id = &self.integration.id;
        if id.is_empty() || id.contains(['.', '@']) {
            return Err(SyncError::InvalidConfig(format!(
                "integration id must be non-empty and free of '.'/'@', got: '{}'",
                id
            )));
        }

        if !(MIN_DEVICE_WORKERS..=MAX_DEVICE_WORKERS).contains(&self.sync.device_workers) {
            return Err(SyncError::InvalidConfig(format!(
                "device_workers must be between {} and {}, got: {}",
                MIN_DEVICE_WORKERS, MAX_DEVICE_WORKERS, self.sync.device_workers
            )));
        }

        if self.sync.device_page_size == 0 || self.sync.history_page_size == 0 {
            return Err(SyncError::InvalidConfig(
                "page sizes must be greater than 0".into(),
            ));
        }

        if self.sync.history_lookback_secs <= 0 || self.webhook.freshness_window_secs <= 0 {
            return Err(SyncError::InvalidConfig(
                "history_lookback_secs and freshness_window_secs must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("BEACON_INTEGRATION_ID") {
            debug!(integration = %id, "Overriding integration id from environment");
            self.integration.id = id;
        }

        if let Ok(workers) = std::env::var("BEACON_DEVICE_WORKERS") {
            match workers.parse::<usize>() {
                Ok(w) => self.sync.device_workers = w,
                Err(_) => warn!(value = %workers, "Invalid BEACON_DEVICE_WORKERS"),
            }
        }

        if let Ok(size) = std::env::var("BEACON_DEVICE_PAGE_SIZE") {
            if let Ok(s) = size.parse::<u32>() {
                self.sync.device_page_size = s;
            }
        }

        if let Ok(size) = std::env::var("BEACON_HISTORY_PAGE_SIZE") {
            if let Ok(s) = size.parse::<u32>() {
                self.sync.history_page_size = s;
            }
        }

        if let Ok(max) = std::env::var("BEACON_WEBHOOK_MAX_FAILURES") {
            if let Ok(m) = max.parse::<u32>() {
                debug!(max_failures = m, "Overriding webhook failure threshold from environment");
                self.webhook.max_failures = m;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "beacon", "beacon")
            .map(|dirs| dirs.config_dir().join("beacon.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the integration id.
    pub fn integration_id(&self) -> &str {
        &self.integration.id
    }

    /// Key of an integration-level field, e.g. `beacon.integration.webhook`.
    pub fn integration_key(&self, field: &str) -> String {
        keys::integration_key(&self.integration.id, field)
    }
}

// =============================================================================
// Persisted Runtime Settings
// =============================================================================

/// Periodic fetch settings, edited by users at runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduledFetchSettings {
    #[serde(default)]
    pub enabled: Option<bool>,

    /// Seconds between delta cycles.
    #[serde(default)]
    pub period: Option<i64>,
}

impl ScheduledFetchSettings {
    /// Effective period: `None` unless enabled with a positive period.
    pub fn effective_period(&self) -> Option<u64> {
        if self.enabled != Some(true) {
            return None;
        }
        self.period.filter(|p| *p > 0).map(|p| p as u64)
    }
}

/// Webhook settings, edited by users at runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookSettings {
    #[serde(default)]
    pub enabled: Option<bool>,

    #[serde(default)]
    pub secret_key: Option<String>,
}

impl WebhookSettings {
    pub fn is_enabled(&self) -> bool {
        self.enabled == Some(true)
    }

    /// Shared secret, `None` when missing or empty.
    pub fn secret(&self) -> Option<&str> {
        self.secret_key.as_deref().filter(|s| !s.is_empty())
    }
}

/// Loads grouped settings stored under `prefix`.
///
/// Returns `Ok(None)` when nothing is stored there.
pub async fn load_settings<T: DeserializeOwned>(
    store: &dyn ValueStore,
    prefix: &str,
) -> SyncResult<Option<T>> {
    let values = store.find_values_by_prefix(prefix).await?;
    Ok(decode_grouped(prefix, &values)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryValueStore;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.integration_id(), "beacon");
        assert_eq!(config.sync.device_workers, 4);
        assert_eq!(config.sync.device_page_size, 10);
        assert_eq!(config.sync.history_page_size, 100);
        assert_eq!(config.sync.history_lookback_secs, 86_400);
        assert_eq!(config.webhook.freshness_window_secs, 60);
        assert_eq!(config.webhook.max_failures, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.sync.device_workers = 0;
        assert!(config.validate().unwrap_err().is_config_error());

        config.sync.device_workers = 1;
        assert!(config.validate().unwrap_err().is_config_error());

        config.sync.device_workers = 5;
        assert!(config.validate().is_err());

        config.sync.device_workers = 2;
        assert!(config.validate().is_ok());

        config.sync.device_workers = 4;
        assert!(config.validate().is_ok());

        config.integration.id = "bad.id".into();
        assert!(config.validate().is_err());

        config.integration.id = "beacon".into();
        config.sync.history_page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [integration]
            id = "msc"

            [sync]
            device_workers = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.integration_id(), "msc");
        assert_eq!(config.sync.device_workers, 2);
        assert_eq!(config.sync.device_page_size, 10);
        assert_eq!(config.webhook.max_failures, 10);
        assert_eq!(
            config.integration_key(fields::WEBHOOK_STATUS),
            "msc.integration.webhook_status"
        );
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = std::env::temp_dir()
            .join(format!("beacon-{}", uuid::Uuid::new_v4()))
            .join("beacon.toml");

        let mut config = EngineConfig::default();
        config.sync.history_page_size = 50;
        config.save(Some(path.clone())).unwrap();

        let loaded = EngineConfig::load(Some(path.clone())).unwrap();
        assert_eq!(loaded.sync.history_page_size, 50);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[sync]"));
        assert!(contents.contains("[webhook]"));

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_effective_period() {
        let settings = ScheduledFetchSettings {
            enabled: Some(true),
            period: Some(300),
        };
        assert_eq!(settings.effective_period(), Some(300));

        let disabled = ScheduledFetchSettings {
            enabled: Some(false),
            period: Some(300),
        };
        assert_eq!(disabled.effective_period(), None);

        for period in [None, Some(0), Some(-5)] {
            let invalid = ScheduledFetchSettings {
                enabled: Some(true),
                period,
            };
            assert_eq!(invalid.effective_period(), None);
        }
    }

    #[test]
    fn test_webhook_secret() {
        let settings = WebhookSettings {
            enabled: Some(true),
            secret_key: Some(String::new()),
        };
        assert!(settings.is_enabled());
        assert_eq!(settings.secret(), None);
    }

    #[tokio::test]
    async fn test_load_settings_from_store() {
        let store = MemoryValueStore::default();
        store.set("beacon.integration.webhook.enabled", json!(true));
        store.set("beacon.integration.webhook.secret_key", json!("s3cret"));
        store.set("beacon.integration.webhook_status", json!("READY"));

        let settings: WebhookSettings = load_settings(&store, "beacon.integration.webhook")
            .await
            .unwrap()
            .unwrap();
        assert!(settings.is_enabled());
        assert_eq!(settings.secret(), Some("s3cret"));

        let missing: Option<ScheduledFetchSettings> =
            load_settings(&store, "beacon.integration.scheduled_data_fetch")
                .await
                .unwrap();
        assert!(missing.is_none());
    }
}
