//! Typed configuration, one field per option enumerated in the specification.
//!
//! Loaded through [`unitledger_common::ConfigLoader`]: struct defaults, then
//! an optional TOML file, then `UNITLEDGER_*` environment overrides.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use unitledger_common::ConfigLoader;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app_name: String,
    pub web: WebConfig,
    pub storage: StorageConfig,
    pub tsdb: TsdbConfig,
    pub resource_manager: ResourceManagerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "unitledger".to_string(),
            web: WebConfig::default(),
            storage: StorageConfig::default(),
            tsdb: TsdbConfig::default(),
            resource_manager: ResourceManagerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub listen_address: String,
    pub admin_users: Vec<String>,
    /// Upper bound on `to - from` for user-facing time-window queries, in seconds.
    pub max_query_period_secs: u64,
    /// Optional external identity-service endpoint serving a JSON array of
    /// admin usernames. Absent ⇒ the admin list is static, taken from
    /// `admin_users` alone.
    pub admin_source_url: Option<String>,
    /// Path to a TLS/authn front-end config file. Consumed by whatever
    /// reverse proxy terminates TLS in front of this service; this crate
    /// only records the path, it never reads it.
    pub config_file: Option<PathBuf>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:9020".to_string(),
            admin_users: Vec::new(),
            max_query_period_secs: 24 * 3600,
            admin_source_url: None,
            config_file: None,
        }
    }
}

impl WebConfig {
    pub fn max_query_period(&self) -> Duration {
        Duration::from_secs(self.max_query_period_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_path: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub retention_period_secs: u64,
    pub update_from: String,
    pub update_interval_secs: u64,
    pub backup_interval_secs: u64,
    pub job_duration_cutoff_secs: u64,
    /// Test-only: skip the retention-sweep delete in the writer transaction.
    pub skip_delete_old_units: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./data"),
            backup_path: None,
            retention_period_secs: 365 * 24 * 3600,
            update_from: "2024-01-01".to_string(),
            update_interval_secs: 15 * 60,
            backup_interval_secs: 24 * 3600,
            job_duration_cutoff_secs: 5 * 60,
            skip_delete_old_units: false,
        }
    }
}

impl StorageConfig {
    pub fn retention_period(&self) -> Duration {
        Duration::from_secs(self.retention_period_secs)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    /// Clamped to [`MIN_BACKUP_INTERVAL`] by [`Config::validate_and_prepare`].
    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.backup_interval_secs)
    }

    pub fn job_duration_cutoff(&self) -> Duration {
        Duration::from_secs(self.job_duration_cutoff_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TsdbConfig {
    pub web_url: Option<String>,
    pub skip_tls_verify: bool,
    pub cutoff_duration_secs: u64,
}

impl Default for TsdbConfig {
    fn default() -> Self {
        Self {
            web_url: None,
            skip_tls_verify: false,
            cutoff_duration_secs: 3600,
        }
    }
}

impl TsdbConfig {
    pub fn cutoff_duration(&self) -> Duration {
        Duration::from_secs(self.cutoff_duration_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceManagerConfig {
    pub kind: String,
    /// `kind = "fixture"` only: path to the newline-delimited-JSON fixture
    /// file. Unused by any other adapter.
    pub fixture_path: Option<PathBuf>,
}

impl Default for ResourceManagerConfig {
    fn default() -> Self {
        Self {
            kind: "fixture".to_string(),
            fixture_path: None,
        }
    }
}

/// Minimum backup tick: production databases can be large, so never back
/// up more often than once a day regardless of configuration.
pub const MIN_BACKUP_INTERVAL: Duration = Duration::from_secs(24 * 3600);

impl Config {
    /// Validate and normalize values that can't be expressed as plain
    /// `serde` defaults: directory creation and the backup-interval clamp.
    pub fn validate_and_prepare(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.storage.data_path)?;

        if let Some(backup_path) = &self.storage.backup_path {
            std::fs::create_dir_all(backup_path)?;
        }

        if self.storage.backup_interval() < MIN_BACKUP_INTERVAL {
            tracing::warn!(
                configured_secs = self.storage.backup_interval_secs,
                minimum_secs = MIN_BACKUP_INTERVAL.as_secs(),
                "storage.backup_interval_secs below minimum, clamping to 1 day"
            );
            self.storage.backup_interval_secs = MIN_BACKUP_INTERVAL.as_secs();
        }

        if self.storage.backup_path.is_none() {
            tracing::info!("storage.backup_path unset, backups disabled");
        }

        Ok(())
    }

    /// Whether the backup ticker should run at all.
    pub fn backups_enabled(&self) -> bool {
        self.storage.backup_path.is_some()
    }
}

pub struct ConfigFile;

impl ConfigLoader<Config> for ConfigFile {
    fn env_prefix() -> &'static str {
        "UNITLEDGER_"
    }
}

impl From<unitledger_common::error::CommonError> for Error {
    fn from(e: unitledger_common::error::CommonError) -> Self {
        Error::Config(e.to_string())
    }
}
