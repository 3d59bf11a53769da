//! Configuration model
//!
//! Loaded once at startup from YAML and read-only afterwards. Only enabled databases and
//! targets become jobs and destinations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config file path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML for this model
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A semantic check failed
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Process-level settings
    pub app: AppConfig,
    /// Databases to back up
    pub databases: Vec<DatabaseConfig>,
    /// Pipeline and retention settings
    pub backup: BackupConfig,
}

/// Process-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Name used in the startup log line
    pub name: String,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON log lines instead of the human-readable format
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "vaultkeeper".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// One database to dump
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Name used in artifact names and logs
    pub name: String,
    /// `mysql`, `postgresql` or `mongodb`
    #[serde(rename = "type")]
    pub kind: String,
    /// Server host
    pub host: String,
    /// Server port; the backend default when absent
    pub port: Option<u16>,
    /// Login user
    pub username: String,
    /// Login password
    pub password: String,
    /// Database (schema) to dump
    pub database: String,
    /// Whether a backup job is created
    pub enabled: bool,
    /// 6-field cron expression
    pub schedule: String,
    /// PostgreSQL `sslmode`
    pub ssl_mode: Option<String>,
    /// MongoDB `authSource`
    pub auth_database: Option<String>,
}

impl DatabaseConfig {
    /// Configured port or `default`
    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }
}

/// Pipeline and retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Scratch directory for dumps; the system temp dir when absent
    pub work_dir: Option<PathBuf>,
    /// Days an artifact is kept at every destination
    pub retention_days: u32,
    /// Gzip artifacts before upload
    pub compress: bool,
    /// 6-field cron expression for the retention sweep
    pub cleanup_schedule: String,
    /// Deadline applied to each pipeline stage and each upload
    pub stage_timeout_secs: Option<u64>,
    /// Destinations
    pub upload_targets: Vec<TargetConfig>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            retention_days: 14,
            compress: true,
            cleanup_schedule: "0 0 3 * * *".to_string(),
            stage_timeout_secs: None,
            upload_targets: Vec::new(),
        }
    }
}

impl BackupConfig {
    /// Scratch directory for dumps
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Per-stage deadline, if configured
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }
}

/// One destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Name used in logs and reports; the target type when absent
    #[serde(default)]
    pub name: Option<String>,
    /// Whether the destination receives artifacts
    #[serde(default)]
    pub enabled: bool,
    /// Backend-specific settings
    #[serde(flatten)]
    pub kind: TargetKind,
}

impl TargetConfig {
    /// Display name of the target
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.kind.type_name().to_string())
    }
}

/// Backend-specific destination settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TargetKind {
    /// A directory on this host
    Local {
        /// Destination directory
        path: PathBuf,
    },
    /// Process memory, for dry runs
    Memory,
    /// An S3 bucket
    S3(S3Config),
}

impl TargetKind {
    /// The `type` tag
    pub fn type_name(&self) -> &'static str {
        match self {
            TargetKind::Local { .. } => "local",
            TargetKind::Memory => "memory",
            TargetKind::S3(_) => "s3",
        }
    }
}

/// S3 destination settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// Bucket name
    pub bucket: String,
    /// Bucket region
    pub region: String,
    /// Key prefix artifacts are stored under
    pub prefix: String,
    /// Static access key; the default provider chain when absent
    pub access_key: Option<String>,
    /// Static secret key
    pub secret_key: Option<String>,
    /// Custom endpoint for S3-compatible services
    pub endpoint_url: Option<String>,
    /// Path-style addressing, needed by most S3-compatible services
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            prefix: String::new(),
            access_key: None,
            secret_key: None,
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

impl Config {
    /// Read, parse and validate the YAML file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic checks that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.databases.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one database configuration is required".to_string(),
            ));
        }

        for (i, db) in self.databases.iter().enumerate() {
            if db.name.is_empty() {
                return Err(ConfigError::Invalid(format!("database[{}]: name is required", i)));
            }
            if db.kind.is_empty() {
                return Err(ConfigError::Invalid(format!("database[{}]: type is required", i)));
            }
            if db.host.is_empty() {
                return Err(ConfigError::Invalid(format!("database[{}]: host is required", i)));
            }
            if db.enabled && db.schedule.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "database[{}]: schedule is required when enabled",
                    i
                )));
            }
        }

        if self.backup.retention_days == 0 {
            return Err(ConfigError::Invalid(
                "backup.retention_days must be at least 1".to_string(),
            ));
        }

        for (i, target) in self.enabled_upload_targets().enumerate() {
            if let TargetKind::S3(s3) = &target.kind {
                if s3.bucket.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "upload_targets[{}]: s3 bucket is required",
                        i
                    )));
                }
            }
        }

        Ok(())
    }

    /// Databases with `enabled: true`
    pub fn enabled_databases(&self) -> impl Iterator<Item = &DatabaseConfig> {
        self.databases.iter().filter(|db| db.enabled)
    }

    /// Targets with `enabled: true`
    pub fn enabled_upload_targets(&self) -> impl Iterator<Item = &TargetConfig> {
        self.backup.upload_targets.iter().filter(|t| t.enabled)
    }
}
