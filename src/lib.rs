//! # vaultkeeper
//!
//! Scheduled database dumps replicated to several independent storage destinations,
//! with a daily retention sweep that purges expired artifacts from every destination.
//!
//! ## Overview
//!
//! Each enabled database gets a [`backup::BackupJob`] whose pipeline pings the
//! database, dumps it into a scratch directory, optionally gzips the dump and then
//! uploads the artifact to every configured [`backup::UploadTarget`] in parallel.
//! A failing destination never fails the job or its siblings. The
//! [`backup::RetentionCleaner`] runs on its own schedule and removes artifacts older
//! than the retention window, either through a backend's native age query or by
//! parsing the timestamp embedded in every artifact name.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vaultkeeper::{app::App, config::Config};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("config.yaml")?;
//! let app = App::new(&config).await?;
//! app.run(tokio_util::sync::CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`backup`]: pipeline, upload fan-out and retention cleaner
//! - [`database`]: dump tool wrappers (MySQL, PostgreSQL, MongoDB)
//! - [`storage`]: backup destinations (local directory, memory, S3)
//! - [`compress`]: artifact compression
//! - [`scheduler`]: cron triggers with graceful drain
//! - [`config`]: configuration model and validation
//! - [`app`]: wiring of all components

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for vaultkeeper operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Main error type for vaultkeeper operations
#[derive(Error, Debug)]
pub enum VaultError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A schedule expression was rejected
    #[error("Schedule error: {0}")]
    Schedule(#[from] scheduler::ScheduleError),

    /// A backup run failed before any artifact could be uploaded
    #[error("Backup error: {0}")]
    Backup(#[from] backup::BackupError),

    /// A storage destination failed
    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// A database capability failed outside of a pipeline run
    #[error("Database error: {0}")]
    Database(#[from] database::DatabaseError),

    /// Join error from async tasks
    #[error("Async join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Backup pipeline, upload fan-out and retention cleaner
pub mod backup;

/// Database dump capabilities
pub mod database;

/// Storage destinations
pub mod storage;

/// Artifact compression
pub mod compress;

/// Cron scheduling
pub mod scheduler;

/// Time source abstraction
pub mod clock;

/// Configuration model
pub mod config;

/// Application wiring
pub mod app;

/// Logging setup
pub mod telemetry;

/// Prometheus metrics
pub mod metrics;
