//! Application wiring
//!
//! [`App`] turns a [`Config`] into destinations, one [`BackupJob`] per enabled database
//! and a [`RetentionCleaner`], and owns the [`Scheduler`] that drives them. Nothing here
//! is process-global; job closures capture the `Arc`s they need.

use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backup::{
    BackupJob, BackupPipeline, BackupReport, CleanupReport, PipelineStage, RetentionCleaner,
    UploadTarget,
};
use crate::config::{Config, ConfigError};
use crate::scheduler::Scheduler;
use crate::{database, metrics, storage, Result};

/// Outcome of a single `--once` pass
#[derive(Debug, Serialize)]
pub struct RunOnceReport {
    /// Runs that reached the upload stage
    pub backups: Vec<BackupReport>,
    /// Runs that failed before uploading
    pub failed: Vec<FailedBackup>,
    /// Retention sweep performed after the backups
    pub cleanup: CleanupReport,
}

/// A backup run that did not produce an artifact
#[derive(Debug, Serialize)]
pub struct FailedBackup {
    /// Database name
    pub database: String,
    /// Stage the run failed in
    pub stage: PipelineStage,
    /// Error text
    pub error: String,
}

/// The assembled backup service
pub struct App {
    name: String,
    jobs: Vec<BackupJob>,
    targets: Vec<UploadTarget>,
    cleaner: Arc<RetentionCleaner>,
    cleanup_schedule: String,
    scheduler: Scheduler,
}

impl App {
    /// Build every component described by `config`.
    ///
    /// Destinations that cannot be set up and databases of an unknown type are logged
    /// and skipped; having no usable database at all is an error.
    pub async fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        info!(app = %config.app.name, databases = config.enabled_databases().count(), "Starting");

        let mut targets = Vec::new();
        for target_config in config.enabled_upload_targets() {
            let name = target_config.display_name();
            match storage::from_config(target_config).await {
                Ok(storage) => {
                    info!(
                        destination = %name,
                        kind = target_config.kind.type_name(),
                        discovery = ?storage.discovery(),
                        "Upload target enabled"
                    );
                    targets.push(UploadTarget::new(name, storage));
                }
                Err(e) => error!(destination = %name, error = %e, "Failed to set up upload target"),
            }
        }
        if targets.is_empty() {
            warn!("No upload targets enabled; artifacts are discarded after each run");
        }

        let mut jobs = Vec::new();
        for db_config in config.enabled_databases() {
            let db = match database::from_config(db_config) {
                Ok(db) => db,
                Err(e) => {
                    warn!(database = %db_config.name, error = %e, "Skipping database");
                    continue;
                }
            };

            // A database that is down at boot keeps its job; the next run may succeed
            match db.ping().await {
                Ok(()) => info!(database = %db_config.name, kind = %db_config.kind, "Connected"),
                Err(e) => warn!(
                    database = %db_config.name,
                    error = %e,
                    "Database unreachable at startup"
                ),
            }

            let pipeline = BackupPipeline::new(db, targets.clone())
                .with_compression(config.backup.compress)
                .with_work_dir(config.backup.work_dir())
                .with_stage_timeout(config.backup.stage_timeout());
            jobs.push(BackupJob::new(db_config.schedule.clone(), Arc::new(pipeline)));
        }

        if jobs.is_empty() {
            return Err(ConfigError::Invalid("no enabled databases found".to_string()).into());
        }

        let cleaner = Arc::new(RetentionCleaner::new(
            targets.clone(),
            config.backup.retention_days,
        ));

        Ok(Self {
            name: config.app.name.clone(),
            jobs,
            targets,
            cleaner,
            cleanup_schedule: config.backup.cleanup_schedule.clone(),
            scheduler: Scheduler::new(),
        })
    }

    /// Backup jobs, one per usable database
    pub fn jobs(&self) -> &[BackupJob] {
        &self.jobs
    }

    /// Destinations every job replicates to
    pub fn targets(&self) -> &[UploadTarget] {
        &self.targets
    }

    /// The scheduler driving the jobs
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Register every backup job and the retention sweep with the scheduler.
    ///
    /// An invalid expression aborts registration with the offending job named in the error.
    pub fn schedule(&self) -> Result<()> {
        for job in &self.jobs {
            let scheduled = job.clone();
            self.scheduler
                .add_job(format!("backup:{}", job.database), &job.schedule, move |cancel| {
                    let job = scheduled.clone();
                    async move {
                        info!(database = %job.database, "Triggered scheduled backup");
                        job.run(&cancel).await?;
                        Ok::<_, anyhow::Error>(())
                    }
                    .boxed()
                })
                .map_err(|e| {
                    error!(database = %job.database, schedule = %job.schedule, error = %e, "Invalid backup schedule");
                    e
                })?;
        }

        let cleaner = Arc::clone(&self.cleaner);
        self.scheduler
            .add_job("cleanup", &self.cleanup_schedule, move |cancel| {
                let cleaner = Arc::clone(&cleaner);
                async move {
                    cleaner.run(&cancel).await;
                    Ok(())
                }
                .boxed()
            })?;
        info!(schedule = %self.cleanup_schedule, "Scheduled retention cleanup");

        Ok(())
    }

    /// Run on schedule until `shutdown` fires, then drain in-flight jobs
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        self.schedule()?;
        self.scheduler.start();
        info!(
            app = %self.name,
            jobs = self.jobs.len(),
            targets = self.targets.len(),
            "Scheduler running"
        );

        shutdown.cancelled().await;
        self.shutdown().await;
        Ok(())
    }

    /// Run every backup once, concurrently, followed by one retention sweep
    pub async fn run_once(&self, cancel: &CancellationToken) -> RunOnceReport {
        let results = join_all(self.jobs.iter().map(|job| job.run(cancel))).await;

        let mut backups = Vec::new();
        let mut failed = Vec::new();
        for (job, result) in self.jobs.iter().zip(results) {
            match result {
                Ok(report) => backups.push(report),
                Err(e) => failed.push(FailedBackup {
                    database: job.database.clone(),
                    stage: e.stage(),
                    error: e.to_string(),
                }),
            }
        }

        let cleanup = self.cleaner.run(cancel).await;
        RunOnceReport {
            backups,
            failed,
            cleanup,
        }
    }

    /// Stop firing and wait for running jobs
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.scheduler.stop().await;
        debug!(metrics = %metrics::gather(), "Final metrics");
    }
}
