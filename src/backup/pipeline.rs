// Backup pipeline - ping, dump, compress, fan out
//
// Every run owns its scratch files through `TempArtifact` guards, so the working
// directory is left as it was found whether the run succeeds, fails or is cancelled.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::fanout::{upload_to_targets, with_deadline, UploadTarget};
use super::filename::{compressed_filename, make_filename};
use super::types::{Artifact, BackupError, BackupReport, PipelineStage, TempArtifact};
use crate::clock::{Clock, SystemClock};
use crate::compress::{Compressor, GzipCompressor};
use crate::database::Database;
use crate::metrics;

/// Runs one backup of one database and replicates it to every target
pub struct BackupPipeline {
    database: Arc<dyn Database>,
    targets: Vec<UploadTarget>,
    compressor: Arc<dyn Compressor>,
    clock: Arc<dyn Clock>,
    compress: bool,
    work_dir: PathBuf,
    stage_timeout: Option<Duration>,
}

impl BackupPipeline {
    /// Gzip-compressing pipeline writing scratch files to the system temp dir
    pub fn new(database: Arc<dyn Database>, targets: Vec<UploadTarget>) -> Self {
        Self {
            database,
            targets,
            compressor: Arc::new(GzipCompressor::new()),
            clock: Arc::new(SystemClock),
            compress: true,
            work_dir: std::env::temp_dir(),
            stage_timeout: None,
        }
    }

    /// Turn gzip on or off; off keeps the native dump extension
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    /// Swap the compressor used when compression is on
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    /// Directory for scratch dumps; created on first run
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Deadline for each stage and for each individual upload
    pub fn with_stage_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Replace the time source used for artifact names
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Name of the database this pipeline backs up
    pub fn database_name(&self) -> &str {
        self.database.name()
    }

    /// Destinations every artifact is copied to
    pub fn targets(&self) -> &[UploadTarget] {
        &self.targets
    }

    /// Run the pipeline once.
    ///
    /// Fails only when the database is unreachable, the dump or compression fails, a
    /// stage times out, or `cancel` fires before the upload stage. Upload failures are
    /// reported per target in the returned report.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<BackupReport, BackupError> {
        let span = info_span!(
            "backup",
            database = %self.database.name(),
            kind = %self.database.kind()
        );
        let started = Instant::now();
        let result = self.execute(cancel, started).instrument(span.clone()).await;

        let elapsed = started.elapsed().as_secs_f64();
        span.in_scope(|| match &result {
            Ok(report) => {
                metrics::record_backup(self.database.name(), true, elapsed);
                let failed = report.failed_targets();
                if failed.is_empty() {
                    info!(
                        stage = %PipelineStage::Done,
                        file = %report.filename,
                        targets = report.uploads.len(),
                        elapsed_secs = elapsed,
                        "Backup completed"
                    );
                } else {
                    warn!(
                        stage = %PipelineStage::Done,
                        file = %report.filename,
                        failed_targets = ?failed,
                        elapsed_secs = elapsed,
                        "Backup completed with failed uploads"
                    );
                }
            }
            Err(e) => {
                metrics::record_backup(self.database.name(), false, elapsed);
                error!(
                    stage = %PipelineStage::Failed,
                    failed_during = %e.stage(),
                    error = %e,
                    "Backup failed"
                );
            }
        });

        result
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<BackupReport, BackupError> {
        let name = self.database.name().to_string();

        info!(stage = %PipelineStage::ConnectivityCheck, "Checking database connectivity");
        self.stage(PipelineStage::ConnectivityCheck, cancel, self.database.ping())
            .await?
            .map_err(|source| BackupError::Connectivity {
                database: name.clone(),
                source,
            })?;

        let created_at = self.clock.now();
        let filename = make_filename(&name, self.database.kind(), created_at);
        fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|source| BackupError::Io {
                stage: PipelineStage::Dumping,
                source,
            })?;

        let raw_path = self.work_dir.join(&filename);
        let raw_guard = TempArtifact::new(raw_path.clone());

        info!(stage = %PipelineStage::Dumping, file = %filename, "Dumping database");
        self.stage(PipelineStage::Dumping, cancel, self.database.backup(&raw_path))
            .await?
            .map_err(|source| BackupError::Dump {
                database: name.clone(),
                source,
            })?;

        let raw_size_bytes = fs::metadata(&raw_path)
            .await
            .map_err(|source| BackupError::Io {
                stage: PipelineStage::Dumping,
                source,
            })?
            .len();
        info!(size_bytes = raw_size_bytes, "Dump written");

        let mut artifact = Artifact {
            path: raw_path,
            filename,
            size_bytes: raw_size_bytes,
            compressed: false,
            created_at,
            database: name.clone(),
        };
        // Holds whichever scratch file is current; replacing it removes the previous one
        let mut _scratch = raw_guard;

        if self.compress {
            let packed_name = compressed_filename(&artifact.filename);
            let packed_path = self.work_dir.join(&packed_name);
            let packed_guard = TempArtifact::new(packed_path.clone());

            info!(stage = %PipelineStage::Compressing, file = %packed_name, "Compressing artifact");
            self.stage(
                PipelineStage::Compressing,
                cancel,
                self.compressor.compress(&artifact.path, &packed_path),
            )
            .await?
            .map_err(|source| BackupError::Compression {
                database: name.clone(),
                source,
            })?;

            let size_bytes = fs::metadata(&packed_path)
                .await
                .map_err(|source| BackupError::Io {
                    stage: PipelineStage::Compressing,
                    source,
                })?
                .len();
            info!(
                size_bytes,
                ratio = size_bytes as f64 / raw_size_bytes.max(1) as f64,
                "Compression complete"
            );

            _scratch = packed_guard;
            artifact = Artifact {
                path: packed_path,
                filename: packed_name,
                size_bytes,
                compressed: true,
                ..artifact
            };
        }

        metrics::record_artifact_size(&name, artifact.size_bytes);
        info!(
            stage = %PipelineStage::Uploading,
            targets = self.targets.len(),
            "Uploading to all targets"
        );
        let uploads =
            upload_to_targets(&artifact, &self.targets, cancel, self.stage_timeout).await;

        Ok(BackupReport {
            database: name,
            filename: artifact.filename,
            raw_size_bytes,
            size_bytes: artifact.size_bytes,
            compressed: artifact.compressed,
            created_at,
            uploads,
            elapsed: started.elapsed(),
        })
    }

    /// Drive one stage future, racing it against cancellation and the stage deadline
    async fn stage<F: Future>(
        &self,
        stage: PipelineStage,
        cancel: &CancellationToken,
        fut: F,
    ) -> Result<F::Output, BackupError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BackupError::Cancelled(stage)),
            result = with_deadline(self.stage_timeout, fut) => result.map_err(|_| BackupError::Timeout {
                stage,
                timeout: self.stage_timeout.unwrap_or_default(),
            }),
        }
    }
}

/// A scheduled backup: which database, when, and the pipeline that does the work
#[derive(Clone)]
pub struct BackupJob {
    /// Database name
    pub database: String,
    /// 6-field cron expression
    pub schedule: String,
    /// Pipeline run on every firing
    pub pipeline: Arc<BackupPipeline>,
}

impl BackupJob {
    /// Job for `pipeline` firing on `schedule`
    pub fn new(schedule: impl Into<String>, pipeline: Arc<BackupPipeline>) -> Self {
        Self {
            database: pipeline.database_name().to_string(),
            schedule: schedule.into(),
            pipeline,
        }
    }

    /// Run the pipeline once
    pub async fn run(&self, cancel: &CancellationToken) -> Result<BackupReport, BackupError> {
        self.pipeline.run(cancel).await
    }
}

impl std::fmt::Debug for BackupJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupJob")
            .field("database", &self.database)
            .field("schedule", &self.schedule)
            .field("targets", &self.pipeline.targets().len())
            .finish()
    }
}
