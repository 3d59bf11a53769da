// Backup System Types - Core data structures and enums

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compress::CompressionError;
use crate::database::DatabaseError;
use crate::storage::Discovery;

/// A dump sitting in the working directory, about to be replicated
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Where the file sits in the working directory
    pub path: PathBuf,
    /// Name the file is stored under at every destination
    pub filename: String,
    /// Size on disk
    pub size_bytes: u64,
    /// Whether `path` is the gzip output
    pub compressed: bool,
    /// Instant embedded in the filename
    pub created_at: DateTime<Utc>,
    /// Logical database name the dump came from
    pub database: String,
}

/// Removes the wrapped file when dropped, whatever path the pipeline leaves by
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
}

impl TempArtifact {
    /// Guard `path`; the file need not exist yet
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The guarded path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed temporary artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove temporary artifact"
            ),
        }
    }
}

/// Stages of one pipeline invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    /// Not started
    Idle,
    /// Pinging the database
    ConnectivityCheck,
    /// Running the dump tool into the working directory
    Dumping,
    /// Gzipping the dump
    Compressing,
    /// Fanning the artifact out to every target
    Uploading,
    /// Dump and compression succeeded
    Done,
    /// A stage before uploading failed
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Idle => "idle",
            PipelineStage::ConnectivityCheck => "connectivity_check",
            PipelineStage::Dumping => "dumping",
            PipelineStage::Compressing => "compressing",
            PipelineStage::Uploading => "uploading",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-target result of the upload fan-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UploadStatus {
    /// The target holds a copy
    Uploaded,
    /// The target rejected the upload or timed out; carries the reason
    Failed(String),
    /// The run was cancelled before the upload finished
    Cancelled,
}

/// What happened at one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOutcome {
    /// Target name from the configuration
    pub target: String,
    /// Result of the upload
    pub status: UploadStatus,
    /// Time spent on this target
    pub elapsed: Duration,
}

impl UploadOutcome {
    /// Whether the target received the artifact
    pub fn is_success(&self) -> bool {
        self.status == UploadStatus::Uploaded
    }
}

/// Summary of a successful pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupReport {
    /// Database name
    pub database: String,
    /// Final artifact name, including `.gz` when compressed
    pub filename: String,
    /// Size of the dump before compression
    pub raw_size_bytes: u64,
    /// Size of the uploaded artifact
    pub size_bytes: u64,
    /// Whether the artifact was gzipped
    pub compressed: bool,
    /// Instant embedded in the filename
    pub created_at: DateTime<Utc>,
    /// One entry per target, in configuration order
    pub uploads: Vec<UploadOutcome>,
    /// Wall time from ping to the last upload
    pub elapsed: Duration,
}

impl BackupReport {
    /// Targets that did not receive the artifact
    pub fn failed_targets(&self) -> Vec<&str> {
        self.uploads
            .iter()
            .filter(|outcome| !outcome.is_success())
            .map(|outcome| outcome.target.as_str())
            .collect()
    }

    /// Every target received the artifact
    pub fn fully_replicated(&self) -> bool {
        self.uploads.iter().all(UploadOutcome::is_success)
    }
}

/// Cleanup tally for one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetCleanup {
    /// Target name from the configuration
    pub target: String,
    /// How the expired set was found
    pub discovery: Discovery,
    /// Files removed
    pub deleted: usize,
    /// Expired files whose deletion failed
    pub failed: usize,
    /// Set when the expired set could not be determined at all
    pub error: Option<String>,
}

/// Outcome of one retention sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Artifacts created strictly before this instant were expired
    pub cutoff: DateTime<Utc>,
    /// One tally per target, in configuration order
    pub targets: Vec<TargetCleanup>,
}

impl CleanupReport {
    /// Deletions summed over every target
    pub fn total_deleted(&self) -> usize {
        self.targets.iter().map(|t| t.deleted).sum()
    }

    /// Failed deletions summed over every target
    pub fn total_failed(&self) -> usize {
        self.targets.iter().map(|t| t.failed).sum()
    }

    /// Tally for the target called `name`
    pub fn target(&self, name: &str) -> Option<&TargetCleanup> {
        self.targets.iter().find(|t| t.target == name)
    }
}

/// Failures that abort a backup run. Upload failures are never among them.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// The database did not answer its ping
    #[error("Connectivity error for {database}: {source}")]
    Connectivity {
        /// Database name
        database: String,
        /// What the ping reported
        #[source]
        source: DatabaseError,
    },
    /// The dump tool failed
    #[error("Dump error for {database}: {source}")]
    Dump {
        /// Database name
        database: String,
        /// Tool status and output
        #[source]
        source: DatabaseError,
    },
    /// Gzip failed; the partial archive has been removed
    #[error("Compression error for {database}: {source}")]
    Compression {
        /// Database name
        database: String,
        /// Underlying compressor error
        #[source]
        source: CompressionError,
    },
    /// A stage ran past the configured deadline
    #[error("{stage} timed out after {timeout:?}")]
    Timeout {
        /// Stage that was cut off
        stage: PipelineStage,
        /// The configured limit
        timeout: Duration,
    },
    /// The run's token fired during the given stage
    #[error("Cancelled during {0}")]
    Cancelled(PipelineStage),
    /// Working-directory IO around a stage (creating the directory, sizing an artifact)
    #[error("IO error during {stage}: {source}")]
    Io {
        /// Stage the IO belonged to
        stage: PipelineStage,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl BackupError {
    /// Stage the run was in when it failed
    pub fn stage(&self) -> PipelineStage {
        match self {
            BackupError::Connectivity { .. } => PipelineStage::ConnectivityCheck,
            BackupError::Dump { .. } => PipelineStage::Dumping,
            BackupError::Compression { .. } => PipelineStage::Compressing,
            BackupError::Timeout { stage, .. } => *stage,
            BackupError::Cancelled(stage) => *stage,
            BackupError::Io { stage, .. } => *stage,
        }
    }
}
