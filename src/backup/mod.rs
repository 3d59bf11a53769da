// Backup orchestration - pipeline, upload fan-out and retention
//
// A run pings the database, dumps it into the working directory, optionally
// compresses the dump and replicates it to every destination. Retention runs
// independently and purges expired artifacts from the same destinations.

/// Retention sweeps across targets
pub mod cleanup;
/// Parallel upload to every target
pub mod fanout;
/// Artifact naming and timestamp recovery
pub mod filename;
/// The per-database backup run
pub mod pipeline;
/// Reports, errors and scratch-file guards
pub mod types;

pub use cleanup::RetentionCleaner;
pub use fanout::{upload_to_targets, UploadTarget};
pub use pipeline::{BackupJob, BackupPipeline};
pub use types::{
    Artifact, BackupError, BackupReport, CleanupReport, PipelineStage, TargetCleanup,
    TempArtifact, UploadOutcome, UploadStatus,
};
