// Upload fan-out - one task per destination, failures stay with their destination

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::types::{Artifact, UploadOutcome, UploadStatus};
use crate::metrics;
use crate::storage::Storage;

/// A named destination the pipeline replicates to
#[derive(Clone)]
pub struct UploadTarget {
    /// Name used in logs, reports and metrics
    pub name: String,
    /// Backend receiving the artifact
    pub storage: Arc<dyn Storage>,
}

impl UploadTarget {
    /// Wrap a backend under a display name
    pub fn new(name: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        Self {
            name: name.into(),
            storage,
        }
    }
}

impl std::fmt::Debug for UploadTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadTarget")
            .field("name", &self.name)
            .field("discovery", &self.storage.discovery())
            .finish()
    }
}

/// Await `fut`, bounded by `timeout` when one is set
pub(crate) async fn with_deadline<F: Future>(
    timeout: Option<Duration>,
    fut: F,
) -> Result<F::Output, tokio::time::error::Elapsed> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await,
        None => Ok(fut.await),
    }
}

/// Upload `artifact` to every target concurrently.
///
/// Returns one outcome per target, in the order the targets were given. Never fails:
/// a target that errors, times out, or panics is reported as such and its siblings
/// are unaffected.
pub async fn upload_to_targets(
    artifact: &Artifact,
    targets: &[UploadTarget],
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> Vec<UploadOutcome> {
    let mut handles = Vec::with_capacity(targets.len());

    for target in targets {
        let span = info_span!(
            "upload",
            database = %artifact.database,
            destination = %target.name,
            file = %artifact.filename
        );
        let task = upload_one(
            target.clone(),
            artifact.path.clone(),
            artifact.filename.clone(),
            cancel.clone(),
            timeout,
        );
        handles.push((target.name.clone(), tokio::spawn(task.instrument(span))));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                error!(destination = %name, error = %e, "Upload task aborted");
                metrics::record_upload(&name, "failed");
                outcomes.push(UploadOutcome {
                    target: name,
                    status: UploadStatus::Failed(format!("upload task aborted: {}", e)),
                    elapsed: Duration::ZERO,
                });
            }
        }
    }

    outcomes
}

async fn upload_one(
    target: UploadTarget,
    path: PathBuf,
    filename: String,
    cancel: CancellationToken,
    timeout: Option<Duration>,
) -> UploadOutcome {
    let started = Instant::now();
    info!("Uploading artifact");

    let upload = target.storage.upload(&path, &filename);
    let status = tokio::select! {
        // An already-cancelled run skips the upload instead of racing it
        biased;
        _ = cancel.cancelled() => {
            warn!("Upload cancelled");
            UploadStatus::Cancelled
        }
        result = with_deadline(timeout, upload) => match result {
            Ok(Ok(())) => {
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "Upload complete");
                UploadStatus::Uploaded
            }
            Ok(Err(e)) => {
                error!(error = %e, "Upload failed");
                UploadStatus::Failed(e.to_string())
            }
            Err(_) => {
                let limit = timeout.unwrap_or_default();
                error!(timeout_secs = limit.as_secs(), "Upload timed out");
                UploadStatus::Failed(format!("timed out after {:?}", limit))
            }
        },
    };

    let label = match &status {
        UploadStatus::Uploaded => "uploaded",
        UploadStatus::Failed(_) => "failed",
        UploadStatus::Cancelled => "cancelled",
    };
    metrics::record_upload(&target.name, label);

    UploadOutcome {
        target: target.name,
        status,
        elapsed: started.elapsed(),
    }
}
