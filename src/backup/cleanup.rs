// Retention cleaner - purges expired artifacts from every destination
//
// The cutoff is computed once per run. Each target is swept by its own task and keeps
// its own tallies; the report is assembled after every task has been joined.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::fanout::UploadTarget;
use super::types::{CleanupReport, TargetCleanup};
use crate::clock::{Clock, SystemClock};
use crate::metrics;

/// Deletes artifacts older than the retention window from every target
pub struct RetentionCleaner {
    targets: Vec<UploadTarget>,
    retention_days: u32,
    clock: Arc<dyn Clock>,
}

impl RetentionCleaner {
    /// Keep `retention_days` days of artifacts on each of `targets`
    pub fn new(targets: Vec<UploadTarget>, retention_days: u32) -> Self {
        Self {
            targets,
            retention_days,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source used for the cutoff
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Configured retention window in days
    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Artifacts created strictly before this instant are expired
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.clock.now() - ChronoDuration::days(i64::from(self.retention_days))
    }

    /// Sweep every target once.
    ///
    /// Never fails as a whole: a target whose expired set cannot be determined is
    /// reported with `error` set, and individual delete failures are counted.
    pub async fn run(&self, cancel: &CancellationToken) -> CleanupReport {
        let cutoff = self.cutoff();
        info!(
            retention_days = self.retention_days,
            cutoff = %cutoff,
            targets = self.targets.len(),
            "Starting retention cleanup"
        );

        let mut handles = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            let span = info_span!("cleanup", destination = %target.name);
            let task = clean_target(target.clone(), cutoff, cancel.clone());
            handles.push((
                target.name.clone(),
                target.storage.discovery(),
                tokio::spawn(task.instrument(span)),
            ));
        }

        let mut targets = Vec::with_capacity(handles.len());
        for (name, discovery, handle) in handles {
            match handle.await {
                Ok(result) => targets.push(result),
                Err(e) => {
                    error!(destination = %name, error = %e, "Cleanup task aborted");
                    targets.push(TargetCleanup {
                        target: name,
                        discovery,
                        deleted: 0,
                        failed: 0,
                        error: Some(format!("cleanup task aborted: {}", e)),
                    });
                }
            }
        }

        let report = CleanupReport { cutoff, targets };
        info!(
            deleted = report.total_deleted(),
            failed = report.total_failed(),
            "Retention cleanup finished"
        );
        report
    }
}

async fn clean_target(
    target: UploadTarget,
    cutoff: DateTime<Utc>,
    cancel: CancellationToken,
) -> TargetCleanup {
    let discovery = target.storage.discovery();
    let mut result = TargetCleanup {
        target: target.name.clone(),
        discovery,
        deleted: 0,
        failed: 0,
        error: None,
    };

    let expired = match target.storage.old_files(cutoff).await {
        Ok(expired) => expired,
        Err(e) => {
            error!(error = %e, "Failed to determine expired artifacts");
            result.error = Some(e.to_string());
            return result;
        }
    };
    info!(discovery = ?discovery, expired = expired.len(), "Found expired artifacts");

    for name in expired {
        if cancel.is_cancelled() {
            warn!(remaining_from = %name, "Cleanup cancelled");
            break;
        }

        match target.storage.delete(&name).await {
            Ok(()) => {
                info!(file = %name, "Deleted expired artifact");
                result.deleted += 1;
            }
            Err(e) => {
                error!(file = %name, error = %e, "Failed to delete expired artifact");
                result.failed += 1;
            }
        }
    }

    metrics::record_cleanup(&target.name, result.deleted, result.failed);
    result
}
