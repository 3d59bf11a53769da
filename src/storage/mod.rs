//! Storage destinations
//!
//! A [`Storage`] receives finished artifacts and later gives them back up for retention.
//! `old_files` is part of every backend's contract: backends that can ask their service
//! for objects older than a cutoff override it (Tier-1), everything else inherits the
//! default implementation which lists the destination and reads the timestamp out of
//! each artifact name (Tier-2).

mod local;
mod memory;
#[cfg(feature = "s3")]
mod s3;

pub use local::LocalStorage;
pub use memory::MemoryStorage;
#[cfg(feature = "s3")]
pub use s3::S3Storage;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backup::filename;
use crate::config::{TargetConfig, TargetKind};

/// How a backend finds expired artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Discovery {
    /// The backend answers "created before cutoff" itself
    Native,
    /// Timestamps are parsed out of artifact names
    FilenameScan,
}

/// Errors related to storage destinations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Upload did not complete
    #[error("upload of {name} failed: {message}")]
    Upload {
        /// Remote artifact name
        name: String,
        /// Backend error
        message: String,
    },

    /// The destination could not be listed
    #[error("listing failed: {0}")]
    List(String),

    /// A single artifact could not be deleted
    #[error("delete of {name} failed: {message}")]
    Delete {
        /// Remote artifact name
        name: String,
        /// Backend error
        message: String,
    },

    /// Remote names must be plain file names
    #[error("invalid remote name: {0}")]
    InvalidName(String),

    /// The destination could not be set up
    #[error("storage setup failed: {0}")]
    Setup(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One backup destination
#[async_trait]
pub trait Storage: Send + Sync {
    /// Copy the local file at `local_path` to the destination as `remote_name`
    async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<(), StorageError>;

    /// Names of every artifact at the destination
    async fn list(&self) -> Result<Vec<String>, StorageError>;

    /// Remove one artifact
    async fn delete(&self, remote_name: &str) -> Result<(), StorageError>;

    /// Artifacts created strictly before `cutoff`.
    ///
    /// Defaults to the filename scan; backends with a native age query override it
    /// together with [`Storage::discovery`].
    async fn old_files(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StorageError> {
        let names = self.list().await?;
        Ok(filename::expired_by_name(&names, cutoff))
    }

    /// Which discovery strategy `old_files` uses
    fn discovery(&self) -> Discovery {
        Discovery::FilenameScan
    }
}

/// Reject anything that could escape the destination root
pub(crate) fn validate_remote_name(name: &str) -> Result<(), StorageError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\');
    if invalid {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Build the destination described by `config`
pub async fn from_config(config: &TargetConfig) -> Result<Arc<dyn Storage>, StorageError> {
    match &config.kind {
        TargetKind::Local { path } => Ok(Arc::new(LocalStorage::new(path).await?)),
        TargetKind::Memory => Ok(Arc::new(MemoryStorage::new())),
        #[cfg(feature = "s3")]
        TargetKind::S3(s3_config) => Ok(Arc::new(S3Storage::new(s3_config.clone()).await?)),
        #[cfg(not(feature = "s3"))]
        TargetKind::S3(_) => Err(StorageError::Setup(
            "s3 targets require the `s3` feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_name_validation() {
        assert!(validate_remote_name("orders_mysql_20240305_020000.sql.gz").is_ok());
        assert!(validate_remote_name("../etc/passwd").is_err());
        assert!(validate_remote_name("a/b").is_err());
        assert!(validate_remote_name("").is_err());
        assert!(validate_remote_name("..").is_err());
    }

    #[tokio::test]
    async fn test_default_discovery_is_filename_scan() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.discovery(), Discovery::FilenameScan);
    }
}
