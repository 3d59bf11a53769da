// Local directory destination - Tier-1 retention through file modification times

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;

use super::{validate_remote_name, Discovery, Storage, StorageError};

/// Stores artifacts as plain files under a root directory
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Use `root` as the destination, creating it when missing
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::Setup(format!("failed to create {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    /// Destination directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where an artifact named `remote_name` lives
    pub fn path_of(&self, remote_name: &str) -> PathBuf {
        self.root.join(remote_name)
    }

    /// Regular files in the root with their modification time
    async fn entries(&self) -> Result<Vec<(String, DateTime<Utc>)>, StorageError> {
        let mut dir = fs::read_dir(&self.root)
            .await
            .map_err(|e| StorageError::List(format!("{}: {}", self.root.display(), e)))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StorageError::List(format!("{}: {}", self.root.display(), e)))?
        {
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| StorageError::List(format!("{:?}: {}", entry.file_name(), e)))?;
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let modified = metadata
                .modified()
                .map_err(|e| StorageError::List(format!("{}: {}", name, e)))?;
            entries.push((name, DateTime::<Utc>::from(modified)));
        }

        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<(), StorageError> {
        validate_remote_name(remote_name)?;
        fs::copy(local_path, self.path_of(remote_name))
            .await
            .map_err(|e| StorageError::Upload {
                name: remote_name.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries().await?.into_iter().map(|(name, _)| name).collect())
    }

    async fn delete(&self, remote_name: &str) -> Result<(), StorageError> {
        validate_remote_name(remote_name)?;
        fs::remove_file(self.path_of(remote_name))
            .await
            .map_err(|e| StorageError::Delete {
                name: remote_name.to_string(),
                message: e.to_string(),
            })
    }

    async fn old_files(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StorageError> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter(|(_, modified)| *modified < cutoff)
            .map(|(name, _)| name)
            .collect())
    }

    fn discovery(&self) -> Discovery {
        Discovery::Native
    }
}
