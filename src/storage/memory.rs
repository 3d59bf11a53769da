//! In-memory destination
//!
//! Holds artifacts in a map. It has no notion of creation time, so retention falls back
//! to the filename scan. Useful for dry runs and tests.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{validate_remote_name, Storage, StorageError};

/// Artifact store kept in process memory
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an artifact directly
    pub fn insert(&self, name: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.write().insert(name.into(), contents.into());
    }

    /// Contents of a stored artifact
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files.read().get(name).cloned()
    }

    /// Whether `name` is stored
    pub fn contains(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    /// Stored names in lexical order
    pub fn names(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<(), StorageError> {
        validate_remote_name(remote_name)?;
        let contents = tokio::fs::read(local_path)
            .await
            .map_err(|e| StorageError::Upload {
                name: remote_name.to_string(),
                message: e.to_string(),
            })?;
        self.insert(remote_name, contents);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.names())
    }

    async fn delete(&self, remote_name: &str) -> Result<(), StorageError> {
        self.files
            .write()
            .remove(remote_name)
            .map(|_| ())
            .ok_or_else(|| StorageError::Delete {
                name: remote_name.to_string(),
                message: "not found".to_string(),
            })
    }
}
