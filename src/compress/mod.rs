//! Artifact compression

mod gzip;

pub use gzip::GzipCompressor;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while (de)compressing an artifact
#[derive(Error, Debug)]
pub enum CompressionError {
    /// Reading the source or writing the destination failed
    #[error("{context}: {source}")]
    Io {
        /// What was being done
        context: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The blocking worker died
    #[error("compression task failed: {0}")]
    Task(String),
}

/// File-to-file stream compressor
#[async_trait]
pub trait Compressor: Send + Sync {
    /// Compress `source` into `destination`
    async fn compress(&self, source: &Path, destination: &Path) -> Result<(), CompressionError>;

    /// Inverse of [`Compressor::compress`]; used by restore tooling, not by the pipeline
    async fn decompress(&self, source: &Path, destination: &Path)
        -> Result<(), CompressionError>;
}
