// Gzip compressor - flate2 streaming on the blocking pool

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::{CompressionError, Compressor};

/// Gzip file compressor
pub struct GzipCompressor {
    level: u32,
}

impl GzipCompressor {
    /// Best compression, matching what operators expect from nightly dumps
    pub fn new() -> Self {
        Self { level: 9 }
    }

    /// Compressor with an explicit level (0-9)
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9), // Max level is 9
        }
    }

    /// Configured compression level
    pub fn level(&self) -> u32 {
        self.level
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

fn io_err(context: &str, path: &Path) -> impl FnOnce(io::Error) -> CompressionError {
    let context = format!("{} {}", context, path.display());
    move |source| CompressionError::Io { context, source }
}

fn compress_file(source: &Path, destination: &Path, level: u32) -> Result<(), CompressionError> {
    let input = File::open(source).map_err(io_err("failed to open source", source))?;
    let output = File::create(destination).map_err(io_err("failed to create", destination))?;

    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::new(level));
    io::copy(&mut BufReader::new(input), &mut encoder)
        .map_err(io_err("failed to compress", source))?;
    encoder
        .finish()
        .and_then(|mut writer| writer.flush())
        .map_err(io_err("failed to finalize", destination))
}

fn decompress_file(source: &Path, destination: &Path) -> Result<(), CompressionError> {
    let input = File::open(source).map_err(io_err("failed to open source", source))?;
    let output = File::create(destination).map_err(io_err("failed to create", destination))?;

    let mut decoder = GzDecoder::new(BufReader::new(input));
    let mut writer = BufWriter::new(output);
    io::copy(&mut decoder, &mut writer).map_err(io_err("failed to decompress", source))?;
    writer.flush().map_err(io_err("failed to flush", destination))
}

async fn blocking<F>(job: F) -> Result<(), CompressionError>
where
    F: FnOnce() -> Result<(), CompressionError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| CompressionError::Task(e.to_string()))?
}

// Flags the blocking worker when the awaiting future is dropped before it finishes
struct Abandoned(Arc<AtomicBool>);

impl Drop for Abandoned {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Compressor for GzipCompressor {
    async fn compress(&self, source: &Path, destination: &Path) -> Result<(), CompressionError> {
        let (source, destination): (PathBuf, PathBuf) = (source.into(), destination.into());
        let level = self.level;
        let flag = Arc::new(AtomicBool::new(false));
        let _abandoned = Abandoned(Arc::clone(&flag));

        blocking(move || {
            let result = compress_file(&source, &destination, level);
            // Nobody will pick the output up: a cancelled caller has already cleaned its scratch files
            if flag.load(Ordering::SeqCst) {
                let _ = std::fs::remove_file(&destination);
            }
            result
        })
        .await
    }

    async fn decompress(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<(), CompressionError> {
        let (source, destination): (PathBuf, PathBuf) = (source.into(), destination.into());
        blocking(move || decompress_file(&source, &destination)).await
    }
}
