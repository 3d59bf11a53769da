// Integration tests for the backup pipeline
// Real gzip, real local and in-memory destinations; the database is scripted

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vaultkeeper::backup::{
    BackupError, BackupPipeline, PipelineStage, UploadStatus, UploadTarget,
};
use vaultkeeper::clock::FixedClock;
use vaultkeeper::compress::{CompressionError, Compressor, GzipCompressor};
use vaultkeeper::database::{Database, DatabaseError};
use vaultkeeper::storage::{LocalStorage, MemoryStorage, Storage, StorageError};

const DUMP: &str = "INSERT INTO orders VALUES (1, 'widget', 9.99);\n";

#[derive(Clone, Copy)]
enum Dump {
    Succeed,
    // Writes a partial file, then reports what the tool printed
    Fail,
    // Writes a partial file and never returns
    Hang,
}

struct ScriptedDatabase {
    name: &'static str,
    kind: &'static str,
    reachable: bool,
    dump: Dump,
    dumps: AtomicUsize,
}

impl ScriptedDatabase {
    fn new(kind: &'static str) -> Self {
        Self {
            name: "orders",
            kind,
            reachable: true,
            dump: Dump::Succeed,
            dumps: AtomicUsize::new(0),
        }
    }

    fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    fn dumping(mut self, dump: Dump) -> Self {
        self.dump = dump;
        self
    }
}

#[async_trait]
impl Database for ScriptedDatabase {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> &str {
        self.kind
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        if self.reachable {
            Ok(())
        } else {
            Err(DatabaseError::ToolFailed {
                tool: "mysql".to_string(),
                status: "exit status: 1".to_string(),
                output: "ERROR 2003 (HY000): Can't connect to MySQL server".to_string(),
            })
        }
    }

    async fn backup(&self, destination: &Path) -> Result<(), DatabaseError> {
        self.dumps.fetch_add(1, Ordering::SeqCst);
        match self.dump {
            Dump::Succeed => {
                tokio::fs::write(destination, DUMP.repeat(200)).await.unwrap();
                Ok(())
            }
            Dump::Fail => {
                tokio::fs::write(destination, "-- partial").await.unwrap();
                Err(DatabaseError::ToolFailed {
                    tool: "mysqldump".to_string(),
                    status: "exit status: 2".to_string(),
                    output: "mysqldump: Got error: 1045: Access denied for user 'backup'".to_string(),
                })
            }
            Dump::Hang => {
                tokio::fs::write(destination, "-- partial").await.unwrap();
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

/// Destination that refuses every upload
struct ReadOnlyStorage;

#[async_trait]
impl Storage for ReadOnlyStorage {
    async fn upload(&self, _: &Path, name: &str) -> Result<(), StorageError> {
        Err(StorageError::Upload {
            name: name.to_string(),
            message: "AccessDenied: bucket policy forbids PutObject".to_string(),
        })
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        Ok(Vec::new())
    }

    async fn delete(&self, _: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Destination whose uploads never complete
struct StalledStorage;

#[async_trait]
impl Storage for StalledStorage {
    async fn upload(&self, _: &Path, _: &str) -> Result<(), StorageError> {
        std::future::pending().await
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        Ok(Vec::new())
    }

    async fn delete(&self, _: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Writes half an archive, then runs out of disk
struct DiskFullCompressor;

#[async_trait]
impl Compressor for DiskFullCompressor {
    async fn compress(&self, _: &Path, destination: &Path) -> Result<(), CompressionError> {
        tokio::fs::write(destination, b"\x1f\x8b partial").await.unwrap();
        Err(CompressionError::Io {
            context: format!("writing {}", destination.display()),
            source: std::io::Error::new(std::io::ErrorKind::Other, "No space left on device"),
        })
    }

    async fn decompress(&self, _: &Path, _: &Path) -> Result<(), CompressionError> {
        unreachable!("the pipeline never decompresses")
    }
}

/// Real gzip that fires the run's token once the archive is written
struct CancelAfterCompress {
    cancel: CancellationToken,
}

#[async_trait]
impl Compressor for CancelAfterCompress {
    async fn compress(&self, source: &Path, destination: &Path) -> Result<(), CompressionError> {
        GzipCompressor::new().compress(source, destination).await?;
        self.cancel.cancel();
        Ok(())
    }

    async fn decompress(&self, source: &Path, destination: &Path) -> Result<(), CompressionError> {
        GzipCompressor::new().decompress(source, destination).await
    }
}

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 5, 2, 0, 0).unwrap()))
}

fn scratch_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

#[tokio::test]
async fn test_compressed_backup_reaches_every_target() {
    // The artifact is named from the clock, gzipped, and copied to both destinations
    let work = tempfile::tempdir().unwrap();
    let local_root = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryStorage::new());
    let local = Arc::new(LocalStorage::new(local_root.path()).await.unwrap());

    let pipeline = BackupPipeline::new(
        Arc::new(ScriptedDatabase::new("mysql")),
        vec![
            UploadTarget::new("memory", memory.clone()),
            UploadTarget::new("local", local.clone()),
        ],
    )
    .with_work_dir(work.path())
    .with_clock(clock());

    let report = pipeline
        .run(&CancellationToken::new())
        .await
        .expect("backup should succeed");

    assert_eq!(report.filename, "orders_mysql_20240305_020000.sql.gz");
    assert!(report.compressed);
    assert!(report.fully_replicated());
    assert_eq!(report.uploads.len(), 2);
    assert!(memory.contains("orders_mysql_20240305_020000.sql.gz"));

    // The copy at the local destination decompresses back to the dump
    let restored = work.path().join("restored.sql");
    GzipCompressor::new()
        .decompress(&local.path_of("orders_mysql_20240305_020000.sql.gz"), &restored)
        .await
        .expect("artifact should be valid gzip");
    assert_eq!(std::fs::read_to_string(&restored).unwrap(), DUMP.repeat(200));
    std::fs::remove_file(&restored).unwrap();

    assert!(scratch_is_empty(work.path()), "working directory must be left clean");
}

#[tokio::test]
async fn test_uncompressed_backup_keeps_native_extension() {
    // postgresql dumps keep `.dump` when compression is off
    let work = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryStorage::new());

    let report = BackupPipeline::new(
        Arc::new(ScriptedDatabase::new("postgresql")),
        vec![UploadTarget::new("memory", memory.clone())],
    )
    .with_compression(false)
    .with_work_dir(work.path())
    .with_clock(clock())
    .run(&CancellationToken::new())
    .await
    .expect("backup should succeed");

    assert_eq!(report.filename, "orders_postgresql_20240305_020000.dump");
    assert!(!report.compressed);
    assert_eq!(report.size_bytes, report.raw_size_bytes);
    assert_eq!(
        memory.get("orders_postgresql_20240305_020000.dump").unwrap(),
        DUMP.repeat(200).into_bytes()
    );
    assert!(scratch_is_empty(work.path()));
}

#[tokio::test]
async fn test_unreachable_database_never_dumps_or_uploads() {
    // A failed ping ends the run before any artifact exists
    let work = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryStorage::new());
    let database = Arc::new(ScriptedDatabase::new("mysql").unreachable());

    let err = BackupPipeline::new(
        database.clone(),
        vec![UploadTarget::new("memory", memory.clone())],
    )
    .with_work_dir(work.path())
    .run(&CancellationToken::new())
    .await
    .expect_err("unreachable database must fail the run");

    assert!(matches!(err, BackupError::Connectivity { .. }));
    assert_eq!(err.stage(), PipelineStage::ConnectivityCheck);
    assert_eq!(database.dumps.load(Ordering::SeqCst), 0);
    assert!(memory.names().is_empty());
    assert!(scratch_is_empty(work.path()));
}

#[tokio::test]
async fn test_dump_failure_carries_tool_output_and_cleans_up() {
    // The partial dump is removed and the tool's own message is surfaced
    let work = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryStorage::new());

    let err = BackupPipeline::new(
        Arc::new(ScriptedDatabase::new("mysql").dumping(Dump::Fail)),
        vec![UploadTarget::new("memory", memory.clone())],
    )
    .with_work_dir(work.path())
    .run(&CancellationToken::new())
    .await
    .expect_err("dump failure must fail the run");

    assert_eq!(err.stage(), PipelineStage::Dumping);
    assert!(err.to_string().contains("Access denied"));
    assert!(memory.names().is_empty());
    assert!(scratch_is_empty(work.path()));
}

#[tokio::test]
async fn test_failing_target_leaves_partial_replication() {
    // One destination refusing the upload does not fail the run or its siblings
    let work = tempfile::tempdir().unwrap();
    let first = Arc::new(MemoryStorage::new());
    let last = Arc::new(MemoryStorage::new());

    let report = BackupPipeline::new(
        Arc::new(ScriptedDatabase::new("mongodb")),
        vec![
            UploadTarget::new("primary", first.clone()),
            UploadTarget::new("s3", Arc::new(ReadOnlyStorage)),
            UploadTarget::new("secondary", last.clone()),
        ],
    )
    .with_work_dir(work.path())
    .with_clock(clock())
    .run(&CancellationToken::new())
    .await
    .expect("upload failures must not fail the run");

    assert_eq!(report.failed_targets(), vec!["s3"]);
    assert!(!report.fully_replicated());
    assert!(first.contains("orders_mongodb_20240305_020000.archive.gz"));
    assert!(last.contains("orders_mongodb_20240305_020000.archive.gz"));
    match &report.uploads[1].status {
        UploadStatus::Failed(message) => assert!(message.contains("AccessDenied")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(scratch_is_empty(work.path()));
}

#[tokio::test]
async fn test_cancellation_during_dump_removes_partial_artifact() {
    // Cancelling while the dump is running aborts it and leaves nothing behind
    let work = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let pipeline = BackupPipeline::new(
        Arc::new(ScriptedDatabase::new("mysql").dumping(Dump::Hang)),
        vec![UploadTarget::new("memory", Arc::new(MemoryStorage::new()))],
    )
    .with_work_dir(work.path());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = pipeline.run(&cancel).await.expect_err("cancelled run must fail");
    assert!(matches!(err, BackupError::Cancelled(PipelineStage::Dumping)));
    assert!(scratch_is_empty(work.path()));
}

#[tokio::test]
async fn test_stage_timeout_aborts_stuck_dump() {
    // A configured deadline turns a hung dump into a timeout
    let work = tempfile::tempdir().unwrap();
    let err = BackupPipeline::new(
        Arc::new(ScriptedDatabase::new("mysql").dumping(Dump::Hang)),
        vec![],
    )
    .with_work_dir(work.path())
    .with_stage_timeout(Some(Duration::from_millis(100)))
    .run(&CancellationToken::new())
    .await
    .expect_err("stuck dump must time out");

    match err {
        BackupError::Timeout { stage, timeout } => {
            assert_eq!(stage, PipelineStage::Dumping);
            assert_eq!(timeout, Duration::from_millis(100));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(scratch_is_empty(work.path()));
}

#[tokio::test]
async fn test_cancellation_during_upload_is_reported_per_target() {
    // Uploads observe the token; the completed sibling keeps its copy
    let work = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryStorage::new());
    let cancel = CancellationToken::new();

    let pipeline = BackupPipeline::new(
        Arc::new(ScriptedDatabase::new("mysql")),
        vec![
            UploadTarget::new("memory", memory.clone()),
            UploadTarget::new("stalled", Arc::new(StalledStorage)),
        ],
    )
    .with_work_dir(work.path())
    .with_clock(clock());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let report = pipeline.run(&cancel).await.expect("run reached the upload stage");
    assert_eq!(report.uploads[0].status, UploadStatus::Uploaded);
    assert_eq!(report.uploads[1].status, UploadStatus::Cancelled);
    assert!(memory.contains("orders_mysql_20240305_020000.sql.gz"));
    assert!(scratch_is_empty(work.path()));
}

#[tokio::test]
async fn test_upload_timeout_fails_only_that_target() {
    // The stage deadline also bounds each upload independently
    let work = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryStorage::new());

    let report = BackupPipeline::new(
        Arc::new(ScriptedDatabase::new("mysql")),
        vec![
            UploadTarget::new("stalled", Arc::new(StalledStorage)),
            UploadTarget::new("memory", memory.clone()),
        ],
    )
    .with_work_dir(work.path())
    .with_stage_timeout(Some(Duration::from_millis(200)))
    .run(&CancellationToken::new())
    .await
    .expect("upload timeouts must not fail the run");

    assert_eq!(report.failed_targets(), vec!["stalled"]);
    assert!(report.uploads[1].is_success());
    assert_eq!(memory.names().len(), 1);
}

#[tokio::test]
async fn test_compression_failure_uploads_nothing_and_discards_output() {
    // Both the raw dump and the half-written archive are removed
    let work = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryStorage::new());

    let err = BackupPipeline::new(
        Arc::new(ScriptedDatabase::new("mysql")),
        vec![UploadTarget::new("memory", memory.clone())],
    )
    .with_compressor(Arc::new(DiskFullCompressor))
    .with_work_dir(work.path())
    .with_clock(clock())
    .run(&CancellationToken::new())
    .await
    .expect_err("compression failure must fail the run");

    assert!(matches!(err, BackupError::Compression { .. }));
    assert_eq!(err.stage(), PipelineStage::Compressing);
    assert!(err.to_string().contains("No space left"));
    assert!(memory.names().is_empty());
    assert!(scratch_is_empty(work.path()));
}

#[tokio::test]
async fn test_cancel_after_compression_still_completes_the_run() {
    // Dump and compression succeeded, so the run is done; uploads report the cancel
    let work = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryStorage::new());
    let cancel = CancellationToken::new();

    let report = BackupPipeline::new(
        Arc::new(ScriptedDatabase::new("mysql")),
        vec![
            UploadTarget::new("memory", memory.clone()),
            UploadTarget::new("stalled", Arc::new(StalledStorage)),
        ],
    )
    .with_compressor(Arc::new(CancelAfterCompress {
        cancel: cancel.clone(),
    }))
    .with_work_dir(work.path())
    .with_clock(clock())
    .run(&cancel)
    .await
    .expect("a cancel after compression must not fail the run");

    assert_eq!(report.filename, "orders_mysql_20240305_020000.sql.gz");
    assert!(report.compressed);
    assert_eq!(report.uploads.len(), 2);
    assert!(report
        .uploads
        .iter()
        .all(|outcome| outcome.status == UploadStatus::Cancelled));
    assert!(memory.names().is_empty());
    assert!(scratch_is_empty(work.path()));
}

#[tokio::test]
async fn test_unusable_work_dir_fails_before_dumping() {
    // A working directory that is really a file is reported against the dump stage
    let scratch = tempfile::tempdir().unwrap();
    let occupied = scratch.path().join("not-a-directory");
    std::fs::write(&occupied, b"x").unwrap();
    let database = Arc::new(ScriptedDatabase::new("mysql"));

    let err = BackupPipeline::new(database.clone(), vec![])
        .with_work_dir(&occupied)
        .run(&CancellationToken::new())
        .await
        .expect_err("work dir setup must fail the run");

    assert!(matches!(
        err,
        BackupError::Io {
            stage: PipelineStage::Dumping,
            ..
        }
    ));
    assert_eq!(err.stage(), PipelineStage::Dumping);
    assert_eq!(database.dumps.load(Ordering::SeqCst), 0);
}
