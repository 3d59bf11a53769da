//! Database capabilities
//!
//! Each backend wraps its vendor dump tool (`mysqldump`, `pg_dump`, `mongodump`) and a
//! matching client for the connectivity probe. The tools run as child processes that are
//! killed when the calling future is dropped, so cancelling a pipeline run also stops the
//! dump in flight.

mod mongodb;
mod mysql;
mod postgresql;

pub use mongodb::MongoDatabase;
pub use mysql::MySqlDatabase;
pub use postgresql::PostgresDatabase;

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::config::DatabaseConfig;

/// Errors raised by database capabilities
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// The tool binary could not be started
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        /// Executable name
        tool: String,
        /// Underlying launch error
        #[source]
        source: std::io::Error,
    },

    /// The tool ran and reported failure; `output` holds what it printed
    #[error("{tool} exited with {status}: {output}")]
    ToolFailed {
        /// Executable name
        tool: String,
        /// Exit status description
        status: String,
        /// Captured stdout and stderr
        output: String,
    },

    /// No capability exists for this database type
    #[error("unsupported database type: {0}")]
    Unsupported(String),
}

/// Dump and connectivity provider for one configured database
#[async_trait]
pub trait Database: Send + Sync {
    /// Configured database name, used in artifact names and logs
    fn name(&self) -> &str;

    /// Database type (`mysql`, `postgresql`, `mongodb`, ...)
    fn kind(&self) -> &str;

    /// Check that the server accepts connections
    async fn ping(&self) -> Result<(), DatabaseError>;

    /// Write a full dump to `destination`
    async fn backup(&self, destination: &Path) -> Result<(), DatabaseError>;
}

/// Build the capability matching `config.kind`
pub fn from_config(config: &DatabaseConfig) -> Result<Arc<dyn Database>, DatabaseError> {
    match config.kind.as_str() {
        "mysql" => Ok(Arc::new(MySqlDatabase::new(config.clone()))),
        "postgresql" => Ok(Arc::new(PostgresDatabase::new(config.clone()))),
        "mongodb" => Ok(Arc::new(MongoDatabase::new(config.clone()))),
        other => Err(DatabaseError::Unsupported(other.to_string())),
    }
}

/// Run `command` to completion, turning a non-zero exit into `ToolFailed` with the
/// combined output attached.
pub(crate) async fn run_tool(tool: &str, mut command: Command) -> Result<(), DatabaseError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = command.output().await.map_err(|source| DatabaseError::Spawn {
        tool: tool.to_string(),
        source,
    })?;

    if output.status.success() {
        return Ok(());
    }

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    Err(DatabaseError::ToolFailed {
        tool: tool.to_string(),
        status: output.status.to_string(),
        output: combined.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kind: &str) -> DatabaseConfig {
        DatabaseConfig {
            name: "orders".into(),
            kind: kind.into(),
            host: "localhost".into(),
            ..DatabaseConfig::default()
        }
    }

    #[test]
    fn test_from_config_selects_backend() {
        assert_eq!(from_config(&config("mysql")).unwrap().kind(), "mysql");
        assert_eq!(from_config(&config("postgresql")).unwrap().kind(), "postgresql");
        assert_eq!(from_config(&config("mongodb")).unwrap().kind(), "mongodb");
        assert!(matches!(
            from_config(&config("oracle")),
            Err(DatabaseError::Unsupported(kind)) if kind == "oracle"
        ));
    }

    #[tokio::test]
    async fn test_run_tool_reports_missing_binary() {
        let err = run_tool(
            "definitely-not-a-dump-tool",
            Command::new("definitely-not-a-dump-tool"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DatabaseError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_captures_output_on_failure() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo access denied >&2; exit 2"]);

        let err = run_tool("sh", command).await.unwrap_err();
        match err {
            DatabaseError::ToolFailed { output, .. } => assert_eq!(output, "access denied"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
