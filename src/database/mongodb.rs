use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use super::{run_tool, Database, DatabaseError};
use crate::config::DatabaseConfig;

/// MongoDB via `mongodump --archive`
pub struct MongoDatabase {
    config: DatabaseConfig,
}

impl MongoDatabase {
    /// Adapter for one configured database
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    fn uri(&self) -> String {
        // Userinfo must be percent-encoded or `@ : /` in a password breaks the URI
        let mut uri = format!(
            "mongodb://{}:{}@{}:{}/{}",
            urlencoding::encode(&self.config.username),
            urlencoding::encode(&self.config.password),
            self.config.host,
            self.config.port_or(27017),
            self.config.database
        );
        if let Some(auth_db) = &self.config.auth_database {
            uri.push_str("?authSource=");
            uri.push_str(&urlencoding::encode(auth_db));
        }
        uri
    }
}

#[async_trait]
impl Database for MongoDatabase {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> &str {
        "mongodb"
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        let mut command = Command::new("mongosh");
        command
            .arg(self.uri())
            .args(["--quiet", "--eval", "db.runCommand({ ping: 1 })"]);
        run_tool("mongosh", command).await
    }

    async fn backup(&self, destination: &Path) -> Result<(), DatabaseError> {
        let mut command = Command::new("mongodump");
        command
            .arg(format!("--uri={}", self.uri()))
            .arg(format!("--archive={}", destination.display()))
            .arg("--gzip");
        run_tool("mongodump", command).await
    }
}
