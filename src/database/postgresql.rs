use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use super::{run_tool, Database, DatabaseError};
use crate::config::DatabaseConfig;

/// PostgreSQL via `pg_dump` in custom format
pub struct PostgresDatabase {
    config: DatabaseConfig,
}

impl PostgresDatabase {
    /// Adapter for one configured database
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    fn command(&self, program: &str) -> Command {
        let mut command = Command::new(program);
        command
            .arg(format!("--host={}", self.config.host))
            .arg(format!("--port={}", self.config.port_or(5432)))
            .arg(format!("--username={}", self.config.username))
            .arg("--no-password")
            .env("PGPASSWORD", &self.config.password);
        if let Some(ssl_mode) = &self.config.ssl_mode {
            command.env("PGSSLMODE", ssl_mode);
        }
        command
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> &str {
        "postgresql"
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        let mut command = self.command("psql");
        command
            .arg(format!("--dbname={}", self.config.database))
            .args(["-c", "SELECT 1"]);
        run_tool("psql", command).await
    }

    async fn backup(&self, destination: &Path) -> Result<(), DatabaseError> {
        let mut command = self.command("pg_dump");
        command
            .args(["--format=custom", "--compress=9"])
            .arg(format!("--file={}", destination.display()))
            .arg(&self.config.database);
        run_tool("pg_dump", command).await
    }
}
