use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use super::{run_tool, Database, DatabaseError};
use crate::config::DatabaseConfig;

/// MySQL / MariaDB via `mysqldump`
pub struct MySqlDatabase {
    config: DatabaseConfig,
}

impl MySqlDatabase {
    /// Adapter for one configured database
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    // Password goes through MYSQL_PWD so it never shows up in the process list
    fn command(&self, program: &str) -> Command {
        let mut command = Command::new(program);
        command
            .arg(format!("--host={}", self.config.host))
            .arg(format!("--port={}", self.config.port_or(3306)))
            .arg(format!("--user={}", self.config.username))
            .env("MYSQL_PWD", &self.config.password);
        command
    }
}

#[async_trait]
impl Database for MySqlDatabase {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> &str {
        "mysql"
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        let mut command = self.command("mysql");
        command.args(["-e", "SELECT 1"]);
        run_tool("mysql", command).await
    }

    async fn backup(&self, destination: &Path) -> Result<(), DatabaseError> {
        let mut command = self.command("mysqldump");
        command
            .args([
                "--single-transaction",
                "--quick",
                "--lock-tables=false",
                "--routines",
                "--triggers",
                "--events",
            ])
            .arg(format!("--result-file={}", destination.display()))
            .arg(&self.config.database);
        run_tool("mysqldump", command).await
    }
}
