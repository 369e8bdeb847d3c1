//! Destination table commands.
//!
//! The spatial store is external state addressed by database name. Tables
//! are append-only sinks: `ogr2ogr -append` creates a table on first write
//! with a schema inferred from the input layer, and concurrent row appends
//! are store-safe. Table *creation* is not atomic across concurrent
//! writers, which is why the tile runner retries the persist stages once
//! (see [`crate::pipeline`]).

use crate::exec::{CommandError, CommandRunner, StageCommand};
use std::path::Path;
use tracing::info;

/// Builds the external commands that touch the destination store.
#[derive(Debug, Clone)]
pub struct SpatialStore {
    db_name: String,
}

impl SpatialStore {
    pub fn new(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
        }
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// OGR connection string for the destination database.
    pub fn connection(&self) -> String {
        format!("PG:dbname={}", self.db_name)
    }

    /// `DROP TABLE IF EXISTS "table"` via psql.
    pub fn drop_table(&self, table: &str) -> StageCommand {
        StageCommand::new(
            "psql",
            [
                self.db_name.clone(),
                "-c".to_string(),
                format!("DROP TABLE IF EXISTS \"{}\"", table),
            ],
        )
    }

    /// Append a vector layer into `table`, creating it on first write.
    ///
    /// `simplify` applies the store-side geometry simplification tolerance.
    pub fn append(&self, src: &Path, table: &str, simplify: Option<f64>) -> StageCommand {
        let mut args = vec![
            "-f".to_string(),
            "PostgreSQL".to_string(),
            self.connection(),
            src.display().to_string(),
            "-append".to_string(),
            "-nln".to_string(),
            table.to_string(),
        ];
        if let Some(tolerance) = simplify {
            args.push("-simplify".to_string());
            args.push(tolerance.to_string());
        }
        StageCommand::new("ogr2ogr", args)
    }

    /// Drops the given tables. Issued only before dispatch begins; the
    /// scheduler never clears tables while tiles are writing.
    pub async fn clear<R: CommandRunner>(
        &self,
        runner: &R,
        tables: &[&str],
    ) -> Result<(), CommandError> {
        for table in tables {
            info!(table = *table, db = %self.db_name, "Dropping destination table");
            runner.run(self.drop_table(table)).await?;
        }
        Ok(())
    }
}
