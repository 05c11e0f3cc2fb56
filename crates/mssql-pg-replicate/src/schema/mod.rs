//! Schema replication: recreate each source table in PostgreSQL.

mod ddl;

pub use ddl::{create_schema_sql, create_table_sql, drop_table_sql, target_table_name};

use crate::error::{ReplicateError, Result};
use crate::orchestrator::{TableOutcome, TablePhase};
use crate::source::{SourceConnection, TableDescriptor, TableRef};
use crate::state::{Phase, ProgressStore};
use crate::target::TargetConnection;
use crate::typemap::map_columns;
use async_trait::async_trait;
use tracing::{error, info, warn};

/// Recreates source tables in the target, one transaction per table.
pub struct SchemaReplicator<'a, S: ?Sized, T: ?Sized> {
    source: &'a mut S,
    target: &'a mut T,
    target_schema: String,
}

impl<'a, S, T> SchemaReplicator<'a, S, T>
where
    S: SourceConnection + ?Sized,
    T: TargetConnection + ?Sized,
{
    pub fn new(source: &'a mut S, target: &'a mut T, target_schema: impl Into<String>) -> Self {
        Self {
            source,
            target,
            target_schema: target_schema.into(),
        }
    }

    /// Create the target schema if it does not exist yet.
    pub async fn ensure_target_schema(&mut self) -> Result<()> {
        self.target
            .execute(&create_schema_sql(&self.target_schema))
            .await?;
        Ok(())
    }

    /// Replicate one table, returning whether it succeeded.
    ///
    /// Table-level failures are recorded in `progress` and reported as
    /// `false`; only a progress write failure is returned as an error.
    pub async fn replicate_table(
        &mut self,
        table: &TableRef,
        progress: &mut ProgressStore,
    ) -> Result<bool> {
        Ok(self.replicate(table, progress).await?.is_completed())
    }

    async fn replicate(
        &mut self,
        table: &TableRef,
        progress: &mut ProgressStore,
    ) -> Result<TableOutcome> {
        let key = table.progress_key();
        progress.mark_started(key, Phase::Schema)?;

        match self.create_table(table).await {
            Ok(()) => {
                progress.mark_completed(key, Phase::Schema, 0)?;
                Ok(TableOutcome::Completed { rows_synced: 0 })
            }
            Err(e) => {
                if let Err(rollback_err) = self.target.rollback().await {
                    warn!("Rollback after failure on {} failed: {}", table, rollback_err);
                }
                let message = e.to_string();
                error!("Schema replication failed for {}: {}", table, message);
                progress.mark_failed(key, Phase::Schema, &message, 0)?;
                Ok(TableOutcome::Failed {
                    rows_synced: 0,
                    error: message,
                })
            }
        }
    }

    async fn create_table(&mut self, table: &TableRef) -> Result<()> {
        let columns = self.source.describe_columns(table).await?;
        if columns.is_empty() {
            return Err(ReplicateError::table(table.full_name(), "no columns found"));
        }

        let descriptor = TableDescriptor::new(table, columns);
        let specs = map_columns(&descriptor);
        let target_table = target_table_name(&self.target_schema, &table.name);
        let pk: Vec<&str> = specs
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.target_name.as_str())
            .collect();

        self.target.begin().await?;
        self.target.execute(&drop_table_sql(&target_table)).await?;
        self.target
            .execute(&create_table_sql(&target_table, &specs))
            .await?;
        self.target.commit().await?;

        info!(
            "Created {} ({} columns, primary key: {})",
            target_table,
            specs.len(),
            if pk.is_empty() { "none".to_string() } else { pk.join(", ") }
        );
        Ok(())
    }
}

#[async_trait]
impl<'a, S, T> TablePhase for SchemaReplicator<'a, S, T>
where
    S: SourceConnection + ?Sized,
    T: TargetConnection + ?Sized,
{
    fn phase(&self) -> Phase {
        Phase::Schema
    }

    async fn process(
        &mut self,
        table: &TableRef,
        progress: &mut ProgressStore,
    ) -> Result<TableOutcome> {
        self.replicate(table, progress).await
    }
}
