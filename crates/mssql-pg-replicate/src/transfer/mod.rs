//! Data transfer: full reload of each table in fixed-size batches.
//!
//! Each table is truncated inside the same transaction as its first batch,
//! so re-running a table always yields a clean load. Every full batch is
//! committed on its own; on failure the open transaction is rolled back and
//! the rows committed so far are recorded with the failure.

use crate::config::Config;
use crate::error::{ReplicateError, Result};
use crate::orchestrator::{TableOutcome, TablePhase};
use crate::schema::target_table_name;
use crate::source::{build_select_query, ColumnDescriptor, SourceConnection, TableRef};
use crate::state::{Phase, ProgressStore};
use crate::target::{InsertTarget, SqlValue, TargetConnection};
use crate::typemap::{mssql_to_postgres, target_ident};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Settings for a data run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSyncOptions {
    /// Rows per committed batch.
    pub batch_size: usize,

    /// Truncate the target table before loading.
    pub truncate: bool,

    /// Source columns whose values are passed as strings into UUID columns.
    pub uuid_columns: Vec<String>,

    /// Source columns whose values are serialized as JSON text.
    pub json_columns: Vec<String>,

    /// Target schema the tables live in.
    pub target_schema: String,
}

impl DataSyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.replication.batch_size,
            truncate: config.replication.truncate,
            uuid_columns: config.replication.uuid_columns.clone(),
            json_columns: config.replication.json_columns.clone(),
            target_schema: config.target.schema.clone(),
        }
    }
}

impl Default for DataSyncOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            truncate: true,
            uuid_columns: Vec::new(),
            json_columns: Vec::new(),
            target_schema: "dbo".to_string(),
        }
    }
}

/// Per-column value rewrite applied before insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueTransform {
    PassThrough,
    /// Send the value as a string.
    Text,
    /// Serialize non-string values as JSON text.
    Json,
}

impl ValueTransform {
    /// Pick the rewrite for a column. Configured UUID columns take precedence
    /// over JSON columns, which take precedence over type-based rules.
    pub fn for_column(column: &ColumnDescriptor, options: &DataSyncOptions) -> Self {
        let listed = |names: &[String]| names.iter().any(|n| n.eq_ignore_ascii_case(&column.name));

        if listed(&options.uuid_columns) {
            ValueTransform::Text
        } else if listed(&options.json_columns) {
            ValueTransform::Json
        } else if column.is_uniqueidentifier() || column.is_timezone_aware() {
            ValueTransform::Text
        } else {
            ValueTransform::PassThrough
        }
    }
}

/// Rewrite a single value. NULL always stays NULL.
pub fn transform_value(value: SqlValue, transform: ValueTransform) -> SqlValue {
    match (transform, value) {
        (_, SqlValue::Null) => SqlValue::Null,
        (ValueTransform::PassThrough, value) => value,
        (_, SqlValue::String(s)) => SqlValue::String(s),
        (ValueTransform::Text, value) => value
            .to_param_text()
            .map(SqlValue::String)
            .unwrap_or(SqlValue::Null),
        (ValueTransform::Json, value) => SqlValue::String(value.to_json().to_string()),
    }
}

/// Timing of one table load.
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    /// Rows committed to the target.
    pub rows: u64,

    /// Batches committed.
    pub batches: u64,

    /// Time spent waiting on the source.
    pub read_time: Duration,

    /// Time spent inserting and committing.
    pub write_time: Duration,
}

/// Copies rows of source tables into their pre-created target tables.
pub struct DataSyncer<'a, S: ?Sized, T: ?Sized> {
    source: &'a mut S,
    target: &'a mut T,
    options: DataSyncOptions,
}

impl<'a, S, T> DataSyncer<'a, S, T>
where
    S: SourceConnection + ?Sized,
    T: TargetConnection + ?Sized,
{
    pub fn new(source: &'a mut S, target: &'a mut T, options: DataSyncOptions) -> Self {
        Self {
            source,
            target,
            options,
        }
    }

    /// Load one table and return the rows committed.
    ///
    /// On failure the table is recorded as failed with the rows committed
    /// before the error, and that partial count is returned. Only a progress
    /// write failure is returned as an error.
    pub async fn sync_table(
        &mut self,
        table: &TableRef,
        columns: &[ColumnDescriptor],
        progress: &mut ProgressStore,
    ) -> Result<u64> {
        progress.mark_started(table.progress_key(), Phase::Data)?;
        Ok(self.load_and_record(table, columns, progress).await?.rows_synced())
    }

    async fn load_and_record(
        &mut self,
        table: &TableRef,
        columns: &[ColumnDescriptor],
        progress: &mut ProgressStore,
    ) -> Result<TableOutcome> {
        let key = table.progress_key();
        let mut stats = TransferStats::default();

        match self.load(table, columns, &mut stats).await {
            Ok(()) => {
                info!(
                    "Synced {} rows into {} ({} batches, read {:?}, write {:?})",
                    stats.rows,
                    target_table_name(&self.options.target_schema, &table.name),
                    stats.batches,
                    stats.read_time,
                    stats.write_time
                );
                progress.mark_completed(key, Phase::Data, stats.rows)?;
                Ok(TableOutcome::Completed {
                    rows_synced: stats.rows,
                })
            }
            Err(e) => self.record_failure(table, e, stats.rows, progress).await,
        }
    }

    async fn record_failure(
        &mut self,
        table: &TableRef,
        err: ReplicateError,
        rows_synced: u64,
        progress: &mut ProgressStore,
    ) -> Result<TableOutcome> {
        if let Err(rollback_err) = self.target.rollback().await {
            warn!("Rollback after failure on {} failed: {}", table, rollback_err);
        }
        let message = err.to_string();
        error!(
            "Data sync failed for {} after {} rows: {}",
            table, rows_synced, message
        );
        progress.mark_failed(table.progress_key(), Phase::Data, &message, rows_synced)?;
        Ok(TableOutcome::Failed {
            rows_synced,
            error: message,
        })
    }

    async fn load(
        &mut self,
        table: &TableRef,
        columns: &[ColumnDescriptor],
        stats: &mut TransferStats,
    ) -> Result<()> {
        if columns.is_empty() {
            return Err(ReplicateError::table(table.full_name(), "no columns found"));
        }

        let target_table = target_table_name(&self.options.target_schema, &table.name);
        let insert = InsertTarget {
            table: target_table.clone(),
            columns: columns.iter().map(|c| target_ident(&c.name)).collect(),
            column_types: columns
                .iter()
                .map(|c| mssql_to_postgres(&c.source_type, c.max_length, c.precision, c.scale))
                .collect(),
        };
        let transforms: Vec<ValueTransform> = columns
            .iter()
            .map(|c| ValueTransform::for_column(c, &self.options))
            .collect();
        let query = build_select_query(table, columns);
        let batch_size = self.options.batch_size.max(1);

        self.target.begin().await?;
        if self.options.truncate {
            self.target
                .execute(&format!("TRUNCATE TABLE {} CASCADE", target_table))
                .await?;
        }

        let mut rows = self.source.stream_rows(&query, columns).await?;
        let mut batch: Vec<Vec<SqlValue>> = Vec::with_capacity(batch_size);

        loop {
            let read_start = Instant::now();
            let next = rows.next().await;
            stats.read_time += read_start.elapsed();

            let Some(row) = next else { break };
            let row = row?;
            batch.push(
                row.into_iter()
                    .zip(&transforms)
                    .map(|(value, transform)| transform_value(value, *transform))
                    .collect(),
            );

            if batch.len() >= batch_size {
                let write_start = Instant::now();
                self.target.insert_batch(&insert, &batch).await?;
                self.target.commit().await?;
                stats.write_time += write_start.elapsed();
                stats.rows += batch.len() as u64;
                stats.batches += 1;
                batch.clear();
                debug!("{}: {} rows synced", target_table, stats.rows);
                self.target.begin().await?;
            }
        }

        let write_start = Instant::now();
        if !batch.is_empty() {
            self.target.insert_batch(&insert, &batch).await?;
        }
        self.target.commit().await?;
        stats.write_time += write_start.elapsed();
        if !batch.is_empty() {
            stats.rows += batch.len() as u64;
            stats.batches += 1;
        }

        Ok(())
    }
}

#[async_trait]
impl<'a, S, T> TablePhase for DataSyncer<'a, S, T>
where
    S: SourceConnection + ?Sized,
    T: TargetConnection + ?Sized,
{
    fn phase(&self) -> Phase {
        Phase::Data
    }

    async fn process(
        &mut self,
        table: &TableRef,
        progress: &mut ProgressStore,
    ) -> Result<TableOutcome> {
        progress.mark_started(table.progress_key(), Phase::Data)?;
        match self.source.describe_columns(table).await {
            Ok(columns) => self.load_and_record(table, &columns, progress).await,
            Err(e) => self.record_failure(table, e, 0, progress).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PhaseStatus;
    use crate::testing::{column, id_rows, FakeSource, FakeTarget};
    use tempfile::tempdir;

    fn options(batch_size: usize) -> DataSyncOptions {
        DataSyncOptions {
            batch_size,
            ..DataSyncOptions::default()
        }
    }

    fn orders_source(rows: i32) -> FakeSource {
        FakeSource::new().with_table(
            "dbo",
            "Orders",
            vec![column("OrderID", "int", 4, true)],
            id_rows(rows),
        )
    }

    #[test]
    fn test_transform_rules() {
        let guid = uuid::Uuid::parse_str("3F2504E0-4F89-11D3-9A0C-0305E82C3301").unwrap();
        assert_eq!(
            transform_value(SqlValue::Uuid(guid), ValueTransform::Text),
            SqlValue::String("3F2504E0-4F89-11D3-9A0C-0305E82C3301".into())
        );
        assert_eq!(
            transform_value(SqlValue::String("{\"a\":1}".into()), ValueTransform::Json),
            SqlValue::String("{\"a\":1}".into())
        );
        assert_eq!(
            transform_value(SqlValue::I32(5), ValueTransform::Json),
            SqlValue::String("5".into())
        );
        assert_eq!(transform_value(SqlValue::Null, ValueTransform::Text), SqlValue::Null);
        assert_eq!(
            transform_value(SqlValue::I64(9), ValueTransform::PassThrough),
            SqlValue::I64(9)
        );
    }

    #[test]
    fn test_transform_selection() {
        let opts = DataSyncOptions {
            uuid_columns: vec!["ExternalRef".into()],
            json_columns: vec!["payload".into()],
            ..DataSyncOptions::default()
        };
        assert_eq!(
            ValueTransform::for_column(&column("externalref", "varchar", 36, false), &opts),
            ValueTransform::Text
        );
        assert_eq!(
            ValueTransform::for_column(&column("Payload", "nvarchar", -1, false), &opts),
            ValueTransform::Json
        );
        assert_eq!(
            ValueTransform::for_column(&column("RowGuid", "uniqueidentifier", 16, false), &opts),
            ValueTransform::Text
        );
        assert_eq!(
            ValueTransform::for_column(&column("CreatedAt", "datetimeoffset", 10, false), &opts),
            ValueTransform::Text
        );
        assert_eq!(
            ValueTransform::for_column(&column("Qty", "int", 4, false), &opts),
            ValueTransform::PassThrough
        );
    }

    #[tokio::test]
    async fn test_uniqueidentifier_string_passes_through_unchanged() {
        let dir = tempdir().unwrap();
        let mut progress = ProgressStore::open(dir.path().join("p.json"));
        let guid = "3F2504E0-4F89-11D3-9A0C-0305E82C3301";
        let mut source = FakeSource::new().with_table(
            "dbo",
            "Devices",
            vec![column("DeviceGuid", "uniqueidentifier", 16, true)],
            vec![vec![SqlValue::String(guid.into())]],
        );
        let mut target = FakeTarget::new();

        let mut syncer = DataSyncer::new(&mut source, &mut target, options(10));
        let columns = vec![column("DeviceGuid", "uniqueidentifier", 16, true)];
        let rows = syncer
            .sync_table(&TableRef::new("dbo", "Devices"), &columns, &mut progress)
            .await
            .unwrap();

        assert_eq!(rows, 1);
        assert_eq!(
            target.committed["dbo.devices"],
            vec![vec![SqlValue::String(guid.into())]]
        );
        assert_eq!(target.inserts[0].column_types, vec!["UUID".to_string()]);
        assert_eq!(target.inserts[0].columns, vec!["device_guid".to_string()]);
    }

    #[tokio::test]
    async fn test_fixed_length_columns_are_inserted_without_a_length_cast() {
        let dir = tempdir().unwrap();
        let mut progress = ProgressStore::open(dir.path().join("p.json"));
        let columns = vec![
            column("Code", "char", 10, true),
            column("Label", "varchar", 20, false),
        ];
        let mut source = FakeSource::new().with_table(
            "dbo",
            "Codes",
            columns.clone(),
            vec![vec![
                SqlValue::String("ABCDEFGH".into()),
                SqlValue::String("eight".into()),
            ]],
        );
        let mut target = FakeTarget::new();

        let mut syncer = DataSyncer::new(&mut source, &mut target, options(10));
        syncer
            .sync_table(&TableRef::new("dbo", "Codes"), &columns, &mut progress)
            .await
            .unwrap();

        let insert = &target.inserts[0];
        assert_eq!(insert.column_types, vec!["CHAR(5)".to_string(), "VARCHAR(20)".to_string()]);
        let sql = insert.insert_sql(1);
        assert!(sql.contains("$1::text::BPCHAR"));
        assert!(sql.contains("$2::text::VARCHAR"));
        assert!(!sql.contains("CHAR(5)"));
        assert!(!sql.contains("VARCHAR(20)"));
    }

    #[tokio::test]
    async fn test_batches_commit_and_remainder_flushes() {
        let dir = tempdir().unwrap();
        let mut progress = ProgressStore::open(dir.path().join("p.json"));
        let mut source = orders_source(5);
        let mut target = FakeTarget::new();

        let mut syncer = DataSyncer::new(&mut source, &mut target, options(2));
        let rows = syncer
            .process(&TableRef::new("dbo", "Orders"), &mut progress)
            .await
            .unwrap()
            .rows_synced();

        assert_eq!(rows, 5);
        assert_eq!(target.rows("dbo.orders"), 5);
        assert_eq!(target.inserts.len(), 3);
        assert_eq!(target.commits, 3);
        assert_eq!(
            target.executed,
            vec!["TRUNCATE TABLE dbo.orders CASCADE".to_string()]
        );
        let record = progress.record("Orders", Phase::Data).unwrap();
        assert_eq!(record.status, PhaseStatus::Completed);
        assert_eq!(record.rows_synced, 5);
    }

    #[tokio::test]
    async fn test_retry_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut progress = ProgressStore::open(dir.path().join("p.json"));
        let mut source = orders_source(7);
        let mut target = FakeTarget::new();
        let table = TableRef::new("dbo", "Orders");

        let mut syncer = DataSyncer::new(&mut source, &mut target, options(3));
        let first = syncer.process(&table, &mut progress).await.unwrap().rows_synced();
        let second = syncer.process(&table, &mut progress).await.unwrap().rows_synced();

        assert_eq!(first, 7);
        assert_eq!(second, 7);
        assert_eq!(target.rows("dbo.orders"), 7);
    }

    #[tokio::test]
    async fn test_no_truncate_appends() {
        let dir = tempdir().unwrap();
        let mut progress = ProgressStore::open(dir.path().join("p.json"));
        let mut source = orders_source(2);
        let mut target = FakeTarget::new();
        let table = TableRef::new("dbo", "Orders");
        let opts = DataSyncOptions {
            truncate: false,
            ..options(10)
        };

        let mut syncer = DataSyncer::new(&mut source, &mut target, opts);
        syncer.process(&table, &mut progress).await.unwrap();
        syncer.process(&table, &mut progress).await.unwrap();

        assert!(target.executed.is_empty());
        assert_eq!(target.rows("dbo.orders"), 4);
    }

    #[tokio::test]
    async fn test_insert_failure_records_committed_rows() {
        let dir = tempdir().unwrap();
        let mut progress = ProgressStore::open(dir.path().join("p.json"));
        let mut source = orders_source(9);
        let mut target = FakeTarget::new().fail_insert_beyond("dbo.orders", 5, "value too long");

        let mut syncer = DataSyncer::new(&mut source, &mut target, options(2));
        let outcome = syncer
            .process(&TableRef::new("dbo", "Orders"), &mut progress)
            .await
            .unwrap();

        assert!(!outcome.is_completed());
        assert_eq!(outcome.rows_synced(), 4);
        assert_eq!(target.rows("dbo.orders"), 4);
        assert_eq!(target.rollbacks, 1);
        let record = progress.record("Orders", Phase::Data).unwrap();
        assert_eq!(record.status, PhaseStatus::Failed);
        assert_eq!(record.rows_synced, 4);
        assert!(record.error.as_deref().unwrap().contains("value too long"));
    }

    #[tokio::test]
    async fn test_read_failure_rolls_back_open_batch() {
        let dir = tempdir().unwrap();
        let mut progress = ProgressStore::open(dir.path().join("p.json"));
        let mut source = orders_source(10).fail_stream_after("Orders", 3, "connection reset");
        let mut target = FakeTarget::new();

        let mut syncer = DataSyncer::new(&mut source, &mut target, options(2));
        let rows = syncer
            .sync_table(
                &TableRef::new("dbo", "Orders"),
                &[column("OrderID", "int", 4, true)],
                &mut progress,
            )
            .await
            .unwrap();

        assert_eq!(rows, 2);
        assert_eq!(target.rows("dbo.orders"), 2);
        assert!(!target.in_transaction());
        assert_eq!(progress.status("Orders", Phase::Data), Some(PhaseStatus::Failed));
    }

    #[tokio::test]
    async fn test_empty_table_still_truncates() {
        let dir = tempdir().unwrap();
        let mut progress = ProgressStore::open(dir.path().join("p.json"));
        let mut source = orders_source(0);
        let mut target = FakeTarget::new();
        target.committed.insert("dbo.orders".into(), id_rows(3));

        let mut syncer = DataSyncer::new(&mut source, &mut target, options(2));
        let rows = syncer
            .process(&TableRef::new("dbo", "Orders"), &mut progress)
            .await
            .unwrap()
            .rows_synced();

        assert_eq!(rows, 0);
        assert_eq!(target.rows("dbo.orders"), 0);
        assert!(progress.is_completed("Orders", Phase::Data));
    }

    #[tokio::test]
    async fn test_offset_columns_are_projected_as_text() {
        let dir = tempdir().unwrap();
        let mut progress = ProgressStore::open(dir.path().join("p.json"));
        let columns = vec![
            column("EventID", "int", 4, true),
            column("OccurredAt", "datetimeoffset", 10, false),
        ];
        let mut source = FakeSource::new().with_table(
            "dbo",
            "Events",
            columns.clone(),
            vec![vec![
                SqlValue::I32(1),
                SqlValue::String("2024-03-01T12:00:00.0000000+02:00".into()),
            ]],
        );
        let mut target = FakeTarget::new();

        let mut syncer = DataSyncer::new(&mut source, &mut target, options(10));
        syncer
            .sync_table(&TableRef::new("dbo", "Events"), &columns, &mut progress)
            .await
            .unwrap();

        assert!(source.queries[0].contains("CONVERT(VARCHAR(50), [OccurredAt], 127)"));
        assert_eq!(target.inserts[0].column_types[1], "TIMESTAMPTZ(6)");
        assert_eq!(target.inserts[0].columns[1], "occurred_at");
    }
}
