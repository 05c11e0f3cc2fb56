//! Replication orchestrator - main workflow coordinator.
//!
//! Tables are processed strictly one after another. The progress store is
//! written after every table event, before the next table starts.

use crate::config::Config;
use crate::error::{ReplicateError, Result};
use crate::schema::SchemaReplicator;
use crate::source::{select_tables, MssqlConnection, SourceConnection, TableRef};
use crate::state::{Phase, ProgressStore, ProgressSummary};
use crate::target::{PgConnection, TargetConnection};
use crate::transfer::{DataSyncOptions, DataSyncer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// Tables processed between two progress snapshots.
pub const PROGRESS_INTERVAL: usize = 10;

/// Result of processing one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOutcome {
    Completed { rows_synced: u64 },
    Failed { rows_synced: u64, error: String },
}

impl TableOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TableOutcome::Completed { .. })
    }

    pub fn rows_synced(&self) -> u64 {
        match self {
            TableOutcome::Completed { rows_synced } | TableOutcome::Failed { rows_synced, .. } => {
                *rows_synced
            }
        }
    }
}

/// One phase of work applied to a table.
///
/// Implementations record their own progress transitions and only return an
/// error when the run cannot continue.
#[async_trait]
pub trait TablePhase: Send {
    fn phase(&self) -> Phase;

    async fn process(
        &mut self,
        table: &TableRef,
        progress: &mut ProgressStore,
    ) -> Result<TableOutcome>;
}

/// How the starting point of a run is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Process every table, skipping those already completed.
    #[default]
    Fresh,
    /// Restart at the first failed or in-progress table.
    Resume,
    /// Restart at the named table (`Name` or `schema.Name`).
    StartFrom(String),
}

/// Where a run starts and whether completed tables are skipped after that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPlan {
    /// Tables before this index are skipped.
    pub start_index: usize,

    /// Skip tables whose phase is already completed.
    pub skip_completed: bool,
}

/// Progress reported every [`PROGRESS_INTERVAL`] processed tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub phase: Phase,
    /// Tables processed so far in this run.
    pub processed: usize,
    /// Position in the table list of the last processed table (1-based).
    pub position: usize,
    pub summary: ProgressSummary,
}

/// Result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub phase: Phase,

    /// Tables in the run's list.
    pub tables_total: usize,

    /// Tables processed to completion in this run.
    pub tables_succeeded: usize,

    /// Tables not processed: before the start point or already completed.
    pub tables_skipped: usize,

    /// Tables that failed in this run.
    pub tables_failed: usize,

    /// Failed table names.
    pub failed_tables: Vec<String>,

    /// Rows committed in this run.
    pub rows_synced: u64,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Average throughput (rows/second).
    pub rows_per_second: u64,

    /// Every table in the list has its phase completed.
    pub all_completed: bool,
}

impl RunSummary {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

type ProgressCallback = Box<dyn FnMut(&ProgressSnapshot) + Send>;

/// Sequences a [`TablePhase`] over a table list.
#[derive(Default)]
pub struct RunCoordinator {
    on_progress: Option<ProgressCallback>,
}

impl RunCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for periodic progress snapshots.
    pub fn on_progress(mut self, callback: impl FnMut(&ProgressSnapshot) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// Decide where a run starts.
    pub fn resolve_start(
        tables: &[TableRef],
        mode: &RunMode,
        progress: &ProgressStore,
        phase: Phase,
    ) -> Result<StartPlan> {
        match mode {
            RunMode::Fresh => Ok(StartPlan {
                start_index: 0,
                skip_completed: true,
            }),
            RunMode::Resume => {
                let resume_at = progress.last_failed_or_in_progress(phase).and_then(|name| {
                    tables.iter().position(|t| t.progress_key() == name)
                });
                match resume_at {
                    Some(idx) => {
                        info!("Resuming {} phase at {}", phase, tables[idx]);
                        Ok(StartPlan {
                            start_index: idx,
                            skip_completed: false,
                        })
                    }
                    None => {
                        info!(
                            "Nothing to resume for {} phase, processing incomplete tables",
                            phase
                        );
                        Ok(StartPlan {
                            start_index: 0,
                            skip_completed: true,
                        })
                    }
                }
            }
            RunMode::StartFrom(name) => {
                let idx = tables
                    .iter()
                    .position(|t| t.matches(name))
                    .ok_or_else(|| ReplicateError::UnknownStartTable(name.clone()))?;
                info!("Starting {} phase at {}", phase, tables[idx]);
                Ok(StartPlan {
                    start_index: idx,
                    skip_completed: false,
                })
            }
        }
    }

    /// Process `tables` in order according to `plan`.
    pub async fn run<P>(
        &mut self,
        worker: &mut P,
        progress: &mut ProgressStore,
        tables: &[TableRef],
        plan: StartPlan,
    ) -> Result<RunSummary>
    where
        P: TablePhase + ?Sized,
    {
        let phase = worker.phase();
        let start = Instant::now();

        let mut succeeded = 0usize;
        let mut skipped = 0usize;
        let mut failed_tables = Vec::new();
        let mut rows_synced = 0u64;
        let mut processed = 0usize;

        for (idx, table) in tables.iter().enumerate() {
            if idx < plan.start_index {
                skipped += 1;
                continue;
            }
            if plan.skip_completed && progress.is_completed(table.progress_key(), phase) {
                info!("Skipping {} ({} phase already completed)", table, phase);
                skipped += 1;
                continue;
            }

            info!("[{}/{}] {} phase: {}", idx + 1, tables.len(), phase, table);
            match worker.process(table, progress).await? {
                TableOutcome::Completed { rows_synced: rows } => {
                    succeeded += 1;
                    rows_synced += rows;
                }
                TableOutcome::Failed { rows_synced: rows, .. } => {
                    rows_synced += rows;
                    failed_tables.push(table.full_name());
                }
            }

            processed += 1;
            if processed % PROGRESS_INTERVAL == 0 {
                let snapshot = ProgressSnapshot {
                    phase,
                    processed,
                    position: idx + 1,
                    summary: progress.summary(phase, tables.len()),
                };
                info!(
                    "Progress: {}/{} {} completed, {} failed",
                    snapshot.summary.completed,
                    snapshot.summary.total,
                    phase,
                    snapshot.summary.failed
                );
                if let Some(callback) = self.on_progress.as_mut() {
                    callback(&snapshot);
                }
            }
        }

        let duration = start.elapsed().as_secs_f64();
        let rows_per_second = if duration > 0.0 {
            (rows_synced as f64 / duration) as u64
        } else {
            0
        };
        let all_completed = tables
            .iter()
            .all(|t| progress.is_completed(t.progress_key(), phase));

        if !failed_tables.is_empty() {
            warn!("{} tables failed: {}", failed_tables.len(), failed_tables.join(", "));
        }

        Ok(RunSummary {
            phase,
            tables_total: tables.len(),
            tables_succeeded: succeeded,
            tables_skipped: skipped,
            tables_failed: failed_tables.len(),
            failed_tables,
            rows_synced,
            duration_seconds: duration,
            rows_per_second,
            all_completed,
        })
    }
}

/// Replication orchestrator owning both connections for the whole run.
pub struct Orchestrator<S, T> {
    config: Config,
    source: S,
    target: T,
}

impl Orchestrator<MssqlConnection, PgConnection> {
    /// Connect to both databases. Fails before any table is touched.
    pub async fn connect(config: Config) -> Result<Self> {
        let source = MssqlConnection::connect(&config.source).await?;
        let target = PgConnection::connect(&config.target).await?;
        Ok(Self::with_connections(config, source, target))
    }
}

impl<S, T> Orchestrator<S, T>
where
    S: SourceConnection,
    T: TargetConnection,
{
    pub fn with_connections(config: Config, source: S, target: T) -> Self {
        Self {
            config,
            source,
            target,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Tables the run operates on.
    pub async fn tables(&mut self) -> Result<Vec<TableRef>> {
        select_tables(
            &mut self.source,
            &self.config.source.schema,
            self.config.replication.prefer_cdc_tables,
        )
        .await
    }

    /// Recreate every selected table in the target.
    pub async fn replicate_schema(
        &mut self,
        progress: &mut ProgressStore,
        mode: &RunMode,
        coordinator: &mut RunCoordinator,
    ) -> Result<RunSummary> {
        let tables = self.tables().await?;
        let plan = RunCoordinator::resolve_start(&tables, mode, progress, Phase::Schema)?;

        let mut replicator = SchemaReplicator::new(
            &mut self.source,
            &mut self.target,
            self.config.target.schema.clone(),
        );
        replicator.ensure_target_schema().await?;

        info!("Replicating schema for {} tables", tables.len());
        coordinator.run(&mut replicator, progress, &tables, plan).await
    }

    /// Copy the rows of every selected table into the target.
    pub async fn sync_data(
        &mut self,
        progress: &mut ProgressStore,
        mode: &RunMode,
        coordinator: &mut RunCoordinator,
    ) -> Result<RunSummary> {
        let tables = self.tables().await?;
        let plan = RunCoordinator::resolve_start(&tables, mode, progress, Phase::Data)?;

        let options = DataSyncOptions::from_config(&self.config);
        info!(
            "Syncing data for {} tables (batch size {}, truncate {})",
            tables.len(),
            options.batch_size,
            options.truncate
        );

        let mut syncer = DataSyncer::new(&mut self.source, &mut self.target, options);
        coordinator.run(&mut syncer, progress, &tables, plan).await
    }
}
