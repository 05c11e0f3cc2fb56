//! # mssql-pg-replicate
//!
//! Resumable MSSQL to PostgreSQL schema and data replication.
//!
//! The library seeds a PostgreSQL database that a downstream CDC pipeline
//! keeps in sync afterwards:
//!
//! - **Schema phase** recreates every selected source table with mapped
//!   types, snake_case identifiers and a trailing `__cdc_deleted` column
//! - **Data phase** reloads each table in committed batches
//! - **Progress files** record every table's phase so an interrupted run
//!   continues where it stopped
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_pg_replicate::{Config, Orchestrator, Phase, ProgressStore, RunCoordinator, RunMode};
//!
//! #[tokio::main]
//! async fn main() -> mssql_pg_replicate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let mut progress = ProgressStore::open(config.progress_file(Phase::Schema));
//!     let mut orchestrator = Orchestrator::connect(config).await?;
//!     let summary = orchestrator
//!         .replicate_schema(&mut progress, &RunMode::Resume, &mut RunCoordinator::new())
//!         .await?;
//!     println!("{} tables created", summary.tables_succeeded);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod schema;
pub mod source;
pub mod state;
pub mod target;
pub mod transfer;
pub mod typemap;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use config::{Config, ReplicationConfig, SourceConfig, TargetConfig};
pub use error::{ReplicateError, Result};
pub use orchestrator::{Orchestrator, ProgressSnapshot, RunCoordinator, RunMode, RunSummary};
pub use source::{ColumnDescriptor, MssqlConnection, SourceConnection, TableDescriptor, TableRef};
pub use state::{Phase, PhaseStatus, ProgressStore, ProgressSummary};
pub use target::{PgConnection, SqlValue, TargetConnection};
