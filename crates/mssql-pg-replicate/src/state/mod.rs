//! File-based progress tracking for resume capability.
//!
//! One progress file per run kind (schema or data). Every mutation rewrites
//! the whole file atomically before returning, so the last durable record of
//! a table is always its latest known phase.
//!
//! A progress file has a single writer: running two processes against the
//! same file at once is unsupported and is not guarded against.

mod session;

pub use session::{ProgressSession, TableEntries, LEGACY_VERSION, PROGRESS_FILE_VERSION};

use crate::error::{ReplicateError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Independently tracked unit of work per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Schema,
    Data,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Schema => "schema",
            Phase::Data => "data",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    InProgress,
    Completed,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::InProgress => "in_progress",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
        }
    }

    /// In progress or failed.
    pub fn is_partial(&self) -> bool {
        matches!(self, PhaseStatus::InProgress | PhaseStatus::Failed)
    }
}

/// State of one (table, phase) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub status: PhaseStatus,

    #[serde(default, skip_serializing_if = "Option::is_none", with = "session::timestamp::option")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none", with = "session::timestamp::option")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none", with = "session::timestamp::option")]
    pub failed_at: Option<DateTime<Utc>>,

    /// Rows committed to the target for this phase.
    #[serde(default)]
    pub rows_synced: u64,

    /// Captured error text of the last failure.
    #[serde(default)]
    pub error: Option<String>,
}

impl PhaseRecord {
    fn started(now: DateTime<Utc>) -> Self {
        Self {
            status: PhaseStatus::InProgress,
            started_at: Some(now),
            completed_at: None,
            failed_at: None,
            rows_synced: 0,
            error: None,
        }
    }
}

/// Counts for a phase, as reported to the operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub remaining: usize,
}

impl ProgressSummary {
    /// Completed share of the total in whole percent.
    pub fn percent_complete(&self) -> usize {
        if self.total == 0 {
            0
        } else {
            self.completed * 100 / self.total
        }
    }
}

/// Durable store of per-table phase records backed by one JSON file.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    session: ProgressSession,
}

impl ProgressStore {
    /// Open the store at `path`, loading whatever session it holds.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let session = Self::load(&path);
        Self { path, session }
    }

    /// Read a session from disk.
    ///
    /// A missing file yields an empty session. An unreadable, malformed or
    /// newer-format file yields an empty session plus a warning.
    pub fn load(path: &Path) -> ProgressSession {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No progress file at {}, starting fresh", path.display());
                return ProgressSession::new();
            }
            Err(e) => {
                warn!("Could not read {}: {}, starting fresh", path.display(), e);
                return ProgressSession::new();
            }
        };

        let session: ProgressSession = match serde_json::from_str(&content) {
            Ok(session) => session,
            Err(e) => {
                warn!("Could not parse {}: {}, starting fresh", path.display(), e);
                return ProgressSession::new();
            }
        };

        if session.version > PROGRESS_FILE_VERSION {
            warn!(
                "{} has format version {} (supported: {}), starting fresh",
                path.display(),
                session.version,
                PROGRESS_FILE_VERSION
            );
            return ProgressSession::new();
        }

        if session.is_legacy() {
            info!(
                "{} predates versioning; it will be upgraded on the next write",
                path.display()
            );
        }

        debug!(
            "Loaded {} table entries from {}",
            session.tables.len(),
            path.display()
        );
        session
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session(&self) -> &ProgressSession {
        &self.session
    }

    /// Record that `table` entered `phase`.
    pub fn mark_started(&mut self, table: &str, phase: Phase) -> Result<()> {
        let record = PhaseRecord::started(Utc::now());
        self.session.tables.entry(table).insert(phase.as_str().to_string(), record);
        self.save()
    }

    /// Record that `table` finished `phase`.
    pub fn mark_completed(&mut self, table: &str, phase: Phase, rows_synced: u64) -> Result<()> {
        let now = Utc::now();
        let started_at = self.record(table, phase).and_then(|r| r.started_at);
        let record = PhaseRecord {
            status: PhaseStatus::Completed,
            started_at,
            completed_at: Some(now),
            failed_at: None,
            rows_synced,
            error: None,
        };
        self.session.tables.entry(table).insert(phase.as_str().to_string(), record);
        self.save()
    }

    /// Record that `phase` failed for `table` after committing `rows_synced` rows.
    pub fn mark_failed(
        &mut self,
        table: &str,
        phase: Phase,
        error: &str,
        rows_synced: u64,
    ) -> Result<()> {
        let now = Utc::now();
        let started_at = self.record(table, phase).and_then(|r| r.started_at);
        let record = PhaseRecord {
            status: PhaseStatus::Failed,
            started_at,
            completed_at: None,
            failed_at: Some(now),
            rows_synced,
            error: Some(error.to_string()),
        };
        self.session.tables.entry(table).insert(phase.as_str().to_string(), record);
        self.save()
    }

    pub fn record(&self, table: &str, phase: Phase) -> Option<&PhaseRecord> {
        self.session.tables.get(table)?.get(phase.as_str())
    }

    pub fn status(&self, table: &str, phase: Phase) -> Option<PhaseStatus> {
        self.record(table, phase).map(|r| r.status)
    }

    pub fn is_completed(&self, table: &str, phase: Phase) -> bool {
        self.status(table, phase) == Some(PhaseStatus::Completed)
    }

    /// True iff the phase is in progress or failed.
    pub fn is_partial(&self, table: &str, phase: Phase) -> bool {
        self.status(table, phase).is_some_and(|s| s.is_partial())
    }

    /// First table, in recorded order, whose phase is failed or in progress.
    pub fn last_failed_or_in_progress(&self, phase: Phase) -> Option<&str> {
        self.session
            .tables
            .iter()
            .find(|(_, phases)| phases.get(phase.as_str()).is_some_and(|r| r.status.is_partial()))
            .map(|(name, _)| name)
    }

    pub fn completed_tables(&self, phase: Phase) -> BTreeSet<String> {
        self.tables_with_status(phase, PhaseStatus::Completed)
            .map(str::to_string)
            .collect()
    }

    /// Tables with any record, in recorded order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.session.tables.iter().map(|(name, _)| name)
    }

    pub fn summary(&self, phase: Phase, total_tables: usize) -> ProgressSummary {
        let completed = self.tables_with_status(phase, PhaseStatus::Completed).count();
        let failed = self.tables_with_status(phase, PhaseStatus::Failed).count();
        let in_progress = self.tables_with_status(phase, PhaseStatus::InProgress).count();

        ProgressSummary {
            total: total_tables,
            completed,
            failed,
            in_progress,
            remaining: total_tables.saturating_sub(completed + failed + in_progress),
        }
    }

    /// Discard all state and persist a fresh session.
    pub fn reset(&mut self) -> Result<()> {
        self.session = ProgressSession::new();
        self.save()?;
        info!("Progress reset: {}", self.path.display());
        Ok(())
    }

    fn tables_with_status(&self, phase: Phase, status: PhaseStatus) -> impl Iterator<Item = &str> {
        self.session
            .tables
            .iter()
            .filter(move |(_, phases)| {
                phases
                    .get(phase.as_str())
                    .is_some_and(|r| r.status == status)
            })
            .map(|(name, _)| name)
    }

    /// Save the session (atomic write: temp file, fsync, rename).
    fn save(&mut self) -> Result<()> {
        self.session.version = PROGRESS_FILE_VERSION;
        self.session.last_updated = Utc::now();

        let content = serde_json::to_string_pretty(&self.session)
            .map_err(|e| ReplicateError::State(format!("Failed to serialize progress: {}", e)))?;

        let write_err = |e: std::io::Error| {
            ReplicateError::State(format!("Failed to write {}: {}", self.path.display(), e))
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let temp_path = temp_path_for(&self.path);
        let mut file = File::create(&temp_path).map_err(write_err)?;
        file.write_all(content.as_bytes()).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);
        fs::rename(&temp_path, &self.path).map_err(write_err)?;

        Ok(())
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    PathBuf::from(temp)
}
