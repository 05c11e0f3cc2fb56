//! Error types for the replication library.

use thiserror::Error;

/// Main error type for replication operations.
#[derive(Error, Debug)]
pub enum ReplicateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database query error
    #[error("Source database error: {0}")]
    Source(#[from] tiberius::error::Error),

    /// Target database query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Could not establish a connection. Fatal: raised before any table is touched.
    #[error("Connection to {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },

    /// DDL or DML failure scoped to a single table
    #[error("Replication failed for table {table}: {message}")]
    Table { table: String, message: String },

    /// A source value could not be read as its column's declared type
    #[error("Cannot read column {column} as {source_type}: {message}")]
    Conversion {
        column: String,
        source_type: String,
        message: String,
    },

    /// Progress file could not be written
    #[error("Progress file error: {0}")]
    State(String),

    /// `--start-from-table` named a table that is not part of the run
    #[error("Table '{0}' is not in the list of tables to process")]
    UnknownStartTable(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReplicateError {
    /// Create a Connection error for the given endpoint
    pub fn connection(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        ReplicateError::Connection {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a Table error
    pub fn table(table: impl Into<String>, message: impl Into<String>) -> Self {
        ReplicateError::Table {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Whether this error aborts the whole run rather than a single table.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ReplicateError::Table { .. }
                | ReplicateError::Conversion { .. }
                | ReplicateError::Source(_)
                | ReplicateError::Target(_)
        )
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicateError>;
