//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Root configuration structure. Built once at startup, then read-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (MSSQL).
    #[serde(default)]
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL).
    #[serde(default)]
    pub target: TargetConfig,

    /// Replication behavior configuration.
    #[serde(default)]
    pub replication: ReplicationConfig,
}

/// Source database (MSSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Source schema (default: "dbo").
    pub schema: String,

    /// Encrypt connection (default: "true").
    pub encrypt: String,

    /// Trust server certificate (default: false).
    pub trust_server_cert: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1433,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            schema: "dbo".to_string(),
            encrypt: "true".to_string(),
            trust_server_cert: false,
        }
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Target schema (default: "dbo").
    pub schema: String,

    /// SSL mode: "disable" or "prefer" (default: "prefer").
    pub ssl_mode: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5432,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            schema: "dbo".to_string(),
            ssl_mode: "prefer".to_string(),
        }
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Replication behavior configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Rows per committed batch during data sync (default: 1000).
    pub batch_size: usize,

    /// Source columns carrying UUIDs as text.
    pub uuid_columns: Vec<String>,

    /// Source columns carrying JSON.
    pub json_columns: Vec<String>,

    /// Use CDC-enabled tables when the source has any (default: true).
    pub prefer_cdc_tables: bool,

    /// Progress file for schema runs.
    pub schema_progress_file: PathBuf,

    /// Progress file for data runs.
    pub data_progress_file: PathBuf,

    /// Truncate target tables before loading (default: true).
    pub truncate: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            uuid_columns: Vec::new(),
            json_columns: Vec::new(),
            prefer_cdc_tables: true,
            schema_progress_file: PathBuf::from("schema_progress.json"),
            data_progress_file: PathBuf::from("data_progress.json"),
            truncate: true,
        }
    }
}
