//! PostgreSQL target database operations.

use crate::config::TargetConfig;
use crate::error::{ReplicateError, Result};
use async_trait::async_trait;
use tokio_postgres::config::SslMode;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::{debug, error, info};

/// PostgreSQL accepts at most this many bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;

/// Trait for target database operations.
///
/// Transactions are explicit: callers pair every [`begin`](Self::begin)
/// with a [`commit`](Self::commit) or [`rollback`](Self::rollback).
#[async_trait]
pub trait TargetConnection: Send {
    /// Execute a single DDL/DML statement, returning the affected row count.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Open a transaction.
    async fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction. A no-op when none is open.
    async fn rollback(&mut self) -> Result<()>;

    /// Insert rows with batched parameterized statements.
    async fn insert_batch(&mut self, target: &InsertTarget, rows: &[Vec<SqlValue>]) -> Result<u64>;
}

/// SQL value enum for type-safe row handling.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    Decimal(rust_decimal::Decimal),
    DateTime(chrono::NaiveDateTime),
    DateTimeOffset(chrono::DateTime<chrono::FixedOffset>),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
}

impl SqlValue {
    /// Text form sent as a bind parameter; PostgreSQL casts it to the column type.
    pub fn to_param_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(b) => Some(if *b { "t" } else { "f" }.to_string()),
            SqlValue::I16(n) => Some(n.to_string()),
            SqlValue::I32(n) => Some(n.to_string()),
            SqlValue::I64(n) => Some(n.to_string()),
            SqlValue::F32(n) => Some(n.to_string()),
            SqlValue::F64(n) => Some(n.to_string()),
            SqlValue::String(s) => Some(s.clone()),
            SqlValue::Bytes(b) => Some(format!("\\x{}", hex::encode(b))),
            SqlValue::Uuid(u) => Some(format_uuid(u)),
            SqlValue::Decimal(d) => Some(d.to_string()),
            SqlValue::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
            SqlValue::DateTimeOffset(dt) => Some(dt.to_rfc3339()),
            SqlValue::Date(d) => Some(d.to_string()),
            SqlValue::Time(t) => Some(t.format("%H:%M:%S%.6f").to_string()),
        }
    }

    /// JSON form of the value, used for columns declared JSON-bearing.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(*b),
            SqlValue::I16(n) => Value::from(*n),
            SqlValue::I32(n) => Value::from(*n),
            SqlValue::I64(n) => Value::from(*n),
            SqlValue::F32(n) => Value::from(*n),
            SqlValue::F64(n) => Value::from(*n),
            SqlValue::Bytes(b) => Value::String(hex::encode(b)),
            other => other
                .to_param_text()
                .map(Value::String)
                .unwrap_or(Value::Null),
        }
    }
}

/// SQL Server renders GUIDs in uppercase.
fn format_uuid(u: &uuid::Uuid) -> String {
    format!("{:X}", u.hyphenated())
}

/// Destination of a batched insert: table, columns and per-column casts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertTarget {
    /// Schema-qualified target table, already quoted where needed.
    pub table: String,

    /// Target column names, already quoted where needed.
    pub columns: Vec<String>,

    /// Target type of each column. Parameters are cast to its unmodified
    /// base type (see [`param_cast`]).
    pub column_types: Vec<String>,
}

impl InsertTarget {
    /// Rows that fit in one statement without exceeding the bind parameter limit.
    pub fn rows_per_statement(&self) -> usize {
        (MAX_BIND_PARAMS / self.columns.len().max(1)).max(1)
    }

    /// Build a multi-row INSERT for `row_count` rows.
    pub fn insert_sql(&self, row_count: usize) -> String {
        let col_list = self.columns.join(", ");
        let width = self.columns.len();

        let mut placeholders = Vec::with_capacity(row_count);
        for row in 0..row_count {
            let row_placeholders: Vec<String> = self
                .column_types
                .iter()
                .enumerate()
                .map(|(col, ty)| {
                    format!("${}::text::{}", row * width + col + 1, param_cast(ty))
                })
                .collect();
            placeholders.push(format!("({})", row_placeholders.join(", ")));
        }

        format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table,
            col_list,
            placeholders.join(", ")
        )
    }
}

/// Cast applied to a text parameter bound for a column of type `column_type`.
///
/// Length and precision modifiers are dropped: an explicit cast to
/// `VARCHAR(n)`/`CHAR(n)` silently truncates, while the assignment into the
/// column raises on over-length values. A bare `CHAR` means `CHAR(1)`, so
/// fixed-width columns cast to `BPCHAR`.
pub fn param_cast(column_type: &str) -> String {
    let base = match column_type.find('(') {
        Some(idx) => column_type[..idx].trim_end(),
        None => column_type,
    };
    if base.eq_ignore_ascii_case("char") || base.eq_ignore_ascii_case("character") {
        "BPCHAR".to_string()
    } else {
        base.to_string()
    }
}

/// PostgreSQL target over a single dedicated client.
pub struct PgConnection {
    client: Client,
    in_transaction: bool,
}

impl PgConnection {
    /// Connect to PostgreSQL and verify the session.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let endpoint = format!("postgres://{}:{}/{}", config.host, config.port, config.database);

        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("mssql-pg-replicate");
        pg_config.ssl_mode(match config.ssl_mode.as_str() {
            "disable" => SslMode::Disable,
            _ => SslMode::Prefer,
        });

        let (client, connection) = pg_config
            .connect(NoTls)
            .await
            .map_err(|e| ReplicateError::connection(&endpoint, e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| ReplicateError::connection(&endpoint, e.to_string()))?;

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            client,
            in_transaction: false,
        })
    }
}

#[async_trait]
impl TargetConnection for PgConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        debug!("Executing: {}", sql);
        Ok(self.client.execute(sql, &[]).await?)
    }

    async fn begin(&mut self) -> Result<()> {
        self.client.batch_execute("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.in_transaction = false;
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.client.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    async fn insert_batch(&mut self, target: &InsertTarget, rows: &[Vec<SqlValue>]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut total = 0u64;
        for chunk in rows.chunks(target.rows_per_statement()) {
            let sql = target.insert_sql(chunk.len());
            let params: Vec<Option<String>> = chunk
                .iter()
                .flat_map(|row| row.iter().map(SqlValue::to_param_text))
                .collect();
            let param_refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|p| p as &(dyn ToSql + Sync))
                .collect();

            match self.client.execute(sql.as_str(), &param_refs).await {
                Ok(n) => total += n,
                Err(e) => {
                    if let Some(first_row) = chunk.first() {
                        let row_preview: Vec<String> = first_row
                            .iter()
                            .take(5)
                            .map(|v| format!("{:?}", v))
                            .collect();
                        error!(
                            "Insert into {} failed: {} - first row preview: {:?}",
                            target.table, e, row_preview
                        );
                    }
                    return Err(ReplicateError::Target(e));
                }
            }
        }

        Ok(total)
    }
}
