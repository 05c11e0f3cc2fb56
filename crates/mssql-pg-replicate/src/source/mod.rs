//! MSSQL source database operations.

mod types;

pub use types::*;

use crate::config::SourceConfig;
use crate::error::{ReplicateError, Result};
use crate::target::SqlValue;
use crate::typemap::{qualify_mssql, quote_mssql};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures::stream::BoxStream;
use futures::StreamExt;
use rust_decimal::Decimal;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, Query};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Stream of converted source rows, one value per projected column.
pub type RowStream<'a> = BoxStream<'a, Result<Vec<SqlValue>>>;

/// Trait for source database operations.
#[async_trait]
pub trait SourceConnection: Send {
    /// Tables registered for change data capture in `schema`.
    async fn list_cdc_tables(&mut self, schema: &str) -> Result<Vec<TableRef>>;

    /// Non-system base tables in `schema`, ordered by name.
    async fn list_user_tables(&mut self, schema: &str) -> Result<Vec<TableRef>>;

    /// Column metadata in ordinal order.
    async fn describe_columns(&mut self, table: &TableRef) -> Result<Vec<ColumnDescriptor>>;

    /// Run `query` and stream its rows, converting values using `columns`.
    async fn stream_rows<'a>(
        &'a mut self,
        query: &'a str,
        columns: &'a [ColumnDescriptor],
    ) -> Result<RowStream<'a>>;
}

/// Pick the tables a run operates on.
///
/// CDC-registered tables win when requested and the source reports any;
/// otherwise every user table of the schema is used.
pub async fn select_tables<S>(
    source: &mut S,
    schema: &str,
    prefer_cdc: bool,
) -> Result<Vec<TableRef>>
where
    S: SourceConnection + ?Sized,
{
    if prefer_cdc {
        match source.list_cdc_tables(schema).await {
            Ok(tables) if !tables.is_empty() => {
                info!("Using {} CDC-enabled tables from schema {}", tables.len(), schema);
                return Ok(tables);
            }
            Ok(_) => debug!("No CDC-enabled tables in schema {}", schema),
            Err(e) => warn!("Could not list CDC tables, falling back to user tables: {}", e),
        }
    }

    let tables = source.list_user_tables(schema).await?;
    info!("Using {} user tables from schema {}", tables.len(), schema);
    Ok(tables)
}

/// Build the row query for a table.
///
/// Timezone-aware columns travel as ISO-8601 text; structure-losing types
/// are converted to text on the source side.
pub fn build_select_query(table: &TableRef, columns: &[ColumnDescriptor]) -> String {
    let projection: Vec<String> = columns.iter().map(project_column).collect();
    format!(
        "SELECT {} FROM {}",
        projection.join(", "),
        qualify_mssql(&table.schema, &table.name)
    )
}

fn project_column(column: &ColumnDescriptor) -> String {
    let col = quote_mssql(&column.name);
    match column.type_name().as_str() {
        "datetimeoffset" => format!("CONVERT(VARCHAR(50), {}, 127) AS {}", col, col),
        "xml" | "sql_variant" => format!("CONVERT(NVARCHAR(MAX), {}) AS {}", col, col),
        "geography" | "geometry" | "hierarchyid" => format!("{}.ToString() AS {}", col, col),
        _ => col,
    }
}

/// Column metadata for `OBJECT_ID(@P1)`.
///
/// Alias types (`CREATE TYPE Flag FROM bit`) report their base system type so
/// that type mapping and value extraction see what the wire carries. CLR
/// types (`geography`, `hierarchyid`) have no base row and keep their name.
const DESCRIBE_COLUMNS_SQL: &str = r#"
    SELECT
        c.name,
        COALESCE(bt.name, ty.name),
        CAST(c.max_length AS INT),
        CAST(c.precision AS INT),
        CAST(c.scale AS INT),
        CAST(c.is_nullable AS INT),
        CAST(CASE WHEN pk.column_id IS NULL THEN 0 ELSE 1 END AS INT)
    FROM sys.columns c
    INNER JOIN sys.types ty ON c.user_type_id = ty.user_type_id
    LEFT JOIN sys.types bt
        ON ty.is_user_defined = 1 AND bt.user_type_id = ty.system_type_id
    LEFT JOIN (
        SELECT ic.object_id, ic.column_id
        FROM sys.index_columns ic
        INNER JOIN sys.indexes i
            ON ic.object_id = i.object_id AND ic.index_id = i.index_id
        WHERE i.is_primary_key = 1
    ) pk ON pk.object_id = c.object_id AND pk.column_id = c.column_id
    WHERE c.object_id = OBJECT_ID(@P1)
    ORDER BY c.column_id
"#;

/// MSSQL source over a single dedicated tiberius client.
pub struct MssqlConnection {
    client: Client<Compat<TcpStream>>,
}

impl MssqlConnection {
    /// Connect and authenticate with SQL Server credentials.
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        let endpoint = format!("mssql://{}:{}/{}", config.host, config.port, config.database);
        let tiberius_config = build_config(config);

        let tcp = TcpStream::connect(tiberius_config.get_addr())
            .await
            .map_err(|e| ReplicateError::connection(&endpoint, e.to_string()))?;
        tcp.set_nodelay(true).ok();

        let mut client = Client::connect(tiberius_config, tcp.compat_write())
            .await
            .map_err(|e| ReplicateError::connection(&endpoint, e.to_string()))?;

        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| ReplicateError::connection(&endpoint, e.to_string()))?
            .into_row()
            .await
            .map_err(|e| ReplicateError::connection(&endpoint, e.to_string()))?;

        info!(
            "Connected to MSSQL: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self { client })
    }

    async fn query_tables(&mut self, sql: &str, schema: &str) -> Result<Vec<TableRef>> {
        let mut query = Query::new(sql);
        query.bind(schema);

        let rows = query.query(&mut self.client).await?.into_first_result().await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let schema = row.try_get::<&str, _>(0).ok().flatten()?;
                let name = row.try_get::<&str, _>(1).ok().flatten()?;
                Some(TableRef::new(schema, name))
            })
            .collect())
    }
}

fn build_config(source: &SourceConfig) -> Config {
    let mut config = Config::new();
    config.host(&source.host);
    config.port(source.port);
    config.database(&source.database);
    config.authentication(AuthMethod::sql_server(&source.user, &source.password));

    match source.encrypt.to_lowercase().as_str() {
        "false" | "no" | "0" | "disable" => {
            config.encryption(EncryptionLevel::NotSupported);
        }
        _ => {
            if source.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        }
    }

    config
}

#[async_trait]
impl SourceConnection for MssqlConnection {
    async fn list_cdc_tables(&mut self, schema: &str) -> Result<Vec<TableRef>> {
        let sql = r#"
            SELECT OBJECT_SCHEMA_NAME(ct.source_object_id), OBJECT_NAME(ct.source_object_id)
            FROM cdc.change_tables ct
            WHERE OBJECT_SCHEMA_NAME(ct.source_object_id) = @P1
            ORDER BY OBJECT_NAME(ct.source_object_id)
        "#;
        self.query_tables(sql, schema).await
    }

    async fn list_user_tables(&mut self, schema: &str) -> Result<Vec<TableRef>> {
        let sql = r#"
            SELECT s.name, t.name
            FROM sys.tables t
            INNER JOIN sys.schemas s ON t.schema_id = s.schema_id
            WHERE t.is_ms_shipped = 0 AND s.name = @P1
            ORDER BY t.name
        "#;
        self.query_tables(sql, schema).await
    }

    async fn describe_columns(&mut self, table: &TableRef) -> Result<Vec<ColumnDescriptor>> {
        let mut query = Query::new(DESCRIBE_COLUMNS_SQL);
        query.bind(qualify_mssql(&table.schema, &table.name));

        let rows = query.query(&mut self.client).await?.into_first_result().await?;

        let text = |row: &tiberius::Row, idx: usize| {
            row.try_get::<&str, _>(idx)
                .ok()
                .flatten()
                .unwrap_or_default()
                .to_string()
        };
        let int = |row: &tiberius::Row, idx: usize| {
            row.try_get::<i32, _>(idx).ok().flatten().unwrap_or(0)
        };

        let columns: Vec<ColumnDescriptor> = rows
            .iter()
            .map(|row| ColumnDescriptor {
                name: text(row, 0),
                source_type: text(row, 1),
                max_length: int(row, 2),
                precision: int(row, 3),
                scale: int(row, 4),
                nullable: int(row, 5) == 1,
                is_primary_key: int(row, 6) == 1,
            })
            .collect();

        debug!("Loaded {} columns for {}", columns.len(), table.full_name());
        Ok(columns)
    }

    async fn stream_rows<'a>(
        &'a mut self,
        query: &'a str,
        columns: &'a [ColumnDescriptor],
    ) -> Result<RowStream<'a>> {
        debug!("Streaming rows: {}", query);
        let stream = self.client.simple_query(query).await?.into_row_stream();

        Ok(stream
            .map(move |row| -> Result<Vec<SqlValue>> {
                row?.into_iter()
                    .zip(columns)
                    .map(|(data, column)| convert_value(&data, column))
                    .collect()
            })
            .boxed())
    }
}

/// Read a cell as `T`. SQL NULL is `Ok(None)`; a cell of another wire type
/// is a conversion error.
fn read<'r, T>(data: &'r ColumnData<'static>, column: &ColumnDescriptor) -> Result<Option<T>>
where
    T: FromSql<'r>,
{
    T::from_sql(data).map_err(|e| ReplicateError::Conversion {
        column: column.name.clone(),
        source_type: column.source_type.clone(),
        message: e.to_string(),
    })
}

/// Convert one tiberius cell into a [`SqlValue`].
///
/// Columns projected through `CONVERT`/`ToString()` arrive as text.
fn convert_value(data: &ColumnData<'static>, column: &ColumnDescriptor) -> Result<SqlValue> {
    let value = match column.type_name().as_str() {
        "bit" => read::<bool>(data, column)?.map(SqlValue::Bool),
        "tinyint" => read::<u8>(data, column)?.map(|v| SqlValue::I16(v as i16)),
        "smallint" => read::<i16>(data, column)?.map(SqlValue::I16),
        "int" => read::<i32>(data, column)?.map(SqlValue::I32),
        "bigint" => read::<i64>(data, column)?.map(SqlValue::I64),
        "real" => read::<f32>(data, column)?.map(SqlValue::F32),
        "float" => read::<f64>(data, column)?.map(SqlValue::F64),
        "decimal" | "numeric" | "money" | "smallmoney" => match read::<Decimal>(data, column) {
            Ok(v) => v.map(SqlValue::Decimal),
            Err(_) => read::<f64>(data, column)?.map(SqlValue::F64),
        },
        "uniqueidentifier" => read::<Uuid>(data, column)?.map(SqlValue::Uuid),
        "datetime" | "datetime2" | "smalldatetime" => {
            read::<NaiveDateTime>(data, column)?.map(SqlValue::DateTime)
        }
        "date" => read::<NaiveDate>(data, column)?.map(SqlValue::Date),
        "time" => read::<NaiveTime>(data, column)?.map(SqlValue::Time),
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => {
            read::<&[u8]>(data, column)?.map(|b| SqlValue::Bytes(b.to_vec()))
        }
        "datetimeoffset" => match read::<&str>(data, column) {
            Ok(v) => v.map(|s| SqlValue::String(s.to_string())),
            Err(_) => read::<DateTime<FixedOffset>>(data, column)?.map(SqlValue::DateTimeOffset),
        },
        _ => read::<&str>(data, column)?.map(|s| SqlValue::String(s.to_string())),
    };

    Ok(value.unwrap_or(SqlValue::Null))
}
