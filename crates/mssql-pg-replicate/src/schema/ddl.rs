//! PostgreSQL DDL generation.

use crate::typemap::{quote_if_reserved, target_ident, TargetColumnSpec, CDC_DELETED_COLUMN};

/// Schema-qualified target table for a source table name.
pub fn target_table_name(target_schema: &str, source_table: &str) -> String {
    format!("{}.{}", quote_if_reserved(target_schema), target_ident(source_table))
}

pub fn create_schema_sql(target_schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_if_reserved(target_schema))
}

pub fn drop_table_sql(target_table: &str) -> String {
    format!("DROP TABLE IF EXISTS {} CASCADE", target_table)
}

/// Build `CREATE TABLE IF NOT EXISTS` with the soft-delete marker column and
/// a composite primary key over every key column.
pub fn create_table_sql(target_table: &str, columns: &[TargetColumnSpec]) -> String {
    let mut definitions: Vec<String> = columns.iter().map(TargetColumnSpec::definition).collect();
    definitions.push(format!("{} TEXT DEFAULT 'false'", CDC_DELETED_COLUMN));

    let pk_columns: Vec<&str> = columns
        .iter()
        .filter(|c| c.is_primary_key)
        .map(|c| c.target_name.as_str())
        .collect();
    if !pk_columns.is_empty() {
        definitions.push(format!("PRIMARY KEY ({})", pk_columns.join(", ")));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        target_table,
        definitions.join(",\n    ")
    )
}
