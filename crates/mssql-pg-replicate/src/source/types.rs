//! Schema and metadata types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A source table identified by schema and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Key under which the table's progress is recorded.
    pub fn progress_key(&self) -> &str {
        &self.name
    }

    /// Whether a user-supplied name refers to this table (`Name` or `schema.Name`).
    pub fn matches(&self, name: &str) -> bool {
        self.name == name || self.full_name() == name
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Column metadata as reported by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,

    /// Data type (e.g., "int", "nvarchar", "datetimeoffset").
    pub source_type: String,

    /// Maximum length in bytes for string/binary types (-1 for max).
    pub max_length: i32,

    /// Numeric precision.
    pub precision: i32,

    /// Numeric scale.
    pub scale: i32,

    /// Whether the column allows NULL.
    pub nullable: bool,

    /// Whether the column is part of the primary key.
    pub is_primary_key: bool,
}

impl ColumnDescriptor {
    /// Lowercased source type name.
    pub fn type_name(&self) -> String {
        self.source_type.to_lowercase()
    }

    /// Whether the column carries a timezone-aware temporal value.
    pub fn is_timezone_aware(&self) -> bool {
        self.source_type.eq_ignore_ascii_case("datetimeoffset")
    }

    /// Whether the column is a SQL Server GUID.
    pub fn is_uniqueidentifier(&self) -> bool {
        self.source_type.eq_ignore_ascii_case("uniqueidentifier")
    }
}

/// Table metadata: one per source table, recomputed every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Schema name.
    pub schema_name: String,

    /// Table name.
    pub table_name: String,

    /// Column definitions in ordinal order.
    pub columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    pub fn new(table: &TableRef, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            schema_name: table.schema.clone(),
            table_name: table.name.clone(),
            columns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_ref_matches_short_and_full_name() {
        let t = TableRef::new("dbo", "Orders");
        assert!(t.matches("Orders"));
        assert!(t.matches("dbo.Orders"));
        assert!(!t.matches("orders"));
        assert!(!t.matches("sales.Orders"));
        assert_eq!(t.progress_key(), "Orders");
        assert_eq!(t.to_string(), "dbo.Orders");
    }

    #[test]
    fn test_column_type_predicates() {
        let col = ColumnDescriptor {
            name: "CreatedAt".into(),
            source_type: "DateTimeOffset".into(),
            max_length: 10,
            precision: 34,
            scale: 7,
            nullable: true,
            is_primary_key: false,
        };
        assert!(col.is_timezone_aware());
        assert!(!col.is_uniqueidentifier());
        assert_eq!(col.type_name(), "datetimeoffset");
    }
}
