//! Type mapping between MSSQL and PostgreSQL.
//!
//! Every source type name resolves to a [`TypeRule`]: either a constant
//! target type or a rule parameterized by the column's length, precision and
//! scale. Unknown types resolve to `TEXT`, so mapping never fails. Types such
//! as `xml`, `sql_variant` and the spatial types lose their structure in the
//! target and are carried as plain text.

mod identifier;
mod reserved;

pub use identifier::{
    qualify_mssql, quote_if_reserved, quote_mssql, target_ident, to_target_identifier,
};
pub use reserved::RESERVED_WORDS;

use crate::source::{ColumnDescriptor, TableDescriptor};

/// Character types store lengths strictly below this as `VARCHAR(n)`.
pub const MAX_BOUNDED_VARCHAR: i32 = 8000;

/// Name of the trailing soft-delete marker column added to every target table.
pub const CDC_DELETED_COLUMN: &str = "__cdc_deleted";

/// How a single source type name translates into a target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeRule {
    /// Always the same target type.
    Fixed(&'static str),

    /// `NUMERIC(precision, scale)`; plain `NUMERIC` when no precision is reported.
    Numeric,

    /// `CHAR(n)`. When `halve` is set the reported byte length is divided by two.
    Char { halve: bool },

    /// `VARCHAR(n)` when `0 < length < 8000`, otherwise `TEXT`.
    /// When `halve` is set the reported byte length is divided by two.
    VarChar { halve: bool },
}

impl TypeRule {
    /// Look up the rule for a source type name (case-insensitive).
    pub fn for_source_type(source_type: &str) -> TypeRule {
        match source_type.to_lowercase().as_str() {
            // Integer types
            "tinyint" | "smallint" => TypeRule::Fixed("SMALLINT"),
            "int" => TypeRule::Fixed("INTEGER"),
            "bigint" => TypeRule::Fixed("BIGINT"),

            // Fixed-point
            "decimal" | "numeric" => TypeRule::Numeric,
            "money" => TypeRule::Fixed("NUMERIC(19,4)"),
            "smallmoney" => TypeRule::Fixed("NUMERIC(10,4)"),

            // Floating point
            "float" => TypeRule::Fixed("DOUBLE PRECISION"),
            "real" => TypeRule::Fixed("REAL"),

            // Boolean
            "bit" => TypeRule::Fixed("BOOLEAN"),

            // Character types (lengths reported in bytes)
            "char" | "nchar" => TypeRule::Char { halve: true },
            "varchar" => TypeRule::VarChar { halve: false },
            "nvarchar" => TypeRule::VarChar { halve: true },
            "text" | "ntext" => TypeRule::Fixed("TEXT"),

            // Date/time types
            "date" => TypeRule::Fixed("DATE"),
            "time" => TypeRule::Fixed("TIME(6)"),
            "datetime" | "datetime2" | "smalldatetime" => TypeRule::Fixed("TIMESTAMP(6)"),
            "datetimeoffset" => TypeRule::Fixed("TIMESTAMPTZ(6)"),

            // Binary types
            "binary" | "varbinary" | "image" => TypeRule::Fixed("BYTEA"),

            // GUID has a native equivalent
            "uniqueidentifier" => TypeRule::Fixed("UUID"),

            // Structure is not preserved for the rest
            _ => TypeRule::Fixed("TEXT"),
        }
    }

    /// Produce the target type expression for this rule.
    pub fn apply(&self, max_length: i32, precision: i32, scale: i32) -> String {
        match *self {
            TypeRule::Fixed(target) => target.to_string(),
            TypeRule::Numeric => {
                if precision > 0 {
                    format!("NUMERIC({},{})", precision, scale)
                } else {
                    "NUMERIC".to_string()
                }
            }
            TypeRule::Char { halve } => {
                let length = char_length(max_length, halve);
                if length > 0 {
                    format!("CHAR({})", length)
                } else {
                    "TEXT".to_string()
                }
            }
            TypeRule::VarChar { halve } => {
                // The 8000 boundary applies to the reported byte length.
                let length = char_length(max_length, halve);
                if max_length > 0 && max_length < MAX_BOUNDED_VARCHAR && length > 0 {
                    format!("VARCHAR({})", length)
                } else {
                    "TEXT".to_string()
                }
            }
        }
    }
}

fn char_length(max_length: i32, halve: bool) -> i32 {
    if halve {
        max_length / 2
    } else {
        max_length
    }
}

/// Map an MSSQL data type to a PostgreSQL type expression.
pub fn mssql_to_postgres(mssql_type: &str, max_length: i32, precision: i32, scale: i32) -> String {
    TypeRule::for_source_type(mssql_type).apply(max_length, precision, scale)
}

/// A column as it will be created in the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetColumnSpec {
    /// Snake-cased, quoted-if-reserved column name.
    pub target_name: String,
    pub target_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
}

impl TargetColumnSpec {
    /// Map a source column into its target definition.
    pub fn from_source(column: &ColumnDescriptor) -> Self {
        Self {
            target_name: target_ident(&column.name),
            target_type: mssql_to_postgres(
                &column.source_type,
                column.max_length,
                column.precision,
                column.scale,
            ),
            nullable: column.nullable && !column.is_primary_key,
            is_primary_key: column.is_primary_key,
        }
    }

    /// Render the column definition used inside `CREATE TABLE`.
    pub fn definition(&self) -> String {
        let not_null = if self.nullable { "" } else { " NOT NULL" };
        format!("{} {}{}", self.target_name, self.target_type, not_null)
    }
}

/// Map every column of a source table, preserving order.
pub fn map_columns(table: &TableDescriptor) -> Vec<TargetColumnSpec> {
    table.columns.iter().map(TargetColumnSpec::from_source).collect()
}
