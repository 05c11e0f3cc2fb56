//! Identifier transforms for both sides of the replication.
//!
//! Target identifiers are lower snake case and stay unquoted unless they
//! collide with a PostgreSQL reserved word. Source identifiers are always
//! bracket-quoted since they are spliced into dynamic T-SQL.

use super::reserved::RESERVED_WORDS;

/// Convert a PascalCase/camelCase source identifier to lower snake case.
///
/// Two passes, in order:
/// 1. insert `_` between any character and an uppercase letter that starts a
///    lowercase run (`OrderItem` -> `Order_Item`),
/// 2. insert `_` between a lowercase letter or digit and a following
///    uppercase letter (`ItemID` -> `Item_ID`).
///
/// The result is lowercased, so applying the transform twice is a no-op.
///
/// ```
/// use mssql_pg_replicate::typemap::to_target_identifier;
/// assert_eq!(to_target_identifier("OrderItemID"), "order_item_id");
/// assert_eq!(to_target_identifier("HTTPSConnection"), "https_connection");
/// ```
pub fn to_target_identifier(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();

    // Pass 1: (.)([A-Z][a-z]+) -> \1_\2
    let mut first = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        let starts_lower_run = c.is_ascii_uppercase()
            && chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
        if i > 0 && starts_lower_run {
            first.push('_');
        }
        first.push(c);
    }

    // Pass 2: ([a-z0-9])([A-Z]) -> \1_\2
    let mut second = String::with_capacity(first.len() + 4);
    let mut prev: Option<char> = None;
    for c in first.chars() {
        if let Some(p) = prev {
            if (p.is_ascii_lowercase() || p.is_ascii_digit()) && c.is_ascii_uppercase() {
                second.push('_');
            }
        }
        second.push(c);
        prev = Some(c);
    }

    second.to_lowercase()
}

/// Wrap an identifier in double quotes iff it is a PostgreSQL reserved word.
pub fn quote_if_reserved(identifier: &str) -> String {
    let lower = identifier.to_lowercase();
    if RESERVED_WORDS.contains(&lower.as_str()) {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    } else {
        identifier.to_string()
    }
}

/// Snake-case a source identifier and quote it if needed.
pub fn target_ident(source_name: &str) -> String {
    quote_if_reserved(&to_target_identifier(source_name))
}

/// Quote a SQL Server identifier using brackets.
///
/// Escapes closing brackets by doubling them and wraps in brackets.
pub fn quote_mssql(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Qualify a SQL Server table name with schema.
pub fn qualify_mssql(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_mssql(schema), quote_mssql(table))
}
