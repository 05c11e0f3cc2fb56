//! In-memory source and target connections for tests.

use crate::error::{ReplicateError, Result};
use crate::source::{ColumnDescriptor, RowStream, SourceConnection, TableRef};
use crate::target::{InsertTarget, SqlValue, TargetConnection};
use crate::typemap::qualify_mssql;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, HashSet};

struct FakeTable {
    table: TableRef,
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Vec<SqlValue>>,
}

/// Source with canned tables and rows.
#[derive(Default)]
pub struct FakeSource {
    tables: Vec<FakeTable>,
    cdc: Vec<String>,
    /// Table name -> (rows yielded before failing, error message).
    pub stream_failures: HashMap<String, (usize, String)>,
    describe_failures: HashSet<String>,
    /// Every row query received, in order.
    pub queries: Vec<String>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(
        mut self,
        schema: &str,
        name: &str,
        columns: Vec<ColumnDescriptor>,
        rows: Vec<Vec<SqlValue>>,
    ) -> Self {
        self.tables.push(FakeTable {
            table: TableRef::new(schema, name),
            columns,
            rows,
        });
        self
    }

    pub fn with_cdc(mut self, names: &[&str]) -> Self {
        self.cdc = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn fail_stream_after(mut self, table: &str, rows: usize, message: &str) -> Self {
        self.stream_failures
            .insert(table.to_string(), (rows, message.to_string()));
        self
    }

    pub fn fail_describe(mut self, table: &str) -> Self {
        self.describe_failures.insert(table.to_string());
        self
    }

    fn find(&self, table: &TableRef) -> Option<&FakeTable> {
        self.tables.iter().find(|t| &t.table == table)
    }
}

#[async_trait]
impl SourceConnection for FakeSource {
    async fn list_cdc_tables(&mut self, schema: &str) -> Result<Vec<TableRef>> {
        Ok(self
            .cdc
            .iter()
            .map(|name| TableRef::new(schema, name.as_str()))
            .filter(|t| self.find(t).is_some())
            .collect())
    }

    async fn list_user_tables(&mut self, schema: &str) -> Result<Vec<TableRef>> {
        let mut tables: Vec<TableRef> = self
            .tables
            .iter()
            .filter(|t| t.table.schema == schema)
            .map(|t| t.table.clone())
            .collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tables)
    }

    async fn describe_columns(&mut self, table: &TableRef) -> Result<Vec<ColumnDescriptor>> {
        if self.describe_failures.contains(&table.name) {
            return Err(ReplicateError::table(table.full_name(), "metadata unavailable"));
        }
        Ok(self.find(table).map(|t| t.columns.clone()).unwrap_or_default())
    }

    async fn stream_rows<'a>(
        &'a mut self,
        query: &'a str,
        _columns: &'a [ColumnDescriptor],
    ) -> Result<RowStream<'a>> {
        self.queries.push(query.to_string());

        let table = self
            .tables
            .iter()
            .find(|t| query.ends_with(&qualify_mssql(&t.table.schema, &t.table.name)))
            .ok_or_else(|| {
                ReplicateError::table("unknown", format!("no table for query {}", query))
            })?;

        let mut items: Vec<Result<Vec<SqlValue>>> = Vec::new();
        match self.stream_failures.get(&table.table.name) {
            Some((after, message)) => {
                items.extend(table.rows.iter().take(*after).cloned().map(Ok));
                items.push(Err(ReplicateError::table(table.table.full_name(), message.clone())));
            }
            None => items.extend(table.rows.iter().cloned().map(Ok)),
        }

        Ok(futures::stream::iter(items).boxed())
    }
}

/// Target that applies statements to in-memory tables with transaction semantics.
#[derive(Default)]
pub struct FakeTarget {
    /// Every executed statement, in order.
    pub executed: Vec<String>,
    /// Committed rows per target table.
    pub committed: BTreeMap<String, Vec<Vec<SqlValue>>>,
    working: Option<BTreeMap<String, Vec<Vec<SqlValue>>>>,
    /// Statement substring -> error message.
    pub statement_failures: Vec<(String, String)>,
    /// Target table -> (row count that may not be exceeded, error message).
    pub insert_failures: HashMap<String, (usize, String)>,
    pub inserts: Vec<InsertTarget>,
    pub commits: usize,
    pub rollbacks: usize,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_statement(mut self, containing: &str, message: &str) -> Self {
        self.statement_failures
            .push((containing.to_string(), message.to_string()));
        self
    }

    pub fn fail_insert_beyond(mut self, table: &str, rows: usize, message: &str) -> Self {
        self.insert_failures
            .insert(table.to_string(), (rows, message.to_string()));
        self
    }

    pub fn clear_failures(&mut self) {
        self.statement_failures.clear();
        self.insert_failures.clear();
    }

    pub fn rows(&self, table: &str) -> usize {
        self.committed.get(table).map(Vec::len).unwrap_or(0)
    }

    pub fn in_transaction(&self) -> bool {
        self.working.is_some()
    }

    fn tables_mut(&mut self) -> &mut BTreeMap<String, Vec<Vec<SqlValue>>> {
        match self.working {
            Some(ref mut working) => working,
            None => &mut self.committed,
        }
    }
}

#[async_trait]
impl TargetConnection for FakeTarget {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.executed.push(sql.to_string());

        if let Some((_, message)) = self
            .statement_failures
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
        {
            return Err(ReplicateError::table("target", message.clone()));
        }

        let words: Vec<&str> = sql.split_whitespace().collect();
        match words.as_slice() {
            ["TRUNCATE", "TABLE", table, ..] => {
                let table = table.to_string();
                self.tables_mut().insert(table, Vec::new());
            }
            ["DROP", "TABLE", "IF", "EXISTS", table, ..] => {
                let table = table.to_string();
                self.tables_mut().remove(&table);
            }
            ["CREATE", "TABLE", "IF", "NOT", "EXISTS", table, ..] => {
                let table = table.to_string();
                self.tables_mut().entry(table).or_default();
            }
            _ => {}
        }
        Ok(0)
    }

    async fn begin(&mut self) -> Result<()> {
        self.working = Some(self.committed.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if let Some(working) = self.working.take() {
            self.committed = working;
        }
        self.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.working.take().is_some() {
            self.rollbacks += 1;
        }
        Ok(())
    }

    async fn insert_batch(&mut self, target: &InsertTarget, rows: &[Vec<SqlValue>]) -> Result<u64> {
        self.inserts.push(target.clone());

        let existing = self
            .tables_mut()
            .get(&target.table)
            .map(Vec::len)
            .unwrap_or(0);
        if let Some((limit, message)) = self.insert_failures.get(&target.table) {
            if existing + rows.len() > *limit {
                return Err(ReplicateError::table(target.table.clone(), message.clone()));
            }
        }

        self.tables_mut()
            .entry(target.table.clone())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(rows.len() as u64)
    }
}

/// Column descriptor shorthand.
pub fn column(name: &str, source_type: &str, max_length: i32, pk: bool) -> ColumnDescriptor {
    ColumnDescriptor {
        name: name.into(),
        source_type: source_type.into(),
        max_length,
        precision: 0,
        scale: 0,
        nullable: !pk,
        is_primary_key: pk,
    }
}

/// Single-key table with `count` integer rows.
pub fn id_rows(count: i32) -> Vec<Vec<SqlValue>> {
    (1..=count).map(|i| vec![SqlValue::I32(i)]).collect()
}
