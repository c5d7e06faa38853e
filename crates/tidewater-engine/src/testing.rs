//! In-memory target store for engine tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tidewater_types::{Column, ColumnType, Columns, ConnectorError, Row, Value};

use crate::connector::{IsolationLevel, TableName, TargetCapabilities, TargetConnection};

#[derive(Debug, Clone, Default)]
struct MemTable {
    columns: Columns,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct MemState {
    tables: BTreeMap<String, MemTable>,
    snapshot: Option<BTreeMap<String, MemTable>>,
    executed: Vec<String>,
    fail_on: Option<String>,
}

#[derive(Debug, Default)]
pub struct MemoryTarget {
    caps: TargetCapabilities,
    state: Mutex<MemState>,
}

fn key(table: &TableName) -> String {
    table.to_string().to_lowercase()
}

fn missing(table: &TableName) -> ConnectorError {
    ConnectorError::schema("NO_TABLE", format!("no such table: {table}"))
}

fn project(row: &Row, from: &Columns, to: &Columns) -> Row {
    to.iter()
        .map(|c| {
            from.index_of(&c.name)
                .and_then(|i| row.get(i).cloned())
                .unwrap_or(Value::Null)
        })
        .collect()
}

fn key_values(row: &Row, columns: &Columns, keys: &[String]) -> Vec<String> {
    keys.iter()
        .map(|k| {
            columns
                .index_of(k)
                .and_then(|i| row.get(i))
                .map(ToString::to_string)
                .unwrap_or_default()
        })
        .collect()
}

impl MemoryTarget {
    pub fn with_capabilities(caps: TargetCapabilities) -> Self {
        Self {
            caps,
            state: Mutex::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every call of `op` fail.
    pub fn fail_on(&self, op: &str) {
        self.lock().fail_on = Some(op.to_string());
    }

    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    pub fn rows(&self, table: &TableName) -> Vec<Row> {
        self.lock()
            .tables
            .get(&key(table))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    fn check(&self, op: &str) -> Result<MutexGuard<'_, MemState>, ConnectorError> {
        let state = self.lock();
        if state.fail_on.as_deref() == Some(op) {
            return Err(ConnectorError::transient_db("INJECTED", format!("{op} failed")));
        }
        Ok(state)
    }
}

impl TargetConnection for MemoryTarget {
    fn capabilities(&self) -> TargetCapabilities {
        self.caps
    }

    fn table_exists(&self, table: &TableName) -> Result<bool, ConnectorError> {
        Ok(self.check("table_exists")?.tables.contains_key(&key(table)))
    }

    fn get_columns(&self, table: &TableName) -> Result<Columns, ConnectorError> {
        let state = self.check("get_columns")?;
        state
            .tables
            .get(&key(table))
            .map(|t| t.columns.clone())
            .ok_or_else(|| missing(table))
    }

    fn drop_table(&self, table: &TableName) -> Result<(), ConnectorError> {
        self.check("drop_table")?.tables.remove(&key(table));
        Ok(())
    }

    fn create_table_if_not_exists(
        &self,
        table: &TableName,
        columns: &Columns,
        _ddl: Option<&str>,
    ) -> Result<bool, ConnectorError> {
        let mut state = self.check("create_table")?;
        if state.tables.contains_key(&key(table)) {
            return Ok(false);
        }
        state.tables.insert(
            key(table),
            MemTable {
                columns: columns.clone(),
                rows: Vec::new(),
            },
        );
        Ok(true)
    }

    fn add_missing_columns(&self, table: &TableName, columns: &Columns) -> Result<bool, ConnectorError> {
        let mut state = self.check("add_missing_columns")?;
        let t = state.tables.get_mut(&key(table)).ok_or_else(|| missing(table))?;
        let mut changed = false;
        for col in columns {
            if t.columns.get(&col.name).is_none() {
                t.columns.push(col.clone());
                for row in &mut t.rows {
                    row.push(Value::Null);
                }
                changed = true;
            }
        }
        Ok(changed)
    }

    fn optimize_column_type(&self, table: &TableName, columns: &Columns) -> Result<bool, ConnectorError> {
        let mut state = self.check("optimize_column_type")?;
        let t = state.tables.get_mut(&key(table)).ok_or_else(|| missing(table))?;
        let mut changed = false;
        for col in columns {
            if let Some(existing) = t.columns.get_mut(&col.name) {
                changed |= existing.widen(col.column_type);
            }
        }
        Ok(changed)
    }

    fn alter_column_type(&self, table: &TableName, column: &Column) -> Result<(), ConnectorError> {
        let mut state = self.check("alter_column_type")?;
        let t = state.tables.get_mut(&key(table)).ok_or_else(|| missing(table))?;
        if let Some(existing) = t.columns.get_mut(&column.name) {
            existing.column_type = column.column_type;
        }
        Ok(())
    }

    fn insert_rows(&self, table: &TableName, columns: &Columns, rows: &[Row]) -> Result<u64, ConnectorError> {
        let mut state = self.check("insert_rows")?;
        let t = state.tables.get_mut(&key(table)).ok_or_else(|| missing(table))?;
        for row in rows {
            let projected = project(row, columns, &t.columns);
            t.rows.push(projected);
        }
        Ok(rows.len() as u64)
    }

    fn count(&self, table: &TableName) -> Result<u64, ConnectorError> {
        let state = self.check("count")?;
        let t = state.tables.get(&key(table)).ok_or_else(|| missing(table))?;
        Ok(t.rows.len() as u64)
    }

    fn truncate(&self, table: &TableName) -> Result<(), ConnectorError> {
        let mut state = self.check("truncate")?;
        let t = state.tables.get_mut(&key(table)).ok_or_else(|| missing(table))?;
        t.rows.clear();
        Ok(())
    }

    fn insert_from(
        &self,
        src: &TableName,
        dst: &TableName,
        columns: &Columns,
        dedupe_keys: &[String],
    ) -> Result<u64, ConnectorError> {
        let mut state = self.check("insert_from")?;
        let source = state.tables.get(&key(src)).cloned().ok_or_else(|| missing(src))?;
        let mut rows: Vec<&Row> = source.rows.iter().collect();
        if !dedupe_keys.is_empty() {
            let mut last: BTreeMap<Vec<String>, usize> = BTreeMap::new();
            for (i, row) in rows.iter().enumerate() {
                last.insert(key_values(row, &source.columns, dedupe_keys), i);
            }
            let keep: std::collections::BTreeSet<usize> = last.into_values().collect();
            rows = rows
                .into_iter()
                .enumerate()
                .filter(|(i, _)| keep.contains(i))
                .map(|(_, r)| r)
                .collect();
        }
        let t = state.tables.get_mut(&key(dst)).ok_or_else(|| missing(dst))?;
        for row in &rows {
            let selected = project(row, &source.columns, columns);
            t.rows.push(project(&selected, columns, &t.columns));
        }
        Ok(rows.len() as u64)
    }

    fn delete_matching(&self, src: &TableName, dst: &TableName, keys: &[String]) -> Result<u64, ConnectorError> {
        let mut state = self.check("delete_matching")?;
        let source = state.tables.get(&key(src)).cloned().ok_or_else(|| missing(src))?;
        let staged: std::collections::BTreeSet<Vec<String>> = source
            .rows
            .iter()
            .map(|r| key_values(r, &source.columns, keys))
            .collect();
        let t = state.tables.get_mut(&key(dst)).ok_or_else(|| missing(dst))?;
        let before = t.rows.len();
        let columns = t.columns.clone();
        t.rows.retain(|r| !staged.contains(&key_values(r, &columns, keys)));
        Ok((before - t.rows.len()) as u64)
    }

    fn upsert(
        &self,
        src: &TableName,
        dst: &TableName,
        columns: &Columns,
        keys: &[String],
    ) -> Result<u64, ConnectorError> {
        self.delete_matching(src, dst, keys)?;
        self.insert_from(src, dst, columns, keys)
    }

    fn swap_table(&self, staging: &TableName, target: &TableName) -> Result<(), ConnectorError> {
        let mut state = self.check("swap_table")?;
        let staged = state.tables.remove(&key(staging)).ok_or_else(|| missing(staging))?;
        if let Some(previous) = state.tables.remove(&key(target)) {
            state.tables.insert(key(staging), previous);
        }
        state.tables.insert(key(target), staged);
        Ok(())
    }

    fn column_checksums(&self, table: &TableName, columns: &Columns) -> Result<Vec<Option<u64>>, ConnectorError> {
        let state = self.check("column_checksums")?;
        let t = state.tables.get(&key(table)).ok_or_else(|| missing(table))?;
        Ok(columns
            .iter()
            .map(|col| {
                if matches!(col.column_type, ColumnType::Decimal | ColumnType::Float) {
                    return None;
                }
                let idx = t.columns.index_of(&col.name)?;
                t.rows
                    .iter()
                    .try_fold(0u64, |acc, r| match r.get(idx) {
                        Some(Value::Null) | None => Some(acc),
                        Some(v) => v.checksum().map(|c| acc.wrapping_add(c)),
                    })
            })
            .collect())
    }

    fn max_value(&self, table: &TableName, column: &str) -> Result<Option<Value>, ConnectorError> {
        let state = self.check("max_value")?;
        let t = state.tables.get(&key(table)).ok_or_else(|| missing(table))?;
        let Some(idx) = t.columns.index_of(column) else {
            return Err(ConnectorError::schema("NO_COLUMN", format!("no such column: {column}")));
        };
        Ok(t.rows
            .iter()
            .filter_map(|r| r.get(idx))
            .filter(|v| !v.is_null())
            .max_by(|a, b| match (a, b) {
                (Value::Int(x), Value::Int(y)) => x.cmp(y),
                _ => a.to_string().cmp(&b.to_string()),
            })
            .cloned())
    }

    fn execute(&self, sql: &str) -> Result<(), ConnectorError> {
        self.check("execute")?.executed.push(sql.to_string());
        Ok(())
    }

    fn begin(&self, _isolation: IsolationLevel) -> Result<(), ConnectorError> {
        let mut state = self.check("begin")?;
        state.snapshot = Some(state.tables.clone());
        Ok(())
    }

    fn commit(&self) -> Result<(), ConnectorError> {
        self.check("commit")?.snapshot = None;
        Ok(())
    }

    fn rollback(&self) -> Result<(), ConnectorError> {
        let mut state = self.lock();
        if let Some(snapshot) = state.snapshot.take() {
            state.tables = snapshot;
        }
        Ok(())
    }
}
