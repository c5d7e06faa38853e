//! `SQLite` target store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension};
use tidewater_engine::{IsolationLevel, TableName, TargetCapabilities, TargetConnection};
use tidewater_types::{Column, ColumnType, Columns, ConnectorError, Row, Value};

use crate::client::{self, db_err, ident_list, qualified, quote_ident};
use crate::type_map;

/// A `SQLite` database driven as a load target.
///
/// `SQLite` runs DDL inside transactions, so staging-table creation and the
/// bulk insert share one transaction. It has no `ALTER COLUMN`; type
/// widening rebuilds the table under a savepoint.
pub struct SqliteTarget {
    conn: Mutex<Connection>,
    caps: TargetCapabilities,
}

impl SqliteTarget {
    /// Open or create the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, ConnectorError> {
        Ok(Self::from_connection(client::open_read_write(path)?))
    }

    /// A private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] if `SQLite` cannot allocate it.
    pub fn in_memory() -> Result<Self, ConnectorError> {
        Ok(Self::from_connection(client::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            caps: TargetCapabilities {
                native_upsert: true,
                transactional_ddl: true,
                serializable_merge: true,
                supports_swap: true,
                upper_case_identifiers: false,
                max_identifier_len: None,
            },
        }
    }

    /// Toggle `INSERT .. ON CONFLICT` merges. Without it, keyed incremental
    /// loads delete matching rows and re-insert.
    #[must_use]
    pub fn with_native_upsert(mut self, enabled: bool) -> Self {
        self.caps.native_upsert = enabled;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ConnectorError> {
        self.conn
            .lock()
            .map_err(|_| ConnectorError::internal("LOCK_POISONED", "sqlite connection lock poisoned"))
    }

    /// Run `sql` and return every row, typed by storage class only.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] if the query fails.
    pub fn query_rows(&self, sql: &str) -> Result<Vec<Row>, ConnectorError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(|e| db_err("query", &e))?;
        let width = stmt.column_count();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get_ref(i).map(|v| type_map::from_sql(v, None)))
                    .collect::<Result<Row, _>>()
            })
            .map_err(|e| db_err("query", &e))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(|e| db_err("query", &e))
    }
}

fn table_exists(conn: &Connection, table: &TableName) -> Result<bool, ConnectorError> {
    let master = match &table.schema {
        Some(schema) => format!("{}.sqlite_master", quote_ident(schema)),
        None => "sqlite_master".to_string(),
    };
    let sql = format!("SELECT COUNT(*) FROM {master} WHERE type IN ('table', 'view') AND name = ?1 COLLATE NOCASE");
    let found: i64 = conn
        .query_row(&sql, [&table.name], |row| row.get(0))
        .map_err(|e| db_err("table_exists", &e))?;
    Ok(found > 0)
}

fn get_columns(conn: &Connection, table: &TableName) -> Result<Columns, ConnectorError> {
    let (sql, args) = match &table.schema {
        Some(schema) => (
            "SELECT name, type FROM pragma_table_info(?1, ?2) ORDER BY cid",
            vec![table.name.clone(), schema.clone()],
        ),
        None => (
            "SELECT name, type FROM pragma_table_info(?1) ORDER BY cid",
            vec![table.name.clone()],
        ),
    };
    let mut stmt = conn.prepare(sql).map_err(|e| db_err("get_columns", &e))?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|e| db_err("get_columns", &e))?;
    let mut columns = Columns::default();
    for row in rows {
        let (name, decl) = row.map_err(|e| db_err("get_columns", &e))?;
        let mut column = Column::new(name, type_map::column_type(&decl).unwrap_or(ColumnType::Text));
        column.db_type = Some(decl);
        columns.push(column);
    }
    if columns.is_empty() {
        return Err(ConnectorError::schema("NO_TABLE", format!("no such table: {table}")));
    }
    Ok(columns)
}

fn column_defs(columns: &Columns) -> String {
    columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), type_map::sqlite_type(c.column_type)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn names(columns: &Columns) -> String {
    ident_list(columns.iter().map(|c| c.name.as_str()))
}

fn key_list(keys: &[String]) -> String {
    ident_list(keys.iter().map(String::as_str))
}

/// Last staged row per key wins: `rowid` follows insertion order.
fn last_per_key(src: &TableName, keys: &[String]) -> String {
    format!(
        "rowid IN (SELECT MAX(rowid) FROM {} GROUP BY {})",
        qualified(src),
        key_list(keys)
    )
}

/// Recreate `table` with `columns`, copying its rows. Runs under a savepoint
/// so it nests inside an open load transaction.
fn rebuild(conn: &Connection, table: &TableName, columns: &Columns) -> Result<(), ConnectorError> {
    let scratch = table.with_name(format!("{}_tw_rebuild", table.name));
    let cols = names(columns);
    let sql = format!(
        "DROP TABLE IF EXISTS {scratch}; \
         CREATE TABLE {scratch} ({defs}); \
         INSERT INTO {scratch} ({cols}) SELECT {cols} FROM {table}; \
         DROP TABLE {table}; \
         ALTER TABLE {scratch} RENAME TO {name};",
        scratch = qualified(&scratch),
        defs = column_defs(columns),
        table = qualified(table),
        name = quote_ident(&table.name),
    );
    conn.execute_batch("SAVEPOINT tw_rebuild")
        .map_err(|e| db_err("rebuild", &e))?;
    match conn.execute_batch(&sql) {
        Ok(()) => conn
            .execute_batch("RELEASE tw_rebuild")
            .map_err(|e| db_err("rebuild", &e)),
        Err(e) => {
            if let Err(undo) = conn.execute_batch("ROLLBACK TO tw_rebuild; RELEASE tw_rebuild") {
                tracing::warn!(table = %table, error = %undo, "Could not roll back table rebuild");
            }
            Err(db_err("rebuild", &e))
        }
    }
}

fn checksum_expr(column: &Column) -> Option<String> {
    let c = quote_ident(&column.name);
    match column.column_type {
        ColumnType::Boolean | ColumnType::Integer | ColumnType::BigInt => Some(format!("SUM(ABS({c}))")),
        ColumnType::String | ColumnType::Text | ColumnType::Json | ColumnType::Binary => {
            Some(format!("SUM(LENGTH({c}))"))
        }
        ColumnType::Date | ColumnType::Datetime | ColumnType::TimestampTz => {
            Some(format!("SUM(ABS(CAST(strftime('%s', {c}) AS INTEGER)))"))
        }
        ColumnType::Decimal | ColumnType::Float => None,
    }
}

fn changes(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

impl TargetConnection for SqliteTarget {
    fn capabilities(&self) -> TargetCapabilities {
        self.caps
    }

    fn table_exists(&self, table: &TableName) -> Result<bool, ConnectorError> {
        table_exists(&*self.lock()?, table)
    }

    fn get_columns(&self, table: &TableName) -> Result<Columns, ConnectorError> {
        get_columns(&*self.lock()?, table)
    }

    fn drop_table(&self, table: &TableName) -> Result<(), ConnectorError> {
        self.lock()?
            .execute_batch(&format!("DROP TABLE IF EXISTS {}", qualified(table)))
            .map_err(|e| db_err("drop_table", &e))
    }

    fn create_table_if_not_exists(
        &self,
        table: &TableName,
        columns: &Columns,
        ddl: Option<&str>,
    ) -> Result<bool, ConnectorError> {
        let conn = self.lock()?;
        if table_exists(&conn, table)? {
            return Ok(false);
        }
        let sql = match ddl {
            Some(ddl) => ddl.to_string(),
            None => format!("CREATE TABLE {} ({})", qualified(table), column_defs(columns)),
        };
        conn.execute_batch(&sql).map_err(|e| db_err("create_table", &e))?;
        tracing::debug!(table = %table, columns = columns.len(), "Created table");
        Ok(true)
    }

    fn add_missing_columns(&self, table: &TableName, columns: &Columns) -> Result<bool, ConnectorError> {
        let conn = self.lock()?;
        let existing = get_columns(&conn, table)?;
        let mut changed = false;
        for column in columns.iter().filter(|c| existing.get(&c.name).is_none()) {
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                qualified(table),
                quote_ident(&column.name),
                type_map::sqlite_type(column.column_type)
            );
            conn.execute_batch(&sql).map_err(|e| db_err("add_column", &e))?;
            tracing::debug!(table = %table, column = %column.name, "Added column");
            changed = true;
        }
        Ok(changed)
    }

    fn optimize_column_type(&self, table: &TableName, columns: &Columns) -> Result<bool, ConnectorError> {
        let conn = self.lock()?;
        let mut widened = get_columns(&conn, table)?;
        let mut changed = false;
        for column in columns {
            if let Some(existing) = widened.get_mut(&column.name) {
                changed |= existing.widen(column.column_type);
            }
        }
        if changed {
            rebuild(&conn, table, &widened)?;
        }
        Ok(changed)
    }

    fn alter_column_type(&self, table: &TableName, column: &Column) -> Result<(), ConnectorError> {
        let conn = self.lock()?;
        let mut altered = get_columns(&conn, table)?;
        let Some(existing) = altered.get_mut(&column.name) else {
            return Err(ConnectorError::schema(
                "NO_COLUMN",
                format!("no column {} in {table}", column.name),
            ));
        };
        if existing.column_type == column.column_type {
            return Ok(());
        }
        existing.column_type = column.column_type;
        rebuild(&conn, table, &altered)?;
        tracing::debug!(table = %table, column = %column.name, column_type = %column.column_type, "Altered column type");
        Ok(())
    }

    fn insert_rows(&self, table: &TableName, columns: &Columns, rows: &[Row]) -> Result<u64, ConnectorError> {
        let conn = self.lock()?;
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            qualified(table),
            names(columns)
        );
        let own_transaction = conn.is_autocommit();
        if own_transaction {
            conn.execute_batch("BEGIN").map_err(|e| db_err("insert", &e))?;
        }
        let result = (|| {
            let mut stmt = conn.prepare_cached(&sql)?;
            for row in rows {
                stmt.execute(params_from_iter(row.iter().map(type_map::to_sql)))?;
            }
            Ok::<_, rusqlite::Error>(())
        })();
        if own_transaction {
            let end = if result.is_ok() { "COMMIT" } else { "ROLLBACK" };
            conn.execute_batch(end).map_err(|e| db_err("insert", &e))?;
        }
        result.map_err(|e| db_err("insert", &e))?;
        Ok(rows.len() as u64)
    }

    fn count(&self, table: &TableName) -> Result<u64, ConnectorError> {
        let n: i64 = self
            .lock()?
            .query_row(&format!("SELECT COUNT(*) FROM {}", qualified(table)), [], |row| row.get(0))
            .map_err(|e| db_err("count", &e))?;
        Ok(n.unsigned_abs())
    }

    fn truncate(&self, table: &TableName) -> Result<(), ConnectorError> {
        self.lock()?
            .execute_batch(&format!("DELETE FROM {}", qualified(table)))
            .map_err(|e| db_err("truncate", &e))
    }

    fn insert_from(
        &self,
        src: &TableName,
        dst: &TableName,
        columns: &Columns,
        dedupe_keys: &[String],
    ) -> Result<u64, ConnectorError> {
        let cols = names(columns);
        let mut sql = format!("INSERT INTO {} ({cols}) SELECT {cols} FROM {}", qualified(dst), qualified(src));
        if !dedupe_keys.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&last_per_key(src, dedupe_keys));
        }
        let n = self.lock()?.execute(&sql, []).map_err(|e| db_err("insert_from", &e))?;
        Ok(changes(n))
    }

    fn delete_matching(&self, src: &TableName, dst: &TableName, keys: &[String]) -> Result<u64, ConnectorError> {
        let keys = key_list(keys);
        let sql = format!(
            "DELETE FROM {} WHERE ({keys}) IN (SELECT {keys} FROM {})",
            qualified(dst),
            qualified(src)
        );
        let n = self.lock()?.execute(&sql, []).map_err(|e| db_err("delete_matching", &e))?;
        Ok(changes(n))
    }

    fn upsert(
        &self,
        src: &TableName,
        dst: &TableName,
        columns: &Columns,
        keys: &[String],
    ) -> Result<u64, ConnectorError> {
        let conn = self.lock()?;
        let index = dst.with_name(format!("{}_tw_upsert_key", dst.name));
        let indexed = conn.execute_batch(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
            qualified(&index),
            quote_ident(&dst.name),
            key_list(keys)
        ));
        match indexed {
            Ok(()) => {}
            Err(rusqlite::Error::SqliteFailure(failure, msg)) if failure.code == ErrorCode::ConstraintViolation => {
                // Keys already repeat in the target; ON CONFLICT needs a unique index.
                drop(conn);
                tracing::warn!(
                    table = %dst,
                    error = msg.as_deref().unwrap_or("constraint violation"),
                    "Duplicate keys in target, merging with delete and insert"
                );
                let deleted = self.delete_matching(src, dst, keys)?;
                tracing::debug!(table = %dst, rows = deleted, "Deleted rows matching staged keys");
                return self.insert_from(src, dst, columns, keys);
            }
            Err(e) => return Err(db_err("upsert", &e)),
        }

        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !keys.iter().any(|k| c.matches(k)))
            .map(|c| {
                let q = quote_ident(&c.name);
                format!("{q} = excluded.{q}")
            })
            .collect();
        let action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        let cols = names(columns);
        let sql = format!(
            "INSERT INTO {dst} ({cols}) SELECT {cols} FROM {src} WHERE {filter} ON CONFLICT ({keys}) {action}",
            dst = qualified(dst),
            src = qualified(src),
            filter = last_per_key(src, keys),
            keys = key_list(keys),
        );
        let n = conn.execute(&sql, []).map_err(|e| db_err("upsert", &e))?;
        Ok(changes(n))
    }

    fn swap_table(&self, staging: &TableName, target: &TableName) -> Result<(), ConnectorError> {
        let conn = self.lock()?;
        let rename = |from: &TableName, to: &str| {
            conn.execute_batch(&format!("ALTER TABLE {} RENAME TO {}", qualified(from), quote_ident(to)))
                .map_err(|e| db_err("swap_table", &e))
        };
        if !table_exists(&conn, target)? {
            return rename(staging, &target.name);
        }
        let parked = target.with_name(format!("{}_tw_swap", target.name));
        rename(target, &parked.name)?;
        rename(staging, &target.name)?;
        rename(&parked, &staging.name)
    }

    fn column_checksums(&self, table: &TableName, columns: &Columns) -> Result<Vec<Option<u64>>, ConnectorError> {
        let exprs: Vec<Option<String>> = columns.iter().map(checksum_expr).collect();
        let selected: Vec<&str> = exprs.iter().flatten().map(String::as_str).collect();
        if selected.is_empty() {
            return Ok(vec![None; columns.len()]);
        }
        let sql = format!("SELECT {} FROM {}", selected.join(", "), qualified(table));
        let sums: Vec<Option<i64>> = self
            .lock()?
            .query_row(&sql, [], |row| (0..selected.len()).map(|i| row.get(i)).collect())
            .map_err(|e| db_err("column_checksums", &e))?;
        let mut sums = sums.into_iter();
        Ok(exprs
            .iter()
            .map(|expr| {
                expr.as_ref()
                    .map(|_| sums.next().flatten().map_or(0, i64::unsigned_abs))
            })
            .collect())
    }

    fn max_value(&self, table: &TableName, column: &str) -> Result<Option<Value>, ConnectorError> {
        let conn = self.lock()?;
        let columns = get_columns(&conn, table)?;
        let Some(col) = columns.get(column) else {
            return Err(ConnectorError::schema("NO_COLUMN", format!("no column {column} in {table}")));
        };
        let sql = format!("SELECT MAX({}) FROM {}", quote_ident(&col.name), qualified(table));
        let value = conn
            .query_row(&sql, [], |row| {
                row.get_ref(0).map(|v| type_map::from_sql(v, Some(col.column_type)))
            })
            .optional()
            .map_err(|e| db_err("max_value", &e))?;
        Ok(value.filter(|v| !v.is_null()))
    }

    fn execute(&self, sql: &str) -> Result<(), ConnectorError> {
        self.lock()?.execute_batch(sql).map_err(|e| db_err("execute", &e))
    }

    fn begin(&self, isolation: IsolationLevel) -> Result<(), ConnectorError> {
        let sql = match isolation {
            IsolationLevel::Default => "BEGIN",
            IsolationLevel::Serializable => "BEGIN IMMEDIATE",
        };
        self.lock()?.execute_batch(sql).map_err(|e| db_err("begin", &e))
    }

    fn commit(&self) -> Result<(), ConnectorError> {
        self.lock()?.execute_batch("COMMIT").map_err(|e| db_err("commit", &e))
    }

    fn rollback(&self) -> Result<(), ConnectorError> {
        let conn = self.lock()?;
        if conn.is_autocommit() {
            return Ok(());
        }
        conn.execute_batch("ROLLBACK").map_err(|e| db_err("rollback", &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Columns {
        Columns::new(vec![
            Column::new("id", ColumnType::Integer),
            Column::new("name", ColumnType::String),
            Column::new("age", ColumnType::Integer),
        ])
    }

    fn row(id: i64, name: &str, age: i64) -> Row {
        vec![Value::Int(id), Value::String(name.into()), Value::Int(age)]
    }

    fn seeded(table: &TableName, rows: &[Row]) -> SqliteTarget {
        let target = SqliteTarget::in_memory().unwrap();
        assert!(target.create_table_if_not_exists(table, &users(), None).unwrap());
        target.insert_rows(table, &users(), rows).unwrap();
        target
    }

    #[test]
    fn creates_and_reads_back_columns() {
        let table = TableName::new("users");
        let target = seeded(&table, &[]);
        assert!(target.table_exists(&TableName::new("USERS")).unwrap());
        assert!(!target.create_table_if_not_exists(&table, &users(), None).unwrap());
        let cols = target.get_columns(&table).unwrap();
        assert_eq!(cols.names(), vec!["id", "name", "age"]);
        assert_eq!(cols[1].column_type, ColumnType::String);
        assert_eq!(cols[1].db_type.as_deref(), Some("VARCHAR(255)"));
    }

    #[test]
    fn missing_table_is_a_schema_error() {
        let target = SqliteTarget::in_memory().unwrap();
        let err = target.get_columns(&TableName::new("nope")).unwrap_err();
        assert_eq!(err.code, "NO_TABLE");
    }

    #[test]
    fn widening_rebuilds_and_keeps_rows() {
        let table = TableName::new("users");
        let target = seeded(&table, &[row(1, "Alice", 30)]);
        target
            .alter_column_type(&table, &Column::new("age", ColumnType::String))
            .unwrap();
        let cols = target.get_columns(&table).unwrap();
        assert_eq!(cols.get("age").unwrap().column_type, ColumnType::String);
        assert_eq!(target.count(&table).unwrap(), 1);
        let rows = target.query_rows("SELECT age FROM users").unwrap();
        assert_eq!(rows, vec![vec![Value::String("30".into())]]);
    }

    #[test]
    fn optimize_only_widens() {
        let table = TableName::new("users");
        let target = seeded(&table, &[]);
        let narrower = Columns::new(vec![Column::new("age", ColumnType::Boolean)]);
        let wider = Columns::new(vec![Column::new("age", ColumnType::BigInt)]);
        assert!(target.optimize_column_type(&table, &wider).unwrap());
        assert!(!target.optimize_column_type(&table, &wider).unwrap());
        assert_eq!(
            target.get_columns(&table).unwrap().get("age").unwrap().column_type,
            ColumnType::BigInt
        );
        // boolean and numeric do not share a chain, so they meet at string.
        assert!(target.optimize_column_type(&table, &narrower).unwrap());
    }

    #[test]
    fn add_missing_columns_is_idempotent() {
        let table = TableName::new("users");
        let target = seeded(&table, &[row(1, "Alice", 30)]);
        let mut cols = users();
        cols.push(Column::new("email", ColumnType::Text));
        assert!(target.add_missing_columns(&table, &cols).unwrap());
        assert!(!target.add_missing_columns(&table, &cols).unwrap());
        assert_eq!(target.get_columns(&table).unwrap().len(), 4);
    }

    #[test]
    fn insert_from_dedupes_last_row_per_key() {
        let staging = TableName::new("users_tmp");
        let target = seeded(&staging, &[row(1, "Alice", 30), row(2, "Bob", 25), row(1, "Alice", 31)]);
        let final_table = TableName::new("users");
        target.create_table_if_not_exists(&final_table, &users(), None).unwrap();
        let n = target
            .insert_from(&staging, &final_table, &users(), &["id".to_string()])
            .unwrap();
        assert_eq!(n, 2);
        let rows = target.query_rows("SELECT id, age FROM users ORDER BY id").unwrap();
        assert_eq!(
            rows,
            vec![vec![Value::Int(1), Value::Int(31)], vec![Value::Int(2), Value::Int(25)]]
        );
    }

    #[test]
    fn delete_matching_removes_staged_keys() {
        let target = seeded(&TableName::new("users"), &[row(1, "Alice", 30), row(2, "Bob", 25)]);
        let staging = TableName::new("users_tmp");
        target.create_table_if_not_exists(&staging, &users(), None).unwrap();
        target.insert_rows(&staging, &users(), &[row(2, "Bob", 26)]).unwrap();
        let deleted = target
            .delete_matching(&staging, &TableName::new("users"), &["id".to_string()])
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(target.count(&TableName::new("users")).unwrap(), 1);
    }

    #[test]
    fn upsert_falls_back_when_target_keys_repeat() {
        let final_table = TableName::new("users");
        let target = seeded(&final_table, &[row(1, "Alice", 30), row(1, "Alice", 31), row(2, "Bob", 25)]);
        let staging = TableName::new("users_tmp");
        target.create_table_if_not_exists(&staging, &users(), None).unwrap();
        target
            .insert_rows(&staging, &users(), &[row(1, "Alice", 40), row(3, "Cleo", 35)])
            .unwrap();

        let n = target
            .upsert(&staging, &final_table, &users(), &["id".to_string()])
            .unwrap();
        assert_eq!(n, 2);
        let rows = target.query_rows("SELECT id, age FROM users ORDER BY id").unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::Int(1), Value::Int(40)],
                vec![Value::Int(2), Value::Int(25)],
                vec![Value::Int(3), Value::Int(35)],
            ]
        );
    }

    #[test]
    fn swap_exchanges_tables() {
        let final_table = TableName::new("users");
        let target = seeded(&final_table, &[row(1, "Old", 1)]);
        let staging = TableName::new("users_tmp");
        target.create_table_if_not_exists(&staging, &users(), None).unwrap();
        target
            .insert_rows(&staging, &users(), &[row(2, "New", 2), row(3, "Newer", 3)])
            .unwrap();
        target.swap_table(&staging, &final_table).unwrap();
        assert_eq!(target.count(&final_table).unwrap(), 2);
        assert_eq!(target.count(&staging).unwrap(), 1);
    }

    #[test]
    fn checksums_follow_column_types() {
        let table = TableName::new("t");
        let columns = Columns::new(vec![
            Column::new("n", ColumnType::BigInt),
            Column::new("s", ColumnType::Text),
            Column::new("f", ColumnType::Float),
            Column::new("d", ColumnType::Date),
        ]);
        let target = SqliteTarget::in_memory().unwrap();
        target.create_table_if_not_exists(&table, &columns, None).unwrap();
        let date = Value::String("1970-01-02".into()).cast(ColumnType::Date).unwrap();
        target
            .insert_rows(
                &table,
                &columns,
                &[
                    vec![Value::Int(-3), Value::String("héllo".into()), Value::Float(1.5), date],
                    vec![Value::Int(4), Value::Null, Value::Null, Value::Null],
                ],
            )
            .unwrap();
        let sums = target.column_checksums(&table, &columns).unwrap();
        assert_eq!(sums, vec![Some(7), Some(5), None, Some(86_400)]);
    }

    #[test]
    fn rollback_discards_staged_ddl() {
        let target = SqliteTarget::in_memory().unwrap();
        target.rollback().unwrap();
        target.begin(IsolationLevel::Default).unwrap();
        target
            .create_table_if_not_exists(&TableName::new("users"), &users(), None)
            .unwrap();
        target.rollback().unwrap();
        assert!(!target.table_exists(&TableName::new("users")).unwrap());
    }

    #[test]
    fn max_value_is_typed() {
        let table = TableName::new("users");
        let target = seeded(&table, &[]);
        assert_eq!(target.max_value(&table, "age").unwrap(), None);
        target
            .insert_rows(&table, &users(), &[row(1, "a", 30), row(2, "b", 41)])
            .unwrap();
        assert_eq!(target.max_value(&table, "AGE").unwrap(), Some(Value::Int(41)));
    }
}
