//! `SQLite` source: one stream per table or query.

use std::path::{Path, PathBuf};

use rusqlite::{params_from_iter, Connection};
use tidewater_engine::{Dataflow, Datastream, FlowOptions, ReadRequest, SourceConnection, StreamWriter};
use tidewater_types::{Column, ColumnType, Columns, FlowError, Row};

use crate::client::{self, db_err};
use crate::query::{self, SourceQuery};
use crate::type_map;

/// Reads from a `SQLite` database file. Each export opens its own read-only
/// connection, so a target writing to the same file is not blocked.
#[derive(Debug, Clone)]
pub struct SqliteSource {
    path: PathBuf,
}

impl SqliteSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Result columns of `query`, with declared types when every column has one.
fn describe(conn: &Connection, query: &SourceQuery) -> Result<(Columns, bool), FlowError> {
    let stmt = conn.prepare(&query.sql).map_err(|e| db_err("prepare", &e))?;
    let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();

    let declared = match &query.table {
        Some(table) => {
            let sql = "SELECT name, type FROM pragma_table_info(?1)";
            let mut info = conn.prepare(sql).map_err(|e| db_err("describe", &e))?;
            let rows = info
                .query_map([&table.name], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
                .map_err(|e| db_err("describe", &e))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(|e| db_err("describe", &e))?
        }
        None => Vec::new(),
    };

    let mut typed = query.table.is_some();
    let columns = names
        .into_iter()
        .map(|name| {
            let decl = declared
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(&name))
                .map(|(_, decl)| decl.clone());
            match decl.as_deref().and_then(type_map::column_type) {
                Some(ty) => {
                    let mut column = Column::new(name, ty);
                    column.db_type = decl;
                    column
                }
                None => {
                    typed = false;
                    Column::new(name, ColumnType::Text)
                }
            }
        })
        .collect();
    Ok((Columns::new(columns), typed))
}

fn produce(conn: &Connection, query: &SourceQuery, types: &[Option<ColumnType>], writer: &mut StreamWriter) -> Result<u64, FlowError> {
    let mut stmt = conn.prepare(&query.sql).map_err(|e| db_err("read", &e))?;
    let mut rows = stmt
        .query(params_from_iter(query.params.iter()))
        .map_err(|e| db_err("read", &e))?;
    let mut read = 0u64;
    while let Some(row) = rows.next().map_err(|e| db_err("read", &e))? {
        let values = types
            .iter()
            .enumerate()
            .map(|(i, ty)| row.get_ref(i).map(|v| type_map::from_sql(v, *ty)))
            .collect::<Result<Row, _>>()
            .map_err(|e| db_err("read", &e))?;
        writer.blocking_produce(values)?;
        read += 1;
    }
    Ok(read)
}

impl SourceConnection for SqliteSource {
    fn bulk_export(&self, request: &ReadRequest, options: &FlowOptions) -> Result<Dataflow, FlowError> {
        let query = query::build(request)?;
        let conn = client::open_read_only(&self.path)?;
        let (columns, typed) = describe(&conn, &query)?;
        let types: Vec<Option<ColumnType>> = columns
            .iter()
            .map(|c| typed.then_some(c.column_type))
            .collect();

        let name = query.table.as_ref().map_or_else(|| "query".to_string(), ToString::to_string);
        let (stream, mut writer) = Datastream::new(name.clone(), columns, *options);
        let flow = Dataflow::new(*options);
        flow.add_stream(stream)?;
        flow.set_inferred(typed);
        tracing::debug!(stream = %name, typed, sql = %query.sql, "Starting SQLite export");

        tokio::task::spawn_blocking(move || match produce(&conn, &query, &types, &mut writer) {
            Ok(rows) => match writer.blocking_finish() {
                Ok(()) => tracing::debug!(stream = %name, rows, "SQLite export finished"),
                Err(e) => tracing::debug!(stream = %name, error = %e, "SQLite export stopped"),
            },
            Err(e) => {
                tracing::debug!(stream = %name, error = %e, "SQLite export failed");
                writer.fail(e);
            }
        });
        Ok(flow)
    }
}
