//! Connection setup, identifier quoting and error mapping.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, OpenFlags};
use tidewater_engine::TableName;
use tidewater_types::ConnectorError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Open a read-write database, creating it if needed. File databases run in
/// WAL mode so a source can read while a target on the same file writes.
pub(crate) fn open_read_write(path: &Path) -> Result<Connection, ConnectorError> {
    let conn = Connection::open(path).map_err(|e| db_err("open", &e))?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(|e| db_err("open", &e))?;
    let mode: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .map_err(|e| db_err("open", &e))?;
    tracing::debug!(path = %path.display(), journal_mode = %mode, "Opened SQLite database");
    Ok(conn)
}

pub(crate) fn open_in_memory() -> Result<Connection, ConnectorError> {
    Connection::open_in_memory().map_err(|e| db_err("open", &e))
}

pub(crate) fn open_read_only(path: &Path) -> Result<Connection, ConnectorError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;
    let conn = Connection::open_with_flags(path, flags).map_err(|e| db_err("open", &e))?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(|e| db_err("open", &e))?;
    Ok(conn)
}

/// Double-quote an identifier, escaping embedded quotes.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quoted, possibly schema-qualified table reference.
pub(crate) fn qualified(table: &TableName) -> String {
    match &table.schema {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&table.name)),
        None => quote_ident(&table.name),
    }
}

/// Comma-separated quoted identifiers.
pub(crate) fn ident_list<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names.into_iter().map(quote_ident).collect::<Vec<_>>().join(", ")
}

/// Map a rusqlite error onto the connector error taxonomy.
pub(crate) fn db_err(op: &str, err: &rusqlite::Error) -> ConnectorError {
    let message = format!("{op}: {err}");
    let rusqlite::Error::SqliteFailure(failure, _) = err else {
        return ConnectorError::internal("SQLITE_CLIENT", message);
    };
    match failure.code {
        ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => ConnectorError::transient_db("SQLITE_BUSY", message),
        ErrorCode::ConstraintViolation => ConnectorError::data("SQLITE_CONSTRAINT", message),
        ErrorCode::PermissionDenied | ErrorCode::ReadOnly => ConnectorError::permission("SQLITE_READONLY", message),
        ErrorCode::CannotOpen | ErrorCode::NotADatabase => ConnectorError::config("SQLITE_CANTOPEN", message),
        ErrorCode::Unknown => ConnectorError::schema("SQLITE_ERROR", message),
        _ => ConnectorError::transient_db("SQLITE_FAILURE", message),
    }
}
