//! SELECT construction for source reads.

use rusqlite::types::Value as SqlValue;
use tidewater_engine::{ReadRequest, TableName};
use tidewater_types::FlowError;

use crate::client::{ident_list, qualified, quote_ident};
use crate::type_map;

/// A statement and its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SourceQuery {
    pub(crate) sql: String,
    pub(crate) params: Vec<SqlValue>,
    /// Table read, `None` for a custom query.
    pub(crate) table: Option<TableName>,
}

/// Build the read for `request`.
///
/// Table streams select `select` (or every column). Queries are wrapped so
/// the incremental, range and limit clauses apply to their output.
pub(crate) fn build(request: &ReadRequest) -> Result<SourceQuery, FlowError> {
    let projection = if request.select.is_empty() {
        "*".to_string()
    } else {
        ident_list(request.select.iter().map(String::as_str))
    };

    let (from, table) = if request.is_query() {
        let inner = request.stream.trim().trim_end_matches(';');
        (format!("({inner}) AS tw_source"), None)
    } else {
        let table = TableName::parse(&request.stream)?;
        (qualified(&table), Some(table))
    };

    let mut sql = format!("SELECT {projection} FROM {from}");
    let mut params = Vec::new();
    let mut conditions = Vec::new();

    if let Some(update_key) = &request.update_key {
        let key = quote_ident(update_key);
        if let Some(value) = &request.incremental_value {
            conditions.push(format!("{key} > ?"));
            params.push(type_map::to_sql(value));
        }
        if let Some((low, high)) = &request.range {
            conditions.push(format!("{key} >= ? AND {key} <= ?"));
            params.push(SqlValue::Text(low.clone()));
            params.push(SqlValue::Text(high.clone()));
        }
    }
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    if let Some(update_key) = &request.update_key {
        sql.push_str(&format!(" ORDER BY {}", quote_ident(update_key)));
    }
    if let Some(limit) = request.limit.filter(|l| *l > 0) {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    Ok(SourceQuery { sql, params, table })
}
