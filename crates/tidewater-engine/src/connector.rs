//! Contracts between the engine and the stores it reads from and writes to.
//!
//! Target stores are driven synchronously through `&self`; adapters keep
//! their connection behind a `Mutex`. The engine calls them from
//! `spawn_blocking` via [`blocking`].

use std::fmt;
use std::sync::Arc;

use tidewater_types::{Column, Columns, ConnectorError, FlowError, Row, Value};

use crate::dataflow::Dataflow;
use crate::stream::FlowOptions;

/// Possibly schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    /// Parse `schema.table` or `table`.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Config`] for an empty name or empty parts.
    pub fn parse(raw: &str) -> Result<Self, FlowError> {
        let raw = raw.trim();
        let (schema, name) = match raw.split_once('.') {
            Some((schema, name)) => (Some(schema.trim()), name.trim()),
            None => (None, raw),
        };
        if name.is_empty() || schema.is_some_and(str::is_empty) {
            return Err(FlowError::Config(format!("invalid table name '{raw}'")));
        }
        Ok(Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }

    /// Same schema, different table name.
    #[must_use]
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            schema: self.schema.clone(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    #[default]
    Default,
    Serializable,
}

/// What a target store can do. Drives staging names, transaction layout and
/// merge strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct TargetCapabilities {
    pub native_upsert: bool,
    pub transactional_ddl: bool,
    pub serializable_merge: bool,
    pub supports_swap: bool,
    pub upper_case_identifiers: bool,
    pub max_identifier_len: Option<usize>,
}

impl Default for TargetCapabilities {
    fn default() -> Self {
        Self {
            native_upsert: false,
            transactional_ddl: false,
            serializable_merge: true,
            supports_swap: false,
            upper_case_identifiers: false,
            max_identifier_len: None,
        }
    }
}

/// A relational target store.
///
/// Every method may be called from a blocking thread while other calls on
/// the same connection are in flight; implementations serialize internally.
pub trait TargetConnection: Send + Sync {
    fn capabilities(&self) -> TargetCapabilities;

    /// # Errors
    ///
    /// Returns a [`ConnectorError`] when the store cannot be queried.
    fn table_exists(&self, table: &TableName) -> Result<bool, ConnectorError>;

    /// Columns of an existing table, in table order.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] when the table does not exist.
    fn get_columns(&self, table: &TableName) -> Result<Columns, ConnectorError>;

    /// Drop `table` if it exists.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on store failure.
    fn drop_table(&self, table: &TableName) -> Result<(), ConnectorError>;

    /// Create `table` unless it exists. `ddl` replaces the generated
    /// statement when given. Returns whether a table was created.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on store failure.
    fn create_table_if_not_exists(
        &self,
        table: &TableName,
        columns: &Columns,
        ddl: Option<&str>,
    ) -> Result<bool, ConnectorError>;

    /// Add every column of `columns` missing from `table`. Returns whether
    /// the table changed.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on store failure.
    fn add_missing_columns(&self, table: &TableName, columns: &Columns) -> Result<bool, ConnectorError>;

    /// Widen every column of `table` narrower than its counterpart in
    /// `columns`. Returns whether the table changed.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on store failure.
    fn optimize_column_type(&self, table: &TableName, columns: &Columns) -> Result<bool, ConnectorError>;

    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on store failure.
    fn alter_column_type(&self, table: &TableName, column: &Column) -> Result<(), ConnectorError>;

    /// Insert `rows`, laid out in `columns` order. Returns rows written.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on store failure.
    fn insert_rows(&self, table: &TableName, columns: &Columns, rows: &[Row]) -> Result<u64, ConnectorError>;

    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on store failure.
    fn count(&self, table: &TableName) -> Result<u64, ConnectorError>;

    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on store failure.
    fn truncate(&self, table: &TableName) -> Result<(), ConnectorError>;

    /// Copy `columns` from `src` into `dst`. With non-empty `dedupe_keys`,
    /// only the last staged row per key is copied.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on store failure.
    fn insert_from(
        &self,
        src: &TableName,
        dst: &TableName,
        columns: &Columns,
        dedupe_keys: &[String],
    ) -> Result<u64, ConnectorError>;

    /// Delete rows of `dst` whose `keys` match a row of `src`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on store failure.
    fn delete_matching(&self, src: &TableName, dst: &TableName, keys: &[String]) -> Result<u64, ConnectorError>;

    /// Native upsert of `src` into `dst` on `keys`, last staged row wins.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on store failure.
    fn upsert(
        &self,
        src: &TableName,
        dst: &TableName,
        columns: &Columns,
        keys: &[String],
    ) -> Result<u64, ConnectorError>;

    /// Exchange `staging` and `target`: afterwards `target` holds the staged
    /// rows and `staging` the previous table.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on store failure.
    fn swap_table(&self, staging: &TableName, target: &TableName) -> Result<(), ConnectorError>;

    /// One checksum per column, `None` where the type has no checksum.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on store failure.
    fn column_checksums(&self, table: &TableName, columns: &Columns) -> Result<Vec<Option<u64>>, ConnectorError>;

    /// Largest value of `column`, `None` for an empty table.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on store failure.
    fn max_value(&self, table: &TableName, column: &str) -> Result<Option<Value>, ConnectorError>;

    /// Run a raw statement.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on store failure.
    fn execute(&self, sql: &str) -> Result<(), ConnectorError>;

    /// # Errors
    ///
    /// Returns a [`ConnectorError`] if a transaction cannot be opened.
    fn begin(&self, isolation: IsolationLevel) -> Result<(), ConnectorError>;

    /// # Errors
    ///
    /// Returns a [`ConnectorError`] if the commit fails.
    fn commit(&self) -> Result<(), ConnectorError>;

    /// # Errors
    ///
    /// Returns a [`ConnectorError`] if the rollback fails.
    fn rollback(&self) -> Result<(), ConnectorError>;
}

/// What a source should read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadRequest {
    /// Table name or SQL query.
    pub stream: String,
    pub select: Vec<String>,
    pub primary_key: Vec<String>,
    pub update_key: Option<String>,
    /// Only rows with `update_key` strictly greater than this are read.
    pub incremental_value: Option<Value>,
    /// Inclusive `update_key` bounds for backfills.
    pub range: Option<(String, String)>,
    pub limit: Option<u64>,
}

impl ReadRequest {
    /// Whether `stream` is a query rather than a table name.
    #[must_use]
    pub fn is_query(&self) -> bool {
        let head = self.stream.trim_start().to_ascii_lowercase();
        head.starts_with("select ") || head.starts_with("with ") || self.stream.contains('\n')
    }
}

/// A relational source store.
pub trait SourceConnection: Send + Sync {
    /// Start streaming `request` into a new dataflow. Rows are produced by
    /// background tasks; the returned flow may still be sampling.
    ///
    /// # Errors
    ///
    /// Returns an error if the read cannot be started.
    fn bulk_export(&self, request: &ReadRequest, options: &FlowOptions) -> Result<Dataflow, FlowError>;
}

/// Options for reading delimited or line-oriented files.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct FileReadOptions {
    pub header: bool,
    pub delimiter: u8,
    pub empty_as_null: bool,
    pub null_if: Option<String>,
    pub trim_space: bool,
    pub limit: Option<u64>,
}

impl Default for FileReadOptions {
    fn default() -> Self {
        Self {
            header: true,
            delimiter: b',',
            empty_as_null: true,
            null_if: Some("NULL".to_string()),
            trim_space: false,
            limit: None,
        }
    }
}

/// Local or remote file storage.
pub trait FileSystem: Send + Sync {
    /// Open `uri` (a file or a directory of files) as a dataflow with one
    /// stream per file.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing can be opened at `uri`.
    fn read_dataflow(&self, uri: &str, read: &FileReadOptions, options: &FlowOptions) -> Result<Dataflow, FlowError>;

    /// Drain `flow` into `uri`. Returns bytes written. Runs on a blocking
    /// thread.
    ///
    /// # Errors
    ///
    /// Returns the flow's error or a write failure.
    fn write_dataflow(&self, flow: &Dataflow, uri: &str) -> Result<u64, FlowError>;
}

/// Run a target call on the blocking pool.
///
/// # Errors
///
/// Returns the call's error, or an internal [`ConnectorError`] if the
/// blocking task panicked.
pub async fn blocking<T, F>(target: &Arc<dyn TargetConnection>, f: F) -> Result<T, ConnectorError>
where
    T: Send + 'static,
    F: FnOnce(&dyn TargetConnection) -> Result<T, ConnectorError> + Send + 'static,
{
    let target = Arc::clone(target);
    tokio::task::spawn_blocking(move || f(target.as_ref()))
        .await
        .map_err(|e| ConnectorError::internal("BLOCKING_TASK", format!("target call panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("users", None, "users")]
    #[case("main.users", Some("main"), "users")]
    #[case(" main . users ", Some("main"), "users")]
    fn parses_table_names(#[case] raw: &str, #[case] schema: Option<&str>, #[case] name: &str) {
        let t = TableName::parse(raw).unwrap();
        assert_eq!(t.schema.as_deref(), schema);
        assert_eq!(t.name, name);
    }

    #[rstest]
    #[case("")]
    #[case(".users")]
    #[case("main.")]
    fn rejects_bad_table_names(#[case] raw: &str) {
        assert!(matches!(TableName::parse(raw), Err(FlowError::Config(_))));
    }

    #[test]
    fn display_round_trips() {
        let t = TableName::parse("main.users").unwrap();
        assert_eq!(t.to_string(), "main.users");
        assert_eq!(t.with_name("users_tmp").to_string(), "main.users_tmp");
    }

    #[test]
    fn detects_queries() {
        let mut req = ReadRequest {
            stream: "users".into(),
            ..ReadRequest::default()
        };
        assert!(!req.is_query());
        req.stream = "SELECT * FROM users".into();
        assert!(req.is_query());
    }

    #[test]
    fn float_watermarks_compare() {
        let req = ReadRequest {
            stream: "readings".into(),
            update_key: Some("measured".into()),
            incremental_value: Some(Value::Float(12.5)),
            ..ReadRequest::default()
        };
        assert_eq!(req.clone(), req);
        let later = ReadRequest {
            incremental_value: Some(Value::Float(13.0)),
            ..req.clone()
        };
        assert_ne!(later, req);
    }
}
