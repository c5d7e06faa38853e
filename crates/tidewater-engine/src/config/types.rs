//! Task configuration as written in YAML, and its prepared form.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use tidewater_types::{ColumnCasing, LoadMode, SchemaPolicy};

use crate::connector::{FileReadOptions, ReadRequest, TableName};
use crate::inference::{InferenceOptions, DEFAULT_SAFE_MIN_ROWS, DEFAULT_SAMPLE_SIZE};
use crate::orchestrator::{LoadOptions, LoadSpec, DEFAULT_CHECKSUM_MAX_ROWS};
use crate::stream::{FlowOptions, DEFAULT_BATCH_ROWS, DEFAULT_QUEUE_BATCHES};
use crate::writer::DEFAULT_WRITERS;

/// Environment variable overriding the default sample size.
pub const SAMPLE_SIZE_ENV: &str = "SAMPLE_SIZE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub version: String,
    pub task: String,
    #[serde(default)]
    pub mode: LoadMode,
    pub source: SourceConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub conn: String,
    /// Table name or SQL query; file sources read `conn` itself.
    #[serde(default)]
    pub stream: Option<String>,
    #[serde(default)]
    pub select: Vec<String>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub update_key: Option<String>,
    #[serde(default)]
    pub options: SourceOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceOptions {
    #[serde(default)]
    pub limit: Option<u64>,
    /// Backfill bounds, `"start,end"`.
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub header: Option<bool>,
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub empty_as_null: Option<bool>,
    #[serde(default)]
    pub null_if: Option<String>,
    #[serde(default)]
    pub trim_space: Option<bool>,
    #[serde(default)]
    pub ragged: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub conn: String,
    /// Target table, `schema.table` or `table`. Unused for file targets.
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub options: TargetOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetOptions {
    #[serde(default)]
    pub table_tmp: Option<String>,
    #[serde(default)]
    pub table_ddl: Option<String>,
    #[serde(default)]
    pub pre_sql: Option<String>,
    #[serde(default)]
    pub post_sql: Option<String>,
    #[serde(default)]
    pub column_casing: ColumnCasing,
    #[serde(default)]
    pub use_swap: bool,
    #[serde(default)]
    pub allow_empty: bool,
    #[serde(default)]
    pub schema_evolution: SchemaPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default = "default_true")]
    pub safe_inference: bool,
    #[serde(default = "default_safe_min_rows")]
    pub safe_min_rows: usize,
    #[serde(default = "default_batch_rows")]
    pub batch_rows: usize,
    #[serde(default = "default_queue_batches")]
    pub queue_batches: usize,
    #[serde(default = "default_writers")]
    pub writers: usize,
    #[serde(default = "default_checksum_max_rows")]
    pub checksum_max_rows: u64,
    #[serde(default)]
    pub strict_checksum: bool,
}

fn default_sample_size() -> usize {
    std::env::var(SAMPLE_SIZE_ENV)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(DEFAULT_SAMPLE_SIZE)
}
fn default_true() -> bool {
    true
}
fn default_safe_min_rows() -> usize {
    DEFAULT_SAFE_MIN_ROWS
}
fn default_batch_rows() -> usize {
    DEFAULT_BATCH_ROWS
}
fn default_queue_batches() -> usize {
    DEFAULT_QUEUE_BATCHES
}
fn default_writers() -> usize {
    DEFAULT_WRITERS
}
fn default_checksum_max_rows() -> u64 {
    DEFAULT_CHECKSUM_MAX_ROWS
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            safe_inference: true,
            safe_min_rows: default_safe_min_rows(),
            batch_rows: default_batch_rows(),
            queue_batches: default_queue_batches(),
            writers: default_writers(),
            checksum_max_rows: default_checksum_max_rows(),
            strict_checksum: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnKind {
    Sqlite,
    File,
}

/// Parsed connection URL: `sqlite://<path>` or `file://<path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnUrl {
    pub kind: ConnKind,
    pub path: PathBuf,
}

impl ConnUrl {
    /// # Errors
    ///
    /// Returns an error for unknown schemes or empty paths.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (kind, rest) = if let Some(rest) = raw.strip_prefix("sqlite://") {
            (ConnKind::Sqlite, rest)
        } else if let Some(rest) = raw.strip_prefix("file://") {
            (ConnKind::File, rest)
        } else {
            bail!("unsupported connection '{raw}' (expected sqlite:// or file://)");
        };
        if rest.is_empty() {
            bail!("connection '{raw}' has no path");
        }
        Ok(Self {
            kind,
            path: PathBuf::from(rest),
        })
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind == ConnKind::File
    }
}

impl std::fmt::Display for ConnUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = match self.kind {
            ConnKind::Sqlite => "sqlite",
            ConnKind::File => "file",
        };
        write!(f, "{scheme}://{}", self.path.display())
    }
}

/// Source side of a prepared task.
#[derive(Debug, Clone)]
pub struct PreparedSource {
    pub conn: ConnUrl,
    pub request: ReadRequest,
    pub file: FileReadOptions,
}

/// Target side of a prepared task.
#[derive(Debug, Clone)]
pub enum PreparedTarget {
    Database { conn: ConnUrl, load: LoadSpec },
    File { conn: ConnUrl },
}

/// A task with every option resolved to engine types.
#[derive(Debug, Clone)]
pub struct PreparedTask {
    pub name: String,
    pub mode: LoadMode,
    pub source: PreparedSource,
    pub target: PreparedTarget,
    pub flow: FlowOptions,
}

/// Parse a backfill range `"start,end"`.
///
/// # Errors
///
/// Returns an error unless there are exactly two non-empty bounds.
pub fn parse_range(raw: &str) -> Result<(String, String)> {
    match raw.split_once(',') {
        Some((start, end)) if !start.trim().is_empty() && !end.trim().is_empty() && !end.contains(',') => {
            Ok((start.trim().to_string(), end.trim().to_string()))
        }
        _ => bail!("invalid range '{raw}' (expected \"start,end\")"),
    }
}

fn parse_delimiter(raw: &str) -> Result<u8> {
    match raw {
        "\\t" | "tab" | "\t" => Ok(b'\t'),
        d if d.len() == 1 && d.is_ascii() => Ok(d.as_bytes()[0]),
        other => bail!("invalid delimiter '{other}' (expected one ASCII character)"),
    }
}

impl TaskConfig {
    /// Resolve the configuration into a [`PreparedTask`]. File sources get
    /// delimited-file defaults; database sources ignore file options.
    ///
    /// # Errors
    ///
    /// Returns an error for unparseable connections, table names, ranges or
    /// delimiters.
    pub fn prepare(&self) -> Result<PreparedTask> {
        let source_conn = ConnUrl::parse(&self.source.conn).context("invalid source connection")?;
        let target_conn = ConnUrl::parse(&self.target.conn).context("invalid target connection")?;
        let opts = &self.source.options;

        let mut file = FileReadOptions::default();
        if source_conn.is_file() {
            if let Some(header) = opts.header {
                file.header = header;
            }
            if let Some(delimiter) = &opts.delimiter {
                file.delimiter = parse_delimiter(delimiter)?;
            }
            if let Some(empty_as_null) = opts.empty_as_null {
                file.empty_as_null = empty_as_null;
            }
            if let Some(null_if) = &opts.null_if {
                file.null_if = Some(null_if.clone()).filter(|s| !s.is_empty());
            }
            if let Some(trim_space) = opts.trim_space {
                file.trim_space = trim_space;
            }
        }
        let limit = opts.limit.filter(|l| *l > 0);
        file.limit = limit;

        let stream = match &self.source.stream {
            Some(stream) => stream.clone(),
            None if source_conn.is_file() => source_conn.path.display().to_string(),
            None => bail!("source stream is required for database sources"),
        };
        let range = opts.range.as_deref().map(parse_range).transpose()?;
        let request = ReadRequest {
            stream,
            select: self.source.select.clone(),
            primary_key: self.source.primary_key.clone(),
            update_key: self.source.update_key.clone(),
            incremental_value: None,
            range,
            limit,
        };

        let res = &self.resources;
        let flow = FlowOptions {
            batch_rows: res.batch_rows,
            queue_batches: res.queue_batches,
            sample_size: res.sample_size,
            ragged: source_conn.is_file() && opts.ragged.unwrap_or(false),
        };

        let target = if target_conn.is_file() {
            PreparedTarget::File { conn: target_conn }
        } else {
            let object = self
                .target
                .object
                .as_deref()
                .context("target object is required for database targets")?;
            let t = &self.target.options;
            PreparedTarget::Database {
                conn: target_conn,
                load: LoadSpec {
                    table: TableName::parse(object)?,
                    mode: self.mode,
                    options: LoadOptions {
                        table_tmp: t.table_tmp.clone(),
                        table_ddl: t.table_ddl.clone(),
                        pre_sql: t.pre_sql.clone(),
                        post_sql: t.post_sql.clone(),
                        casing: t.column_casing,
                        use_swap: t.use_swap,
                        allow_empty: t.allow_empty,
                        policy: t.schema_evolution,
                        writers: res.writers,
                        inference: InferenceOptions {
                            safe: res.safe_inference,
                            safe_min_rows: res.safe_min_rows,
                        },
                        checksum_max_rows: res.checksum_max_rows,
                        strict_checksum: res.strict_checksum,
                    },
                },
            }
        };

        Ok(PreparedTask {
            name: self.task.clone(),
            mode: self.mode,
            source: PreparedSource {
                conn: source_conn,
                request,
                file,
            },
            target,
            flow,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidewater_types::{ColumnPolicy, TypeChangePolicy};

    fn minimal() -> &'static str {
        r#"
version: "1.0"
task: users_load
source:
  conn: file:///data/users.csv
target:
  conn: sqlite:///data/dst.db
  object: main.users
"#
    }

    #[test]
    fn deserialize_minimal_task_applies_defaults() {
        let config: TaskConfig = serde_yaml::from_str(minimal()).unwrap();
        assert_eq!(config.mode, LoadMode::FullRefresh);
        assert_eq!(config.resources.writers, DEFAULT_WRITERS);
        assert_eq!(config.resources.batch_rows, DEFAULT_BATCH_ROWS);
        assert!(config.resources.safe_inference);
        assert_eq!(config.target.options.column_casing, ColumnCasing::Source);

        let prepared = config.prepare().unwrap();
        assert_eq!(prepared.source.request.stream, "/data/users.csv");
        assert!(prepared.source.file.header);
        assert_eq!(prepared.source.file.null_if.as_deref(), Some("NULL"));
        let PreparedTarget::Database { load, .. } = prepared.target else {
            panic!("expected database target");
        };
        assert_eq!(load.table.to_string(), "main.users");
    }

    #[test]
    fn deserialize_full_task() {
        let yaml = r#"
version: "1.0"
task: users_load
mode: incremental
source:
  conn: sqlite:///data/src.db
  stream: users
  select: [id, name]
  primary_key: [id]
  update_key: updated_at
  options: { limit: 10, delimiter: ";" }
target:
  conn: sqlite:///data/dst.db
  object: users
  options:
    column_casing: snake
    use_swap: true
    schema_evolution: { new_column: fail, type_change: ignore }
resources:
  writers: 2
  strict_checksum: true
"#;
        let config: TaskConfig = serde_yaml::from_str(yaml).unwrap();
        let prepared = config.prepare().unwrap();
        assert_eq!(prepared.mode, LoadMode::Incremental);
        assert_eq!(prepared.source.request.limit, Some(10));
        // File options are ignored for database sources.
        assert_eq!(prepared.source.file.delimiter, b',');
        let PreparedTarget::Database { load, .. } = prepared.target else {
            panic!("expected database target");
        };
        assert_eq!(load.options.casing, ColumnCasing::Snake);
        assert_eq!(load.options.policy.new_column, ColumnPolicy::Fail);
        assert_eq!(load.options.policy.type_change, TypeChangePolicy::Ignore);
        assert_eq!(load.options.writers, 2);
        assert!(load.options.strict_checksum);
    }

    #[test]
    fn conn_urls() {
        let url = ConnUrl::parse("sqlite:///tmp/x.db").unwrap();
        assert_eq!(url.kind, ConnKind::Sqlite);
        assert_eq!(url.path, PathBuf::from("/tmp/x.db"));
        assert_eq!(url.to_string(), "sqlite:///tmp/x.db");
        assert!(ConnUrl::parse("postgres://localhost").is_err());
        assert!(ConnUrl::parse("file://").is_err());
    }

    #[test]
    fn ranges() {
        assert_eq!(parse_range("1, 100").unwrap(), ("1".into(), "100".into()));
        assert!(parse_range("1").is_err());
        assert!(parse_range("1,").is_err());
        assert!(parse_range("1,2,3").is_err());
    }
}
