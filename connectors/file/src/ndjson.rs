//! Newline-delimited JSON files: one object per line.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value as Json};
use tidewater_engine::{Dataflow, FileReadOptions, StreamWriter};
use tidewater_types::{Column, ColumnType, Columns, ConnectorError, FlowError, Row, Value};

use crate::error::{io_err, json_err};

type Object = Map<String, Json>;

/// An opened NDJSON file whose first object has been read.
pub(crate) struct NdjsonReader {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
    names: Vec<String>,
    first: Option<Object>,
    limit: u64,
}

impl NdjsonReader {
    /// Open `path` and take the initial columns from its first object.
    pub(crate) fn open(path: &Path, options: &FileReadOptions) -> Result<(Columns, Self), FlowError> {
        let file = File::open(path).map_err(|e| io_err(path, &e))?;
        let mut reader = Self {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            line_no: 0,
            names: Vec::new(),
            first: None,
            limit: options.limit.unwrap_or(u64::MAX),
        };
        reader.first = reader.next_object()?;
        if let Some(first) = &reader.first {
            reader.names = first.keys().cloned().collect();
        }
        let columns = Columns::from_names(reader.names.clone(), ColumnType::String);
        Ok((columns, reader))
    }

    fn next_object(&mut self) -> Result<Option<Object>, FlowError> {
        for line in self.lines.by_ref() {
            self.line_no += 1;
            let line = line.map_err(|e| io_err(&self.path, &e))?;
            if line.trim().is_empty() {
                continue;
            }
            return match serde_json::from_str::<Json>(&line) {
                Ok(Json::Object(object)) => Ok(Some(object)),
                Ok(_) => Err(FlowError::Connector(ConnectorError::data(
                    "NDJSON_NOT_OBJECT",
                    format!("{} line {}: expected a JSON object", self.path.display(), self.line_no),
                ))),
                Err(e) => Err(json_err(&self.path, self.line_no, &e)),
            };
        }
        Ok(None)
    }

    /// Keys not seen before, in key order.
    fn new_keys(&self, object: &Object) -> Vec<String> {
        object
            .keys()
            .filter(|k| !self.names.iter().any(|n| n.eq_ignore_ascii_case(k)))
            .cloned()
            .collect()
    }

    fn row(&self, mut object: Object) -> Row {
        self.names
            .iter()
            .map(|name| object.remove(name).map_or(Value::Null, Value::from_json))
            .collect()
    }

    /// Produce every object into `writer`, declaring new keys as columns
    /// as they appear. Returns rows produced.
    pub(crate) fn run(mut self, writer: &mut StreamWriter) -> Result<u64, FlowError> {
        let mut produced = 0u64;
        let mut next = self.first.take();
        while produced < self.limit {
            let Some(object) = next else { break };
            let added = self.new_keys(&object);
            if !added.is_empty() {
                tracing::debug!(path = %self.path.display(), columns = ?added, "New keys in NDJSON input");
                writer.blocking_add_columns(
                    added
                        .iter()
                        .map(|name| Column::new(name.clone(), ColumnType::String))
                        .collect(),
                )?;
                self.names.extend(added);
            }
            let row = self.row(object);
            writer.blocking_produce(row)?;
            produced += 1;
            next = self.next_object()?;
        }
        Ok(produced)
    }
}

/// Drain `flow` into `path`, one JSON object per row.
pub(crate) fn write(flow: &Dataflow, path: &Path) -> Result<(), FlowError> {
    let file = File::create(path).map_err(|e| io_err(path, &e))?;
    let mut out = BufWriter::new(file);
    while let Some(batch) = flow.blocking_next_batch()? {
        let names = batch.schema.columns.names();
        for row in &batch.rows {
            let object: Object = names
                .iter()
                .zip(row)
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect();
            serde_json::to_writer(&mut out, &object).map_err(|e| {
                FlowError::Connector(ConnectorError::internal(
                    "NDJSON_WRITE",
                    format!("{}: {e}", path.display()),
                ))
            })?;
            out.write_all(b"\n").map_err(|e| io_err(path, &e))?;
        }
    }
    out.flush().map_err(|e| io_err(path, &e))
}
