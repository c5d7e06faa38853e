//! Delimited (CSV, TSV) files.

use std::fs::File;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use tidewater_engine::{Dataflow, FileReadOptions, StreamWriter};
use tidewater_types::{ColumnType, Columns, FlowError, Row, Value};

use crate::error::{csv_err, io_err};

/// An opened delimited file whose header has already been read.
pub(crate) struct DelimitedReader {
    path: PathBuf,
    reader: csv::Reader<File>,
    /// First data row when the file has no header.
    first: Option<StringRecord>,
    options: FileReadOptions,
}

fn generated_name(position: usize) -> String {
    format!("col_{position:03}")
}

fn header_names(record: &StringRecord) -> Vec<String> {
    record
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let name = name.trim();
            if name.is_empty() {
                generated_name(i + 1)
            } else {
                name.to_string()
            }
        })
        .collect()
}

/// Map one raw field to a value under the null rules of `options`.
pub(crate) fn field_value(raw: &str, options: &FileReadOptions) -> Value {
    let field = if options.trim_space { raw.trim() } else { raw };
    if field.is_empty() && options.empty_as_null {
        return Value::Null;
    }
    if options.null_if.as_deref() == Some(field) {
        return Value::Null;
    }
    Value::String(field.to_string())
}

impl DelimitedReader {
    /// Open `path` and read its header (or, without one, its first row to
    /// size the generated column names).
    pub(crate) fn open(path: &Path, options: &FileReadOptions) -> Result<(Columns, Self), FlowError> {
        let file = File::open(path).map_err(|e| io_err(path, &e))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(options.delimiter)
            .from_reader(file);

        let mut record = StringRecord::new();
        let has_row = reader.read_record(&mut record).map_err(|e| csv_err(path, &e))?;
        let (names, first) = match (has_row, options.header) {
            (false, _) => (Vec::new(), None),
            (true, true) => (header_names(&record), None),
            (true, false) => ((1..=record.len()).map(generated_name).collect(), Some(record)),
        };
        let columns = Columns::from_names(names, ColumnType::String);
        Ok((
            columns,
            Self {
                path: path.to_path_buf(),
                reader,
                first,
                options: options.clone(),
            },
        ))
    }

    fn row(&self, record: &StringRecord) -> Row {
        record.iter().map(|f| field_value(f, &self.options)).collect()
    }

    /// Produce every remaining row into `writer`. Returns rows produced.
    pub(crate) fn run(mut self, writer: &mut StreamWriter) -> Result<u64, FlowError> {
        let limit = self.options.limit.unwrap_or(u64::MAX);
        let mut produced = 0u64;
        if let Some(first) = self.first.take() {
            if produced < limit {
                writer.blocking_produce(self.row(&first))?;
                produced += 1;
            }
        }
        let mut record = StringRecord::new();
        while produced < limit {
            if !self
                .reader
                .read_record(&mut record)
                .map_err(|e| csv_err(&self.path, &e))?
            {
                break;
            }
            writer.blocking_produce(self.row(&record))?;
            produced += 1;
        }
        Ok(produced)
    }
}

/// Drain `flow` into a delimited file at `path`.
///
/// The header is the flow's column set when the first batch arrives; later
/// batches are mapped onto it by name. Columns added after that point are
/// not written.
pub(crate) fn write(flow: &Dataflow, path: &Path, delimiter: u8) -> Result<(), FlowError> {
    let mut out = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(path)
        .map_err(|e| csv_err(path, &e))?;
    let mut header: Option<Vec<String>> = None;
    let mut warned = false;

    while let Some(batch) = flow.blocking_next_batch()? {
        if header.is_none() {
            let names = flow.columns().names();
            out.write_record(&names).map_err(|e| csv_err(path, &e))?;
            header = Some(names);
        }
        let names = header.as_deref().unwrap_or_default();
        let slots: Vec<Option<usize>> = names.iter().map(|n| batch.schema.columns.index_of(n)).collect();
        if !warned && batch.schema.columns.len() > names.len() {
            tracing::warn!(
                path = %path.display(),
                columns = batch.schema.columns.len(),
                written = names.len(),
                "Columns added after the CSV header was written are dropped"
            );
            warned = true;
        }
        for row in &batch.rows {
            let fields = slots.iter().map(|slot| {
                slot.and_then(|i| row.get(i))
                    .map(ToString::to_string)
                    .unwrap_or_default()
            });
            out.write_record(fields).map_err(|e| csv_err(path, &e))?;
        }
    }

    if header.is_none() {
        out.write_record(flow.columns().names())
            .map_err(|e| csv_err(path, &e))?;
    }
    out.flush().map_err(|e| io_err(path, &e))
}
