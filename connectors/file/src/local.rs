//! Local filesystem: files and directories of files.

use std::fs;
use std::path::{Path, PathBuf};

use tidewater_engine::{Dataflow, Datastream, FileReadOptions, FileSystem, FlowOptions, StreamWriter};
use tidewater_types::{ConnectorError, FlowError};

use crate::delimited::{self, DelimitedReader};
use crate::error::io_err;
use crate::ndjson::{self, NdjsonReader};

/// File layout, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// Delimited text with the given field separator.
    Delimited(u8),
    /// One JSON object per line.
    Ndjson,
}

impl FileFormat {
    /// Format for `path`, or `None` for an unrecognized extension.
    ///
    /// `.csv` and `.txt` use `delimiter`; `.tsv` is always tab-separated.
    #[must_use]
    pub fn for_path(path: &Path, delimiter: u8) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" | "txt" => Some(Self::Delimited(delimiter)),
            "tsv" => Some(Self::Delimited(b'\t')),
            "ndjson" | "jsonl" | "json" => Some(Self::Ndjson),
            _ => None,
        }
    }
}

/// Files on the local disk. Accepts plain paths or `file://` URIs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn local_path(uri: &str) -> PathBuf {
    PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
}

/// Every readable file under `path`, sorted by name. A plain file is
/// returned as-is whatever its extension.
fn list_files(path: &Path, delimiter: u8) -> Result<Vec<(PathBuf, FileFormat)>, FlowError> {
    let meta = fs::metadata(path).map_err(|e| io_err(path, &e))?;
    if meta.is_file() {
        let format = FileFormat::for_path(path, delimiter).unwrap_or(FileFormat::Delimited(delimiter));
        return Ok(vec![(path.to_path_buf(), format)]);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(path).map_err(|e| io_err(path, &e))? {
        let entry = entry.map_err(|e| io_err(path, &e))?;
        let file = entry.path();
        if !file.is_file() {
            continue;
        }
        match FileFormat::for_path(&file, delimiter) {
            Some(format) => files.push((file, format)),
            None => tracing::debug!(path = %file.display(), "Skipping file with unknown extension"),
        }
    }
    if files.is_empty() {
        return Err(FlowError::Connector(ConnectorError::config(
            "NO_FILES",
            format!("no readable files in {}", path.display()),
        )));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

enum Reader {
    Delimited(DelimitedReader),
    Ndjson(NdjsonReader),
}

impl Reader {
    fn run(self, writer: &mut StreamWriter) -> Result<u64, FlowError> {
        match self {
            Self::Delimited(r) => r.run(writer),
            Self::Ndjson(r) => r.run(writer),
        }
    }
}

fn stream_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

impl FileSystem for LocalFileSystem {
    fn read_dataflow(&self, uri: &str, read: &FileReadOptions, options: &FlowOptions) -> Result<Dataflow, FlowError> {
        let root = local_path(uri);
        let files = list_files(&root, read.delimiter)?;

        // Open everything up front so a bad file fails the call, not a stream.
        let mut opened = Vec::with_capacity(files.len());
        for (path, format) in files {
            let (columns, reader) = match format {
                FileFormat::Delimited(delimiter) => {
                    let read = FileReadOptions {
                        delimiter,
                        ..read.clone()
                    };
                    let (columns, reader) = DelimitedReader::open(&path, &read)?;
                    (columns, Reader::Delimited(reader))
                }
                FileFormat::Ndjson => {
                    let (columns, reader) = NdjsonReader::open(&path, read)?;
                    (columns, Reader::Ndjson(reader))
                }
            };
            opened.push((path, columns, reader));
        }

        let flow = Dataflow::new(*options);
        tracing::info!(path = %root.display(), files = opened.len(), "Reading local files");
        for (path, columns, reader) in opened {
            let name = stream_name(&path);
            let (stream, mut writer) = Datastream::new(name.clone(), columns, *options);
            flow.add_stream(stream)?;
            tokio::task::spawn_blocking(move || match reader.run(&mut writer) {
                Ok(rows) => match writer.blocking_finish() {
                    Ok(()) => tracing::debug!(stream = %name, rows, "File read finished"),
                    Err(e) => tracing::debug!(stream = %name, error = %e, "File read stopped"),
                },
                Err(e) => {
                    tracing::warn!(stream = %name, error = %e, "File read failed");
                    writer.fail(e);
                }
            });
        }
        Ok(flow)
    }

    fn write_dataflow(&self, flow: &Dataflow, uri: &str) -> Result<u64, FlowError> {
        let path = local_path(uri);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, &e))?;
        }
        let format = FileFormat::for_path(&path, b',').unwrap_or(FileFormat::Delimited(b','));
        let written = match format {
            FileFormat::Delimited(delimiter) => delimited::write(flow, &path, delimiter),
            FileFormat::Ndjson => ndjson::write(flow, &path),
        };
        if let Err(e) = written {
            flow.capture(e.clone());
            return Err(e);
        }
        let bytes = fs::metadata(&path).map_err(|e| io_err(&path, &e))?.len();
        tracing::info!(path = %path.display(), rows = flow.count(), bytes, "File written");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tidewater_types::Value;

    fn options() -> FlowOptions {
        FlowOptions {
            batch_rows: 2,
            queue_batches: 4,
            sample_size: 2,
            ragged: false,
        }
    }

    async fn drain(flow: &Dataflow) -> Vec<Vec<Value>> {
        let mut rows = Vec::new();
        while let Some(batch) = flow.next_batch().await.unwrap() {
            rows.extend(batch.rows);
        }
        rows
    }

    #[rstest]
    #[case("a.csv", Some(FileFormat::Delimited(b';')))]
    #[case("a.TSV", Some(FileFormat::Delimited(b'\t')))]
    #[case("a.jsonl", Some(FileFormat::Ndjson))]
    #[case("a.parquet", None)]
    #[case("noext", None)]
    fn picks_format_by_extension(#[case] name: &str, #[case] expected: Option<FileFormat>) {
        assert_eq!(FileFormat::for_path(Path::new(name), b';'), expected);
    }

    #[test]
    fn strips_file_scheme() {
        assert_eq!(local_path("file:///tmp/x.csv"), PathBuf::from("/tmp/x.csv"));
        assert_eq!(local_path("data/x.csv"), PathBuf::from("data/x.csv"));
    }

    #[test]
    fn empty_directory_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.md"), "x").unwrap();
        let err = list_files(dir.path(), b',').unwrap_err();
        assert_eq!(err.as_connector_error().unwrap().code, "NO_FILES");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reads_a_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.csv");
        fs::write(&path, "id,name\n1,Alice\n2,\n3,Cleo\n").unwrap();

        let flow = LocalFileSystem
            .read_dataflow(path.to_str().unwrap(), &FileReadOptions::default(), &options())
            .unwrap();
        let rows = drain(&flow).await;
        flow.teardown().await;

        assert_eq!(flow.columns().names(), vec!["id", "name"]);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec![Value::from("2"), Value::Null]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn directory_becomes_one_stream_per_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.csv"), "id,name\n1,Alice\n").unwrap();
        fs::write(dir.path().join("b.ndjson"), "{\"id\": 2, \"email\": \"b@x\"}\n").unwrap();

        let flow = LocalFileSystem
            .read_dataflow(dir.path().to_str().unwrap(), &FileReadOptions::default(), &options())
            .unwrap();
        let names: Vec<String> = flow.streams().iter().map(|s| s.name().to_string()).collect();
        let rows = drain(&flow).await;
        flow.teardown().await;

        assert_eq!(names, vec!["a.csv", "b.ndjson"]);
        assert_eq!(rows.len(), 2);
        let mut columns = flow.columns().names();
        columns.sort();
        assert_eq!(columns, vec!["email", "id", "name"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn limit_caps_rows_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("n.csv");
        fs::write(&path, "n\n1\n2\n3\n4\n").unwrap();
        let read = FileReadOptions {
            limit: Some(2),
            ..FileReadOptions::default()
        };

        let flow = LocalFileSystem
            .read_dataflow(path.to_str().unwrap(), &read, &options())
            .unwrap();
        assert_eq!(drain(&flow).await.len(), 2);
        flow.teardown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn writes_csv_and_ndjson() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.csv");
        fs::write(&src, "id,name\n1,Alice\n2,Bob\n").unwrap();

        for out in ["out/users.csv", "out/users.ndjson"] {
            let flow = LocalFileSystem
                .read_dataflow(src.to_str().unwrap(), &FileReadOptions::default(), &options())
                .unwrap();
            let dst = dir.path().join(out);
            let uri = dst.display().to_string();
            let writer_flow = flow.clone();
            let bytes = tokio::task::spawn_blocking(move || LocalFileSystem.write_dataflow(&writer_flow, &uri))
                .await
                .unwrap()
                .unwrap();
            flow.teardown().await;

            let text = fs::read_to_string(&dst).unwrap();
            assert_eq!(bytes, text.len() as u64);
            if out.ends_with(".csv") {
                assert_eq!(text, "id,name\n1,Alice\n2,Bob\n");
            } else {
                assert_eq!(text, "{\"id\":\"1\",\"name\":\"Alice\"}\n{\"id\":\"2\",\"name\":\"Bob\"}\n");
            }
        }
    }
}
