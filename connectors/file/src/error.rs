//! I/O and parse error mapping.

use std::io;
use std::path::Path;

use tidewater_types::{ConnectorError, FlowError};

pub(crate) fn io_err(path: &Path, err: &io::Error) -> FlowError {
    let message = format!("{}: {err}", path.display());
    let err = match err.kind() {
        io::ErrorKind::NotFound => ConnectorError::config("FILE_NOT_FOUND", message),
        io::ErrorKind::PermissionDenied => ConnectorError::permission("FILE_PERMISSION", message),
        _ => ConnectorError::internal("FILE_IO", message),
    };
    FlowError::Connector(err)
}

pub(crate) fn csv_err(path: &Path, err: &csv::Error) -> FlowError {
    if let csv::ErrorKind::Io(io) = err.kind() {
        return io_err(path, io);
    }
    FlowError::Connector(ConnectorError::data("CSV_PARSE", format!("{}: {err}", path.display())))
}

pub(crate) fn json_err(path: &Path, line: usize, err: &serde_json::Error) -> FlowError {
    FlowError::Connector(ConnectorError::data(
        "NDJSON_PARSE",
        format!("{} line {line}: {err}", path.display()),
    ))
}
