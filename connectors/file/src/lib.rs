//! Local file-system adapter for Tidewater.
//!
//! Reads delimited files and newline-delimited JSON as dataflows (one
//! stream per file) and writes dataflows back out in either format.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod delimited;
mod error;
mod local;
mod ndjson;

pub use local::{FileFormat, LocalFileSystem};
