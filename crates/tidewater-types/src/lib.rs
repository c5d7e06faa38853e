//! Shared Tidewater column, value, load-mode, and error model types.
//!
//! Everything in this crate is plain data: the engine, the connectors, and
//! the CLI all agree on these definitions.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod column;
pub mod error;
pub mod mode;
pub mod parse;
pub mod policy;
pub mod value;

pub use column::{Column, ColumnCasing, ColumnType, Columns, KeyType, STRING_MAX_LEN};
pub use error::{CommitState, ConnectorError, ErrorCategory, FlowError};
pub use mode::LoadMode;
pub use policy::{ColumnPolicy, SchemaPolicy, TypeChangePolicy};
pub use value::{Row, Value};
