//! Task configuration: YAML types, parsing and validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use parser::{parse_task, parse_task_str};
pub use types::{ConnKind, ConnUrl, PreparedSource, PreparedTarget, PreparedTask, TaskConfig};
pub use validator::validate_task;
