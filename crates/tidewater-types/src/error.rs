//! Error model for dataflow and load operations.
//!
//! [`FlowError`] is the taxonomy every engine operation reports with. It is
//! `Clone` so the first error captured by a dataflow can be handed to every
//! observer. [`ConnectorError`] carries classification for failures that
//! originate inside a source or target adapter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a connector error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid connection settings.
    Config,
    /// Authentication failure.
    Auth,
    /// Insufficient permissions.
    Permission,
    /// Transient network error.
    TransientNetwork,
    /// Transient database error (lock contention, busy database).
    TransientDb,
    /// Invalid or corrupt data.
    Data,
    /// Schema mismatch or failed DDL.
    Schema,
    /// Internal adapter error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Auth => "auth",
            Self::Permission => "permission",
            Self::TransientNetwork => "transient_network",
            Self::TransientDb => "transient_db",
            Self::Data => "data",
            Self::Schema => "schema",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Transaction commit state at the time of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitState {
    /// Error occurred before any commit attempt.
    BeforeCommit,
    /// Commit was attempted but outcome is unknown.
    AfterCommitUnknown,
    /// Commit was confirmed before the error.
    AfterCommitConfirmed,
}

/// Structured error from a connector operation.
///
/// Construct via category-specific factory methods (e.g.,
/// [`ConnectorError::schema`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct ConnectorError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_state: Option<CommitState>,
}

impl ConnectorError {
    fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            commit_state: None,
        }
    }

    /// Invalid connection or adapter configuration.
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, code, message)
    }

    /// Authentication error.
    #[must_use]
    pub fn auth(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Auth, code, message)
    }

    /// Permission error.
    #[must_use]
    pub fn permission(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Permission, code, message)
    }

    /// Transient network error.
    #[must_use]
    pub fn transient_network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientNetwork, code, message)
    }

    /// Transient database error.
    #[must_use]
    pub fn transient_db(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientDb, code, message)
    }

    /// Data error (bad value, encoding failure).
    #[must_use]
    pub fn data(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Data, code, message)
    }

    /// Schema error (failed DDL, unknown column).
    #[must_use]
    pub fn schema(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Schema, code, message)
    }

    /// Internal adapter error.
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, code, message)
    }

    /// Record the transaction commit state at the time of the error.
    #[must_use]
    pub fn with_commit_state(mut self, state: CommitState) -> Self {
        self.commit_state = Some(state);
        self
    }
}

/// Error taxonomy for dataflow, inference, and load orchestration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlowError {
    /// Invalid mode, missing required keys, or malformed option values.
    #[error("config error: {0}")]
    Config(String),

    /// A produced row does not match the stream's column count.
    #[error("arity error: stream '{stream}' has {expected} columns but row has {actual} values")]
    Arity {
        stream: String,
        expected: usize,
        actual: usize,
    },

    /// A value cannot be represented in its column's type.
    #[error("type conflict on column '{column}': {message}")]
    TypeConflict { column: String, message: String },

    /// A schema change could not be applied.
    #[error("schema mutation failed: {0}")]
    SchemaMutation(String),

    /// Staged data disagrees with what the source produced.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// Passthrough failure from a source or target adapter.
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// Begin, commit, or rollback failed.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// The shared cancellation signal fired.
    #[error("dataflow cancelled")]
    Cancelled,

    /// An error annotated with the phase it happened in.
    #[error("{context}: {source}")]
    Phase {
        context: String,
        #[source]
        source: Box<FlowError>,
    },
}

impl FlowError {
    /// Wrap this error with phase context, e.g. `"could not insert into users_tmp"`.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Phase {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error beneath any phase annotations.
    #[must_use]
    pub fn root_cause(&self) -> &FlowError {
        match self {
            Self::Phase { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether this error (ignoring phase context) is a consistency failure.
    #[must_use]
    pub fn is_consistency(&self) -> bool {
        matches!(self.root_cause(), Self::Consistency(_))
    }

    /// Whether this error (ignoring phase context) is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), Self::Cancelled)
    }

    /// The connector error at the root, if any.
    #[must_use]
    pub fn as_connector_error(&self) -> Option<&ConnectorError> {
        match self.root_cause() {
            Self::Connector(e) => Some(e),
            _ => None,
        }
    }
}

/// Convenience alias for results carrying a [`FlowError`].
pub type Result<T> = std::result::Result<T, FlowError>;
