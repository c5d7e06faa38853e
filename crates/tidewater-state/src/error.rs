//! Run store error types.

/// Errors produced by [`RunStore`](crate::RunStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("run store lock poisoned")]
    LockPoisoned,

    /// A stored run status could not be read back.
    #[error("unknown run status '{0}'")]
    UnknownStatus(String),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_error_displays_context() {
        let inner = rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(1), Some("no such table".into()));
        let msg = StoreError::Sqlite(inner).to_string();
        assert!(msg.contains("sqlite"), "got: {msg}");
    }

    #[test]
    fn lock_poisoned_displays() {
        assert_eq!(StoreError::LockPoisoned.to_string(), "run store lock poisoned");
    }
}
