//! Versioned schema snapshots.
//!
//! A [`SchemaHandle`] is shared by everything that reads a stream's or a
//! dataflow's columns. Mutations publish a whole new [`SchemaVersion`];
//! readers hold an `Arc` to the version they started with and never see a
//! half-applied change.

use std::sync::{Arc, PoisonError, RwLock};

use tidewater_types::Columns;

/// One immutable published column set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaVersion {
    pub version: u64,
    pub columns: Columns,
}

/// Shared pointer to the current [`SchemaVersion`].
#[derive(Debug, Clone)]
pub struct SchemaHandle {
    inner: Arc<RwLock<Arc<SchemaVersion>>>,
}

impl SchemaHandle {
    #[must_use]
    pub fn new(columns: Columns) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(SchemaVersion {
                version: 1,
                columns,
            }))),
        }
    }

    /// The currently published version.
    #[must_use]
    pub fn current(&self) -> Arc<SchemaVersion> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Replace the column set, bumping the version.
    pub fn publish(&self, columns: Columns) -> Arc<SchemaVersion> {
        self.update(|cols| *cols = columns).0
    }

    /// Apply `f` to a copy of the current columns and publish the result
    /// atomically. The version is bumped only when the columns changed.
    pub fn update<R>(&self, f: impl FnOnce(&mut Columns) -> R) -> (Arc<SchemaVersion>, R) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut columns = guard.columns.clone();
        let out = f(&mut columns);
        if columns != guard.columns {
            *guard = Arc::new(SchemaVersion {
                version: guard.version + 1,
                columns,
            });
        }
        (Arc::clone(&guard), out)
    }
}
