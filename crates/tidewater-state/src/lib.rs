//! Run-history persistence for Tidewater tasks.
//!
//! Provides the [`RunStore`] trait and a [`SqliteRunStore`] implementation
//! recording when each task ran, how it ended, and how many rows it moved.

#![warn(clippy::pedantic)]

pub mod error;
pub mod sqlite;
pub mod store;

pub use error::StoreError;
pub use sqlite::SqliteRunStore;
pub use store::{RunRecord, RunStats, RunStatus, RunStore};
