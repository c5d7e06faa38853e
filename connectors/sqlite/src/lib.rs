//! `SQLite` adapters for the Tidewater engine.
//!
//! [`SqliteTarget`] implements the engine's `TargetConnection` contract and
//! [`SqliteSource`] streams a table or a query into a `Dataflow`.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod client;
mod query;
mod source;
mod target;
pub mod type_map;

pub use source::SqliteSource;
pub use target::SqliteTarget;
