//! Streaming dataflow engine and load orchestrator for Tidewater.
//!
//! Sources hand the engine a [`Dataflow`]: N concurrently produced row
//! streams with a unified, widening schema. The [`LoadOrchestrator`] stages
//! that flow into a target table, verifies it, and merges it per load mode.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cleanup;
pub mod config;
pub mod connector;
pub mod dataflow;
pub mod evolution;
pub mod inference;
pub mod orchestrator;
pub mod result;
pub mod schema;
pub mod staging;
pub mod stream;
pub mod task;
pub mod verify;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use connector::{
    FileReadOptions, FileSystem, IsolationLevel, ReadRequest, SourceConnection, TableName, TargetCapabilities,
    TargetConnection,
};
pub use dataflow::Dataflow;
pub use orchestrator::{LoadOptions, LoadOrchestrator, LoadSpec};
pub use result::{LoadPhase, LoadResult, MergeStrategy, TaskResult};
pub use stream::{Batch, Datastream, FlowOptions, StreamStatus, StreamWriter};
pub use task::{run_task, SourceHandle, TargetHandle};
