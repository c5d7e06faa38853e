//! Task runner: source dataflow into target, per the prepared task.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};

use tidewater_types::{FlowError, KeyType, LoadMode};

use crate::config::{PreparedTarget, PreparedTask};
use crate::connector::{blocking, FileSystem, SourceConnection, TargetConnection};
use crate::dataflow::Dataflow;
use crate::orchestrator::LoadOrchestrator;
use crate::result::TaskResult;

/// Where rows come from.
#[derive(Clone)]
pub enum SourceHandle {
    Database(Arc<dyn SourceConnection>),
    File(Arc<dyn FileSystem>),
}

/// Where rows go.
#[derive(Clone)]
pub enum TargetHandle {
    Database(Arc<dyn TargetConnection>),
    File(Arc<dyn FileSystem>),
}

/// Run `task` from `source` into `target`.
///
/// Incremental loads into an existing table resume after the target's
/// largest `update_key` value.
///
/// # Errors
///
/// Returns the first error of any phase, with task context.
pub async fn run_task(task: &PreparedTask, source: SourceHandle, target: TargetHandle) -> Result<TaskResult> {
    let started = Instant::now();
    tracing::info!(task = %task.name, mode = %task.mode, "Task started");

    let mut request = task.source.request.clone();
    if let (TargetHandle::Database(conn), PreparedTarget::Database { load, .. }) = (&target, &task.target) {
        if task.mode == LoadMode::Incremental {
            if let Some(update_key) = &request.update_key {
                let caps = conn.capabilities();
                let column = load.options.casing.apply(update_key, caps.upper_case_identifiers);
                let table = load.table.clone();
                let watermark = blocking(conn, move |t| {
                    if t.table_exists(&table)? {
                        t.max_value(&table, &column)
                    } else {
                        Ok(None)
                    }
                })
                .await
                .context("could not read incremental watermark")?;
                if let Some(value) = &watermark {
                    tracing::info!(task = %task.name, update_key = %update_key, watermark = %value, "Resuming incremental load");
                }
                request.incremental_value = watermark;
            }
        }
    }

    let flow = match &source {
        SourceHandle::Database(src) => src.bulk_export(&request, &task.flow),
        SourceHandle::File(fs) => fs.read_dataflow(&request.stream, &task.source.file, &task.flow),
    }
    .with_context(|| format!("could not read source stream '{}'", request.stream))?;

    if let Err(err) = tag_keys(&flow, &request.primary_key, request.update_key.as_deref()) {
        flow.capture(err.clone());
        flow.teardown().await;
        return Err(err).context("invalid key configuration");
    }

    let mut result = TaskResult {
        task: task.name.clone(),
        mode: task.mode,
        rows_read: 0,
        rows_written: 0,
        load: None,
        bytes_written: None,
        duration_secs: 0.0,
    };

    match (target, &task.target) {
        (TargetHandle::Database(conn), PreparedTarget::Database { load, .. }) => {
            let mut orchestrator = LoadOrchestrator::new(conn, load.clone());
            let outcome = orchestrator.run(&flow).await;
            let load_result =
                outcome.with_context(|| format!("task '{}' aborted in phase {}", task.name, orchestrator.phase()))?;
            result.rows_written = load_result.rows_merged;
            result.load = Some(load_result);
        }
        (TargetHandle::File(fs), PreparedTarget::File { conn }) => {
            let uri = conn.path.display().to_string();
            let writer_flow = flow.clone();
            let written = tokio::task::spawn_blocking(move || fs.write_dataflow(&writer_flow, &uri))
                .await
                .context("file writer panicked")?;
            flow.teardown().await;
            result.bytes_written = Some(written.with_context(|| format!("could not write {conn}"))?);
            result.rows_written = flow.count();
        }
        _ => {
            flow.teardown().await;
            bail!("target connection does not match the target configuration");
        }
    }

    result.rows_read = flow.count();
    result.duration_secs = started.elapsed().as_secs_f64();
    tracing::info!(
        task = %task.name,
        rows = result.rows_written,
        duration_secs = result.duration_secs,
        "Task completed"
    );
    Ok(result)
}

fn tag_keys(flow: &Dataflow, primary_key: &[String], update_key: Option<&str>) -> Result<(), FlowError> {
    if !primary_key.is_empty() {
        flow.set_metadata(KeyType::PrimaryKey, primary_key, "source")?;
    }
    if let Some(update_key) = update_key {
        flow.set_metadata(KeyType::UpdateKey, &[update_key.to_string()], "source")?;
    }
    Ok(())
}
