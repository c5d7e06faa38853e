//! Bounded writer pool draining a dataflow into a target table.

use std::sync::Arc;

use tokio::task::JoinSet;

use tidewater_types::{ConnectorError, FlowError};

use crate::connector::{TableName, TargetConnection};
use crate::dataflow::Dataflow;

/// Default number of concurrent writers per load.
pub const DEFAULT_WRITERS: usize = 4;

/// Drain `flow` into `table` with `writers` concurrent writers. Returns rows
/// written.
///
/// Each writer holds the flow's write gate shared while it encodes and
/// inserts one batch, so schema mutations never interleave with a batch.
/// The first failure is captured into the flow, which cancels the rest.
///
/// # Errors
///
/// Returns the first writer or flow error.
pub async fn bulk_import(
    target: Arc<dyn TargetConnection>,
    table: &TableName,
    flow: &Dataflow,
    writers: usize,
) -> Result<u64, FlowError> {
    let mut join_set: JoinSet<Result<u64, FlowError>> = JoinSet::new();
    for worker in 0..writers.max(1) {
        let target = Arc::clone(&target);
        let table = table.clone();
        let flow = flow.clone();
        join_set.spawn(async move { write_loop(worker, target, table, flow).await });
    }

    let mut written = 0u64;
    let mut first_error: Option<FlowError> = None;
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(rows)) => written += rows,
            Ok(Err(err)) => {
                if first_error.is_none() {
                    tracing::error!(table = %table, error = %err, "Writer failed");
                    flow.capture(err.clone());
                    first_error = Some(err);
                    join_set.abort_all();
                }
            }
            Err(join_err) if join_err.is_cancelled() && first_error.is_some() => {}
            Err(join_err) => {
                let err = FlowError::Connector(ConnectorError::internal(
                    "WRITER_PANIC",
                    format!("writer task panicked: {join_err}"),
                ));
                flow.capture(err.clone());
                first_error.get_or_insert(err);
                join_set.abort_all();
            }
        }
    }

    match first_error.or_else(|| flow.err()) {
        Some(err) => Err(err),
        None => {
            tracing::debug!(table = %table, rows = written, "Bulk import finished");
            Ok(written)
        }
    }
}

async fn write_loop(
    worker: usize,
    target: Arc<dyn TargetConnection>,
    table: TableName,
    flow: Dataflow,
) -> Result<u64, FlowError> {
    let gate = flow.write_gate();
    let mut written = 0u64;
    while let Some(batch) = flow.next_batch().await? {
        let _shared = Arc::clone(&gate).read_owned().await;
        let (columns, rows) = flow.encode_batch(&batch)?;
        if rows.is_empty() {
            continue;
        }
        let target = Arc::clone(&target);
        let table = table.clone();
        let inserted = tokio::task::spawn_blocking(move || target.insert_rows(&table, &columns, &rows))
            .await
            .map_err(|e| ConnectorError::internal("WRITER_PANIC", format!("insert task panicked: {e}")))??;
        written += inserted;
        tracing::trace!(worker, stream = %batch.stream, rows = inserted, "Batch written");
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{Datastream, FlowOptions};
    use crate::testing::MemoryTarget;
    use tidewater_types::{ColumnType, Columns, Value};

    fn options() -> FlowOptions {
        FlowOptions {
            batch_rows: 7,
            queue_batches: 2,
            sample_size: 10,
            ragged: false,
        }
    }

    #[tokio::test]
    async fn writes_every_row_from_every_stream() {
        let target = Arc::new(MemoryTarget::default());
        let table = TableName::new("t");
        let cols = Columns::from_names(["id"], ColumnType::Integer);
        target.create_table_if_not_exists(&table, &cols, None).unwrap();

        let flow = Dataflow::new(options());
        let mut producers = Vec::new();
        for s in 0..3 {
            let (stream, mut writer) = Datastream::new(format!("s{s}"), cols.clone(), options());
            flow.add_stream(stream).unwrap();
            producers.push(tokio::spawn(async move {
                for i in 0..50 {
                    writer.produce(vec![Value::Int(i)]).await?;
                }
                writer.finish().await
            }));
        }

        let written = bulk_import(target.clone(), &table, &flow, 3).await.unwrap();
        for p in producers {
            p.await.unwrap().unwrap();
        }
        assert_eq!(written, 150);
        assert_eq!(target.count(&table).unwrap(), 150);
        assert_eq!(flow.count(), 150);
    }

    #[tokio::test]
    async fn insert_failure_is_captured() {
        let target = Arc::new(MemoryTarget::default());
        let flow = Dataflow::new(options());
        let (stream, mut writer) = Datastream::new("s", Columns::from_names(["id"], ColumnType::Integer), options());
        flow.add_stream(stream).unwrap();
        let producer = tokio::spawn(async move {
            writer.produce(vec![Value::Int(1)]).await?;
            writer.finish().await
        });

        // Table was never created.
        let err = bulk_import(target, &TableName::new("missing"), &flow, 2).await.unwrap_err();
        assert!(matches!(err, FlowError::Connector(_)));
        assert!(flow.err().is_some());
        let _ = producer.await;
    }
}
