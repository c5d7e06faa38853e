//! Row streams.
//!
//! A [`Datastream`] is one ordered, batched sequence of rows from a single
//! partition (a file, a query, a page). The producing side holds the
//! matching [`StreamWriter`].
//!
//! Every stream starts by sampling: rows are buffered (not flushed) until
//! the sample budget is reached or the producer finishes, and the producer
//! then blocks. [`Datastream::pause`] waits for that point so the inference
//! engine can look at the sample, and [`Datastream::resume`] releases the
//! sample to consumers. After release, rows are batched through a bounded
//! channel; a full channel blocks the producer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use tidewater_types::{Column, ColumnType, Columns, ConnectorError, FlowError, Row, Value};

use crate::dataflow::{Dataflow, FlowInner};
use crate::evolution::SchemaEventKind;
use crate::inference::{self, DEFAULT_SAMPLE_SIZE};
use crate::schema::{SchemaHandle, SchemaVersion};

/// Rows per batch handed to consumers.
pub const DEFAULT_BATCH_ROWS: usize = 1000;

/// Batches buffered between a producer and its consumers.
pub const DEFAULT_QUEUE_BATCHES: usize = 16;

/// Sizing knobs shared by a dataflow and its member streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowOptions {
    pub batch_rows: usize,
    pub queue_batches: usize,
    pub sample_size: usize,
    /// Accept rows of the wrong width while sampling: short rows are
    /// null-padded and wide rows add generic `col_NNN` columns.
    pub ragged: bool,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            batch_rows: DEFAULT_BATCH_ROWS,
            queue_batches: DEFAULT_QUEUE_BATCHES,
            sample_size: DEFAULT_SAMPLE_SIZE,
            ragged: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Pending,
    Active,
    Paused,
    Closed,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Sampling,
    SampleReady,
    Released,
}

/// A batch of rows, all laid out according to `schema`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub stream: Arc<str>,
    pub schema: Arc<SchemaVersion>,
    pub rows: Vec<Row>,
}

type Observer = Box<dyn Fn(&SchemaVersion) + Send + Sync>;

struct StreamState {
    status: StreamStatus,
    sample: Vec<Row>,
}

pub(crate) struct StreamShared {
    name: Arc<str>,
    schema: SchemaHandle,
    options: FlowOptions,
    state: Mutex<StreamState>,
    gate: watch::Sender<Gate>,
    count: AtomicU64,
    cancel: CancellationToken,
    error: OnceLock<FlowError>,
    flow: OnceLock<Weak<FlowInner>>,
    observers: Mutex<Vec<Observer>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Batch>>,
}

impl StreamShared {
    fn lock_state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flow(&self) -> Option<Dataflow> {
        self.flow
            .get()
            .and_then(Weak::upgrade)
            .map(Dataflow::from_inner)
    }

    fn is_sampling(&self) -> bool {
        *self.gate.borrow() != Gate::Released
    }

    fn mark_sample_ready(&self) {
        self.gate.send_if_modified(|g| {
            if *g == Gate::Sampling {
                *g = Gate::SampleReady;
                true
            } else {
                false
            }
        });
    }

    /// The error a blocked operation should surface once cancelled.
    fn cancel_error(&self) -> FlowError {
        self.error
            .get()
            .cloned()
            .or_else(|| self.flow().and_then(|f| f.err()))
            .unwrap_or(FlowError::Cancelled)
    }
}

/// Consumer-side handle of a row stream. Cheap to clone.
#[derive(Clone)]
pub struct Datastream {
    shared: Arc<StreamShared>,
}

impl std::fmt::Debug for Datastream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastream")
            .field("name", &self.shared.name)
            .field("status", &self.status())
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl Datastream {
    /// Create a stream and the writer that produces into it.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Columns, options: FlowOptions) -> (Self, StreamWriter) {
        let (tx, rx) = mpsc::channel(options.queue_batches.max(1));
        let (gate, _) = watch::channel(Gate::Sampling);
        let shared = Arc::new(StreamShared {
            name: Arc::from(name.into()),
            schema: SchemaHandle::new(columns),
            options,
            state: Mutex::new(StreamState {
                status: StreamStatus::Pending,
                sample: Vec::new(),
            }),
            gate,
            count: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            error: OnceLock::new(),
            flow: OnceLock::new(),
            observers: Mutex::new(Vec::new()),
            rx: tokio::sync::Mutex::new(rx),
        });
        let writer = StreamWriter {
            shared: Arc::clone(&shared),
            tx: Some(tx),
            pending: Vec::new(),
            finished: false,
        };
        (Self { shared }, writer)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current published column set.
    #[must_use]
    pub fn schema(&self) -> Arc<SchemaVersion> {
        self.shared.schema.current()
    }

    #[must_use]
    pub fn columns(&self) -> Columns {
        self.schema().columns.clone()
    }

    #[must_use]
    pub fn status(&self) -> StreamStatus {
        self.shared.lock_state().status
    }

    /// Rows produced so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.shared.count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn err(&self) -> Option<FlowError> {
        self.shared.error.get().cloned()
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Register an observer invoked synchronously whenever a new column
    /// version is published, before the next batch is flushed.
    pub fn on_columns_changed(&self, observer: impl Fn(&SchemaVersion) + Send + Sync + 'static) {
        self.shared
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(observer));
    }

    /// Apply `f` to this stream's columns, publishing a new version and
    /// notifying observers if anything changed.
    pub(crate) fn update_columns<R>(&self, f: impl FnOnce(&mut Columns) -> R) -> R {
        let before = self.shared.schema.current().version;
        let (version, out) = self.shared.schema.update(f);
        if version.version != before {
            let observers = self.shared.observers.lock().unwrap_or_else(PoisonError::into_inner);
            for observer in observers.iter() {
                observer(&version);
            }
        }
        out
    }

    /// Wait for the sample to be complete, then stop releasing rows.
    ///
    /// Returns `false` if the stream is closed or errored, or if its sample
    /// has already been released to consumers.
    pub async fn pause(&self) -> bool {
        let mut gate = self.shared.gate.subscribe();
        let ready = tokio::select! {
            r = gate.wait_for(|g| *g != Gate::Sampling) => r.map(|g| *g).ok(),
            () = self.shared.cancel.cancelled() => None,
        };
        if ready != Some(Gate::SampleReady) {
            return false;
        }
        let mut state = self.shared.lock_state();
        match state.status {
            StreamStatus::Closed | StreamStatus::Errored => false,
            _ => {
                state.status = StreamStatus::Paused;
                true
            }
        }
    }

    /// Release the buffered sample and let the producer continue.
    ///
    /// Returns `false` unless the stream is paused.
    pub fn resume(&self) -> bool {
        {
            let mut state = self.shared.lock_state();
            if state.status != StreamStatus::Paused {
                return false;
            }
            state.status = StreamStatus::Active;
        }
        self.shared.gate.send_replace(Gate::Released);
        true
    }

    /// Mark the stream terminal. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.shared.lock_state();
            if matches!(state.status, StreamStatus::Closed | StreamStatus::Errored) {
                return;
            }
            state.status = StreamStatus::Closed;
        }
        self.shared.cancel.cancel();
    }

    /// Record `err` as this stream's error and forward it to the owning
    /// dataflow. The first error wins.
    pub fn fail(&self, err: FlowError) {
        let first = self.shared.error.set(err.clone()).is_ok();
        self.shared.lock_state().status = StreamStatus::Errored;
        self.shared.mark_sample_ready();
        self.shared.cancel.cancel();
        if first {
            tracing::error!(stream = %self.shared.name, error = %err, "Stream failed");
        }
        if let Some(flow) = self.shared.flow() {
            flow.capture(err);
        }
    }

    /// Next batch for this stream's consumer, `None` once the producer has
    /// finished and every batch was drained.
    ///
    /// # Errors
    ///
    /// Returns the stream's error, or [`FlowError::Cancelled`] if the
    /// stream was cancelled while waiting.
    pub async fn next_batch(&self) -> Result<Option<Batch>, FlowError> {
        let mut rx = self.shared.rx.lock().await;
        let next = tokio::select! {
            batch = rx.recv() => batch,
            () = self.shared.cancel.cancelled() => return Err(self.shared.cancel_error()),
        };
        match next {
            Some(batch) => Ok(Some(batch)),
            None => match self.err() {
                Some(err) => Err(err),
                None => {
                    self.close();
                    Ok(None)
                }
            },
        }
    }

    /// Rows buffered for inference, with the schema they were produced under.
    pub(crate) fn sample(&self) -> (Arc<SchemaVersion>, Vec<Row>) {
        let schema = self.shared.schema.current();
        let rows = self.shared.lock_state().sample.clone();
        (schema, rows)
    }

    /// Attach this stream to a dataflow: errors are forwarded to it and its
    /// cancellation cancels this stream.
    pub(crate) fn link(&self, flow: &Arc<FlowInner>, flow_cancel: CancellationToken) {
        if self.shared.flow.set(Arc::downgrade(flow)).is_err() {
            return;
        }
        let stream_cancel = self.shared.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = flow_cancel.cancelled() => stream_cancel.cancel(),
                () = stream_cancel.cancelled() => {}
            }
        });
    }

    fn apply_locally(&self, kind: SchemaEventKind, column: &Column) {
        self.update_columns(|cols| match kind {
            SchemaEventKind::ColumnAdded => {
                if cols.get(&column.name).is_none() {
                    cols.push(column.clone());
                }
            }
            SchemaEventKind::ColumnTypeChanged => {
                if let Some(existing) = cols.get_mut(&column.name) {
                    existing.widen(column.column_type);
                }
            }
        });
    }
}

/// Producer-side handle of a row stream.
///
/// Dropping a writer without calling [`StreamWriter::finish`] or
/// [`StreamWriter::fail`] fails the stream.
pub struct StreamWriter {
    shared: Arc<StreamShared>,
    tx: Option<mpsc::Sender<Batch>>,
    pending: Vec<Row>,
    finished: bool,
}

impl StreamWriter {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[must_use]
    pub fn schema(&self) -> Arc<SchemaVersion> {
        self.shared.schema.current()
    }

    /// Token that fires when the stream or its dataflow is cancelled.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    fn stream(&self) -> Datastream {
        Datastream {
            shared: Arc::clone(&self.shared),
        }
    }

    fn check_open(&self) -> Result<(), FlowError> {
        if self.shared.cancel.is_cancelled() {
            return Err(self.shared.cancel_error());
        }
        match self.shared.lock_state().status {
            StreamStatus::Closed | StreamStatus::Errored => Err(self.shared.cancel_error()),
            _ => Ok(()),
        }
    }

    fn arity(&self, expected: usize, actual: usize) -> FlowError {
        FlowError::Arity {
            stream: self.shared.name.to_string(),
            expected,
            actual,
        }
    }

    /// Append a row to the stream.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Arity`] if the row's width differs from the
    /// current column count (unless ragged input is accepted while
    /// sampling), a schema-evolution error if a widened column could not be
    /// applied, or the cancellation error once the stream is cancelled.
    pub async fn produce(&mut self, mut row: Row) -> Result<(), FlowError> {
        self.check_open()?;
        let schema = self.shared.schema.current();
        let width = schema.columns.len();

        if self.shared.is_sampling() {
            if row.len() != width {
                if !self.shared.options.ragged {
                    return Err(self.arity(width, row.len()));
                }
                if row.len() > width {
                    let extra = (width + 1..=row.len())
                        .map(|i| Column::new(format!("col_{i:03}"), ColumnType::String))
                        .collect();
                    self.add_columns(extra).await?;
                } else {
                    row.resize(width, Value::Null);
                }
            }
            return self.push_sample(row).await;
        }

        if row.len() != width {
            return Err(self.arity(width, row.len()));
        }
        self.widen_for(&schema.columns, &row).await?;
        self.pending.push(row);
        self.shared.count.fetch_add(1, Ordering::SeqCst);
        if self.pending.len() >= self.shared.options.batch_rows.max(1) {
            self.flush().await?;
        }
        Ok(())
    }

    /// Declare columns discovered mid-stream. Columns already present are
    /// ignored. Rows produced before this call read as null for them.
    ///
    /// # Errors
    ///
    /// Returns the schema-evolution error if the dataflow refused a column.
    pub async fn add_columns(&mut self, columns: Vec<Column>) -> Result<(), FlowError> {
        self.check_open()?;
        let current = self.shared.schema.current();
        let added: Vec<Column> = columns
            .into_iter()
            .filter(|c| current.columns.get(&c.name).is_none())
            .collect();
        if added.is_empty() {
            return Ok(());
        }
        self.flush().await?;
        for column in added {
            self.submit(SchemaEventKind::ColumnAdded, column).await?;
        }
        Ok(())
    }

    /// Flush the tail batch and close the producing side.
    ///
    /// A stream that finishes while sampling waits for its sample to be
    /// released before returning.
    ///
    /// # Errors
    ///
    /// Returns the cancellation error if the stream is cancelled first.
    pub async fn finish(mut self) -> Result<(), FlowError> {
        let result = self.finish_inner().await;
        self.finished = true;
        self.tx = None;
        if let Err(err) = &result {
            self.stream().fail(err.clone());
        }
        result
    }

    async fn finish_inner(&mut self) -> Result<(), FlowError> {
        self.check_open()?;
        if self.shared.is_sampling() {
            self.shared.mark_sample_ready();
            self.wait_released().await?;
            self.release_sample().await?;
        }
        self.flush().await
    }

    /// Fail the stream with `err` and stop producing.
    pub fn fail(mut self, err: FlowError) {
        self.finished = true;
        self.tx = None;
        self.stream().fail(err);
    }

    /// [`StreamWriter::produce`] for producers running on blocking threads.
    ///
    /// # Errors
    ///
    /// Same as [`StreamWriter::produce`].
    pub fn blocking_produce(&mut self, row: Row) -> Result<(), FlowError> {
        tokio::runtime::Handle::current().block_on(self.produce(row))
    }

    /// [`StreamWriter::add_columns`] for producers running on blocking threads.
    ///
    /// # Errors
    ///
    /// Same as [`StreamWriter::add_columns`].
    pub fn blocking_add_columns(&mut self, columns: Vec<Column>) -> Result<(), FlowError> {
        tokio::runtime::Handle::current().block_on(self.add_columns(columns))
    }

    /// [`StreamWriter::finish`] for producers running on blocking threads.
    ///
    /// # Errors
    ///
    /// Same as [`StreamWriter::finish`].
    pub fn blocking_finish(self) -> Result<(), FlowError> {
        tokio::runtime::Handle::current().block_on(self.finish())
    }

    async fn push_sample(&mut self, row: Row) -> Result<(), FlowError> {
        let full = {
            let mut state = self.shared.lock_state();
            state.sample.push(row);
            self.shared.count.fetch_add(1, Ordering::SeqCst);
            state.sample.len() >= self.shared.options.sample_size
        };
        if !full {
            return Ok(());
        }
        self.shared.mark_sample_ready();
        self.wait_released().await?;
        self.release_sample().await
    }

    async fn wait_released(&self) -> Result<(), FlowError> {
        let mut gate = self.shared.gate.subscribe();
        tokio::select! {
            r = gate.wait_for(|g| *g == Gate::Released) => r.map(|_| ()).map_err(|_| FlowError::Cancelled),
            () = self.shared.cancel.cancelled() => Err(self.shared.cancel_error()),
        }
    }

    async fn release_sample(&mut self) -> Result<(), FlowError> {
        let rows = std::mem::take(&mut self.shared.lock_state().sample);
        let batch_rows = self.shared.options.batch_rows.max(1);
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            let batch: Vec<Row> = rows.by_ref().take(batch_rows).collect();
            self.send(batch).await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), FlowError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(&mut self.pending);
        self.send(rows).await
    }

    async fn send(&mut self, mut rows: Vec<Row>) -> Result<(), FlowError> {
        let schema = self.shared.schema.current();
        let width = schema.columns.len();
        for row in &mut rows {
            row.resize(width, Value::Null);
        }
        let batch = Batch {
            stream: Arc::clone(&self.shared.name),
            schema,
            rows,
        };
        let Some(tx) = self.tx.as_ref() else {
            return Err(FlowError::Cancelled);
        };
        tokio::select! {
            r = tx.send(batch) => r.map_err(|_| self.shared.cancel_error()),
            () = self.shared.cancel.cancelled() => Err(self.shared.cancel_error()),
        }
    }

    /// Widen every column whose current type cannot hold the matching value.
    async fn widen_for(&mut self, columns: &Columns, row: &Row) -> Result<(), FlowError> {
        let changes: Vec<Column> = columns
            .iter()
            .zip(row)
            .filter(|(col, value)| !value.fits(col.column_type))
            .filter_map(|(col, value)| {
                let candidate = inference::classify(value)?;
                let widened = col.column_type.widen(candidate);
                (widened != col.column_type).then(|| Column {
                    column_type: widened,
                    db_type: None,
                    ..col.clone()
                })
            })
            .collect();
        if changes.is_empty() {
            return Ok(());
        }
        self.flush().await?;
        for column in changes {
            self.submit(SchemaEventKind::ColumnTypeChanged, column).await?;
        }
        Ok(())
    }

    async fn submit(&self, kind: SchemaEventKind, column: Column) -> Result<(), FlowError> {
        match self.shared.flow() {
            Some(flow) => flow.submit_schema_event(kind, column, Some(self.stream())).await,
            None => {
                self.stream().apply_locally(kind, &column);
                Ok(())
            }
        }
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.stream().fail(FlowError::Connector(ConnectorError::internal(
                "PRODUCER_DROPPED",
                format!("producer for stream '{}' exited before finishing", self.shared.name),
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(sample_size: usize) -> FlowOptions {
        FlowOptions {
            batch_rows: 2,
            queue_batches: 4,
            sample_size,
            ragged: false,
        }
    }

    fn cols() -> Columns {
        Columns::from_names(["id", "name"], ColumnType::String)
    }

    fn row(id: i64, name: &str) -> Row {
        vec![Value::Int(id), Value::from(name)]
    }

    #[tokio::test]
    async fn rejects_rows_of_wrong_width() {
        let (stream, mut writer) = Datastream::new("users", cols(), options(10));
        let err = writer.produce(vec![Value::Int(1)]).await.unwrap_err();
        assert!(matches!(err, FlowError::Arity { expected: 2, actual: 1, .. }));
        assert_eq!(stream.count(), 0);
        writer.fail(err);
        assert_eq!(stream.status(), StreamStatus::Errored);
    }

    #[tokio::test]
    async fn ragged_sampling_pads_and_extends() {
        let opts = FlowOptions {
            ragged: true,
            ..options(10)
        };
        let (stream, mut writer) = Datastream::new("ragged.csv", cols(), opts);
        writer.produce(vec![Value::from("1")]).await.unwrap();
        writer
            .produce(vec![Value::from("2"), Value::from("b"), Value::from("x")])
            .await
            .unwrap();
        assert_eq!(stream.columns().names(), vec!["id", "name", "col_003"]);
        let (_, sample) = stream.sample();
        assert_eq!(sample[0], vec![Value::from("1"), Value::Null]);
    }

    #[tokio::test]
    async fn pause_waits_for_sample_then_resume_releases_it() {
        let (stream, mut writer) = Datastream::new("users", cols(), options(2));
        let producer = tokio::spawn(async move {
            for i in 1..=5 {
                writer.produce(row(i, "n")).await?;
            }
            writer.finish().await
        });

        assert!(stream.pause().await);
        assert_eq!(stream.status(), StreamStatus::Paused);
        let (_, sample) = stream.sample();
        assert_eq!(sample.len(), 2);
        assert!(stream.resume());
        assert!(!stream.resume());

        let mut seen = Vec::new();
        while let Some(batch) = stream.next_batch().await.unwrap() {
            for r in batch.rows {
                seen.push(r[0].clone());
            }
        }
        producer.await.unwrap().unwrap();
        assert_eq!(seen, (1..=5).map(Value::Int).collect::<Vec<_>>());
        assert_eq!(stream.count(), 5);
        assert_eq!(stream.status(), StreamStatus::Closed);
        assert!(!stream.pause().await);
    }

    #[tokio::test]
    async fn small_stream_finishing_during_sample_is_pausable() {
        let (stream, mut writer) = Datastream::new("tiny", cols(), options(100));
        writer.produce(row(1, "a")).await.unwrap();
        let producer = tokio::spawn(writer.finish());
        assert!(stream.pause().await);
        assert!(stream.resume());
        let batch = stream.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.rows.len(), 1);
        assert!(stream.next_batch().await.unwrap().is_none());
        producer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn full_queue_blocks_producer_without_dropping() {
        let opts = FlowOptions {
            batch_rows: 1,
            queue_batches: 1,
            sample_size: 0,
            ragged: false,
        };
        let (stream, mut writer) = Datastream::new("bp", cols(), opts);
        let producer = tokio::spawn(async move {
            for i in 0..20 {
                writer.produce(row(i, "x")).await?;
            }
            writer.finish().await
        });
        assert!(stream.pause().await);
        assert!(stream.resume());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        let mut total = 0;
        while let Some(batch) = stream.next_batch().await.unwrap() {
            total += batch.rows.len();
        }
        producer.await.unwrap().unwrap();
        assert_eq!(total, 20);
    }

    #[tokio::test]
    async fn unlinked_stream_widens_in_place_and_notifies_observers() {
        let (stream, mut writer) = Datastream::new(
            "typed",
            Columns::new(vec![
                Column::new("id", ColumnType::Integer),
                Column::new("name", ColumnType::String),
            ]),
            options(0),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        stream.on_columns_changed(move |v| sink.lock().unwrap().push(v.version));

        let producer = tokio::spawn(async move {
            writer.produce(row(1, "a")).await?;
            writer.produce(vec![Value::from("1.5"), Value::from("b")]).await?;
            writer.finish().await
        });
        assert!(stream.pause().await);
        assert!(stream.resume());
        while stream.next_batch().await.unwrap().is_some() {}
        producer.await.unwrap().unwrap();

        assert_eq!(stream.columns()[0].column_type, ColumnType::Decimal);
        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_production() {
        let (stream, mut writer) = Datastream::new("c", cols(), options(10));
        stream.close();
        stream.close();
        assert_eq!(stream.status(), StreamStatus::Closed);
        assert!(writer.produce(row(1, "a")).await.is_err());
        writer.fail(FlowError::Cancelled);
        assert_eq!(stream.status(), StreamStatus::Errored);
    }

    #[tokio::test]
    async fn dropped_writer_fails_stream() {
        let (stream, writer) = Datastream::new("d", cols(), options(10));
        drop(writer);
        assert_eq!(stream.status(), StreamStatus::Errored);
        assert!(stream.err().is_some());
        assert!(!stream.pause().await);
    }
}
