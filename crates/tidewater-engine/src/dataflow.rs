//! The dataflow: N concurrent row streams presented as one.
//!
//! Member streams keep their own column sets. The dataflow keeps the
//! unified set, widened by name across members, and every batch is mapped
//! onto it at write time by [`Dataflow::encode_batch`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tokio::sync::{mpsc, OnceCell, RwLock};
use tokio_util::sync::CancellationToken;

use tidewater_types::{Column, ColumnCasing, Columns, FlowError, KeyType, Row, SchemaPolicy, Value};

use crate::cleanup::{CleanupHandle, CleanupStack};
use crate::evolution::{SchemaCoordinator, SchemaEventKind, TargetBinding};
use crate::schema::{SchemaHandle, SchemaVersion};
use crate::stream::{Batch, Datastream, FlowOptions};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct FlowInner {
    schema: SchemaHandle,
    options: FlowOptions,
    streams: Mutex<Vec<Datastream>>,
    error: OnceLock<FlowError>,
    cancel: CancellationToken,
    cleanup: Mutex<CleanupStack>,
    tx: Mutex<Option<mpsc::Sender<Batch>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Batch>>,
    released: OnceCell<()>,
    sample: Mutex<Vec<Row>>,
    inferred: AtomicBool,
    constants: Mutex<BTreeMap<String, Value>>,
    ignored: Mutex<BTreeSet<String>>,
    checksums: Mutex<BTreeMap<String, Option<u64>>>,
    gate: Arc<RwLock<()>>,
    coordinator: SchemaCoordinator,
    torn_down: AtomicBool,
}

/// Handle to a dataflow. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Dataflow {
    inner: Arc<FlowInner>,
}

impl std::fmt::Debug for Dataflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataflow")
            .field("columns", &self.columns().names())
            .field("streams", &lock(&self.inner.streams).len())
            .field("count", &self.count())
            .field("error", &self.inner.error.get())
            .finish_non_exhaustive()
    }
}

impl Dataflow {
    /// Create an empty dataflow. Must be called inside a tokio runtime: the
    /// schema coordinator task is spawned here.
    #[must_use]
    pub fn new(options: FlowOptions) -> Self {
        let (tx, rx) = mpsc::channel(options.queue_batches.max(1));
        let inner = Arc::new_cyclic(|weak| FlowInner {
            schema: SchemaHandle::new(Columns::default()),
            options,
            streams: Mutex::new(Vec::new()),
            error: OnceLock::new(),
            cancel: CancellationToken::new(),
            cleanup: Mutex::new(CleanupStack::default()),
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            released: OnceCell::new(),
            sample: Mutex::new(Vec::new()),
            inferred: AtomicBool::new(false),
            constants: Mutex::new(BTreeMap::new()),
            ignored: Mutex::new(BTreeSet::new()),
            checksums: Mutex::new(BTreeMap::new()),
            gate: Arc::new(RwLock::new(())),
            coordinator: SchemaCoordinator::spawn(weak.clone()),
            torn_down: AtomicBool::new(false),
        });
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<FlowInner>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn options(&self) -> FlowOptions {
        self.inner.options
    }

    /// Add a member stream, unifying its columns into the flow's.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Config`] once consumption has started.
    pub fn add_stream(&self, stream: Datastream) -> Result<(), FlowError> {
        let Some(tx) = lock(&self.inner.tx).clone() else {
            return Err(FlowError::Config(format!(
                "cannot add stream '{}' after consumption started",
                stream.name()
            )));
        };
        stream.link(&self.inner, self.inner.cancel.clone());
        if let Some(err) = stream.err() {
            self.capture(err);
        }
        let incoming = stream.columns();
        self.inner.schema.update(|cols| cols.merge(&incoming));
        lock(&self.inner.streams).push(stream.clone());

        let flow = self.clone();
        tokio::spawn(async move { flow.forward(stream, tx).await });
        Ok(())
    }

    async fn forward(self, stream: Datastream, tx: mpsc::Sender<Batch>) {
        loop {
            match stream.next_batch().await {
                Ok(Some(batch)) => {
                    tokio::select! {
                        r = tx.send(batch) => if r.is_err() { break },
                        () = self.inner.cancel.cancelled() => break,
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    self.capture(err);
                    break;
                }
            }
        }
    }

    #[must_use]
    pub fn streams(&self) -> Vec<Datastream> {
        lock(&self.inner.streams).clone()
    }

    /// Current unified schema version.
    #[must_use]
    pub fn schema(&self) -> Arc<SchemaVersion> {
        self.inner.schema.current()
    }

    #[must_use]
    pub fn columns(&self) -> Columns {
        self.schema().columns.clone()
    }

    pub(crate) fn schema_handle(&self) -> &SchemaHandle {
        &self.inner.schema
    }

    /// Rows produced across all member streams.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.streams().iter().map(Datastream::count).sum()
    }

    /// First captured error. Never cleared.
    #[must_use]
    pub fn err(&self) -> Option<FlowError> {
        self.inner.error.get().cloned()
    }

    /// Record `err` if no error was captured yet, and cancel the flow.
    pub fn capture(&self, err: FlowError) {
        if self.inner.error.set(err.clone()).is_ok() {
            tracing::error!(error = %err, "Dataflow failed");
        }
        self.inner.cancel.cancel();
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Pause every member, then retain the union of their samples mapped
    /// onto the unified columns.
    ///
    /// Returns `false` if the flow has no members, has failed, or any member
    /// refused to pause.
    pub async fn pause(&self) -> bool {
        let streams = self.streams();
        if streams.is_empty() {
            return false;
        }
        for stream in &streams {
            if !stream.pause().await {
                return false;
            }
        }
        if self.err().is_some() {
            return false;
        }
        let unified = self.schema();
        let budget = self.inner.options.sample_size;
        let mut sample = Vec::new();
        for stream in &streams {
            let (schema, rows) = stream.sample();
            let mapping: Vec<Option<usize>> = unified
                .columns
                .iter()
                .map(|c| schema.columns.index_of(&c.name))
                .collect();
            for row in rows {
                if sample.len() >= budget {
                    break;
                }
                sample.push(
                    mapping
                        .iter()
                        .map(|i| i.and_then(|i| row.get(i).cloned()).unwrap_or(Value::Null))
                        .collect(),
                );
            }
        }
        *lock(&self.inner.sample) = sample;
        true
    }

    /// Resume every paused member. Returns `true` if all resumed.
    pub fn unpause(&self) -> bool {
        self.streams()
            .iter()
            .fold(true, |all, stream| stream.resume() && all)
    }

    /// Retained sample rows, laid out in unified column order as of the
    /// last [`Dataflow::pause`].
    #[must_use]
    pub fn sample(&self) -> Vec<Row> {
        lock(&self.inner.sample).clone()
    }

    #[must_use]
    pub fn is_inferred(&self) -> bool {
        self.inner.inferred.load(Ordering::SeqCst)
    }

    pub fn set_inferred(&self, inferred: bool) {
        self.inner.inferred.store(inferred, Ordering::SeqCst);
    }

    /// Publish `columns` as the unified schema and push their types and
    /// metadata down to every member stream that has them.
    pub fn set_columns(&self, columns: Columns) {
        let version = self.inner.schema.publish(columns);
        for stream in self.streams() {
            stream.update_columns(|cols| {
                for col in cols.iter_mut() {
                    if let Some(unified) = version.columns.get(&col.name) {
                        col.column_type = unified.column_type;
                        col.db_type.clone_from(&unified.db_type);
                        col.metadata.clone_from(&unified.metadata);
                    }
                }
            });
        }
    }

    /// Rename every column, unified and per member, with `casing`.
    pub fn apply_casing(&self, casing: ColumnCasing, upper: bool) {
        if casing == ColumnCasing::Source {
            return;
        }
        self.inner.schema.update(|cols| *cols = cols.with_casing(casing, upper));
        for stream in self.streams() {
            stream.update_columns(|cols| *cols = cols.with_casing(casing, upper));
        }
    }

    /// Tag the named unified columns with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Config`] when a name is not a column.
    pub fn set_metadata(&self, key: KeyType, names: &[String], tag: &str) -> Result<(), FlowError> {
        let (_, result) = self.inner.schema.update(|cols| cols.set_metadata(key, names, tag));
        result
    }

    /// Add a column whose value is `value` for every row written.
    pub fn add_constant_column(&self, column: Column, value: Value) {
        let key = column.name.to_lowercase();
        self.inner.schema.update(|cols| {
            if cols.get(&column.name).is_none() {
                cols.push(column);
            }
        });
        lock(&self.inner.constants).insert(key, value);
    }

    pub(crate) fn ignore_column(&self, name: &str) {
        lock(&self.inner.ignored).insert(name.to_lowercase());
    }

    #[must_use]
    pub fn is_ignored(&self, name: &str) -> bool {
        lock(&self.inner.ignored).contains(&name.to_lowercase())
    }

    /// Unified columns minus ignored ones: what is written to the target.
    #[must_use]
    pub fn writable_columns(&self) -> Columns {
        let ignored = lock(&self.inner.ignored);
        Columns::new(
            self.columns()
                .iter()
                .filter(|c| !ignored.contains(&c.name.to_lowercase()))
                .cloned()
                .collect(),
        )
    }

    /// Register a cleanup action to run at teardown.
    pub fn defer(&self, name: impl Into<String>, action: impl FnOnce() + Send + 'static) -> CleanupHandle {
        lock(&self.inner.cleanup).push(name, action)
    }

    /// Run every armed cleanup action, most recent first, then cancel
    /// anything still running. Idempotent.
    pub async fn teardown(&self) {
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut stack = std::mem::take(&mut *lock(&self.inner.cleanup));
        match tokio::task::spawn_blocking(move || stack.run_all()).await {
            Ok(ran) => tracing::debug!(actions = ran, "Dataflow torn down"),
            Err(e) => tracing::error!(error = %e, "Cleanup action panicked"),
        }
        self.inner.cancel.cancel();
    }

    async fn ensure_released(&self) {
        self.inner
            .released
            .get_or_init(|| async {
                for stream in self.streams() {
                    if stream.pause().await {
                        stream.resume();
                    }
                }
                lock(&self.inner.tx).take();
            })
            .await;
    }

    /// Next batch from any member, `None` once all are drained.
    ///
    /// The first call releases members that were never paused and seals the
    /// flow against new members.
    ///
    /// # Errors
    ///
    /// Returns the flow's first error, or [`FlowError::Cancelled`].
    pub async fn next_batch(&self) -> Result<Option<Batch>, FlowError> {
        self.ensure_released().await;
        let mut rx = self.inner.rx.lock().await;
        tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => Err(self.err().unwrap_or(FlowError::Cancelled)),
            batch = rx.recv() => match batch {
                Some(batch) => Ok(Some(batch)),
                None => self.err().map_or(Ok(None), Err),
            },
        }
    }

    /// [`Dataflow::next_batch`] for consumers on blocking threads.
    ///
    /// # Errors
    ///
    /// Same as [`Dataflow::next_batch`].
    pub fn blocking_next_batch(&self) -> Result<Option<Batch>, FlowError> {
        tokio::runtime::Handle::current().block_on(self.next_batch())
    }

    /// Map `batch` onto the current writable columns: columns are matched by
    /// name, missing ones read as null, constants are filled and every value
    /// is cast to its column type. Checksum accumulators are updated.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::TypeConflict`] when a value cannot be cast.
    pub fn encode_batch(&self, batch: &Batch) -> Result<(Columns, Vec<Row>), FlowError> {
        enum Slot {
            Const(Value),
            Index(usize),
            Missing,
        }

        let columns = self.writable_columns();
        let slots: Vec<Slot> = {
            let constants = lock(&self.inner.constants);
            columns
                .iter()
                .map(|c| match constants.get(&c.name.to_lowercase()) {
                    Some(v) => Slot::Const(v.clone()),
                    None => batch
                        .schema
                        .columns
                        .index_of(&c.name)
                        .map_or(Slot::Missing, Slot::Index),
                })
                .collect()
        };

        let mut sums: Vec<Option<u64>> = vec![Some(0); columns.len()];
        let mut rows = Vec::with_capacity(batch.rows.len());
        for row in &batch.rows {
            let mut out = Vec::with_capacity(columns.len());
            for (i, (col, slot)) in columns.iter().zip(&slots).enumerate() {
                let value = match slot {
                    Slot::Const(v) => v.clone(),
                    Slot::Index(idx) => row.get(*idx).cloned().unwrap_or(Value::Null),
                    Slot::Missing => Value::Null,
                };
                let cast = value.cast(col.column_type).ok_or_else(|| FlowError::TypeConflict {
                    column: col.name.clone(),
                    message: format!("cannot represent '{value}' as {}", col.column_type),
                })?;
                sums[i] = match (sums[i], cast.checksum()) {
                    (Some(acc), Some(c)) => Some(acc.wrapping_add(c)),
                    _ => None,
                };
                out.push(cast);
            }
            rows.push(out);
        }

        let mut checksums = lock(&self.inner.checksums);
        for (col, sum) in columns.iter().zip(sums) {
            let entry = checksums.entry(col.name.to_lowercase()).or_insert(Some(0));
            *entry = match (*entry, sum) {
                (Some(acc), Some(s)) => Some(acc.wrapping_add(s)),
                _ => None,
            };
        }
        Ok((columns, rows))
    }

    /// Per-column checksum accumulators keyed by lower-cased name.
    #[must_use]
    pub fn checksums(&self) -> BTreeMap<String, Option<u64>> {
        lock(&self.inner.checksums).clone()
    }

    /// Stop comparing `name`'s checksum. Batches already encoded under a
    /// narrower type no longer sum like the column's rows in the target.
    pub(crate) fn reset_checksum(&self, name: &str) {
        lock(&self.inner.checksums).insert(name.to_lowercase(), None);
    }

    /// Gate held shared by writers per batch and exclusively by schema
    /// mutation.
    #[must_use]
    pub fn write_gate(&self) -> Arc<RwLock<()>> {
        Arc::clone(&self.inner.gate)
    }

    pub fn set_schema_policy(&self, policy: SchemaPolicy) {
        self.inner.coordinator.set_policy(policy);
    }

    /// Route schema events to DDL on `binding`'s table.
    pub fn bind_target(&self, binding: TargetBinding) {
        self.inner.coordinator.bind(binding);
    }

    pub fn unbind_target(&self) {
        self.inner.coordinator.unbind();
    }

    pub(crate) async fn submit_schema_event(
        &self,
        kind: SchemaEventKind,
        column: Column,
        origin: Option<Datastream>,
    ) -> Result<(), FlowError> {
        self.inner.coordinator.submit(kind, column, origin).await
    }
}
