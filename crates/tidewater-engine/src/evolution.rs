//! Schema evolution coordinator.
//!
//! Producers that discover a new column or a value too wide for its column
//! send a [`SchemaEvent`] and wait for the acknowledgement. A single task per
//! dataflow applies events one at a time: it takes the write gate (so no
//! writer is mid-batch), runs DDL against the bound target table, publishes
//! the new unified schema and re-synchronizes member streams.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{mpsc, oneshot};

use tidewater_types::{Column, ColumnPolicy, ColumnType, Columns, FlowError, SchemaPolicy, TypeChangePolicy};

use crate::connector::{blocking, TableName, TargetConnection};
use crate::dataflow::{Dataflow, FlowInner};
use crate::stream::Datastream;

const EVENT_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaEventKind {
    ColumnAdded,
    ColumnTypeChanged,
}

impl std::fmt::Display for SchemaEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ColumnAdded => "column_added",
            Self::ColumnTypeChanged => "column_type_changed",
        })
    }
}

/// One requested schema change.
pub struct SchemaEvent {
    pub kind: SchemaEventKind,
    pub column: Column,
    /// Stream that discovered the change.
    pub origin: Option<Datastream>,
    ack: oneshot::Sender<Result<(), FlowError>>,
}

/// Target table that schema events are applied to.
#[derive(Clone)]
pub struct TargetBinding {
    pub target: Arc<dyn TargetConnection>,
    pub table: TableName,
}

#[derive(Default)]
struct CoordinatorState {
    binding: Option<TargetBinding>,
    policy: SchemaPolicy,
}

pub(crate) struct SchemaCoordinator {
    tx: mpsc::Sender<SchemaEvent>,
    state: Arc<Mutex<CoordinatorState>>,
}

impl SchemaCoordinator {
    pub(crate) fn spawn(flow: Weak<FlowInner>) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let state = Arc::new(Mutex::new(CoordinatorState::default()));
        tokio::spawn(run(rx, flow, Arc::clone(&state)));
        Self { tx, state }
    }

    pub(crate) fn bind(&self, binding: TargetBinding) {
        tracing::debug!(table = %binding.table, "Schema coordinator bound");
        self.state.lock().unwrap_or_else(PoisonError::into_inner).binding = Some(binding);
    }

    pub(crate) fn unbind(&self) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).binding = None;
    }

    pub(crate) fn set_policy(&self, policy: SchemaPolicy) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).policy = policy;
    }

    pub(crate) async fn submit(
        &self,
        kind: SchemaEventKind,
        column: Column,
        origin: Option<Datastream>,
    ) -> Result<(), FlowError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(SchemaEvent {
                kind,
                column,
                origin,
                ack,
            })
            .await
            .map_err(|_| FlowError::Cancelled)?;
        done.await.map_err(|_| FlowError::Cancelled)?
    }
}

async fn run(mut rx: mpsc::Receiver<SchemaEvent>, flow: Weak<FlowInner>, state: Arc<Mutex<CoordinatorState>>) {
    let mut applied: HashSet<(String, ColumnType)> = HashSet::new();
    while let Some(event) = rx.recv().await {
        let Some(inner) = flow.upgrade() else {
            let _ = event.ack.send(Err(FlowError::Cancelled));
            break;
        };
        let flow = Dataflow::from_inner(inner);
        let (binding, policy) = {
            let state = state.lock().unwrap_or_else(PoisonError::into_inner);
            (state.binding.clone(), state.policy)
        };
        let key = (event.column.name.to_lowercase(), event.column.column_type);
        let result = if applied.contains(&key) {
            Ok(())
        } else {
            apply(&flow, binding.as_ref(), policy, &event).await
        };
        match &result {
            Ok(()) => {
                applied.insert(key);
            }
            Err(err) => flow.capture(err.clone()),
        }
        let _ = event.ack.send(result);
    }
}

async fn apply(
    flow: &Dataflow,
    binding: Option<&TargetBinding>,
    policy: SchemaPolicy,
    event: &SchemaEvent,
) -> Result<(), FlowError> {
    let gate = flow.write_gate();
    let _exclusive = gate.write().await;
    match event.kind {
        SchemaEventKind::ColumnAdded => add_column(flow, binding, policy.new_column, event).await,
        SchemaEventKind::ColumnTypeChanged => change_type(flow, binding, policy.type_change, &event.column).await,
    }
}

async fn add_column(
    flow: &Dataflow,
    binding: Option<&TargetBinding>,
    policy: ColumnPolicy,
    event: &SchemaEvent,
) -> Result<(), FlowError> {
    let column = &event.column;
    let existing = flow.schema().columns.get(&column.name).cloned();
    match existing {
        // Another stream already brought it in; only the type may differ.
        Some(existing) => {
            if existing.column_type.widen(column.column_type) != existing.column_type {
                change_type(flow, binding, TypeChangePolicy::Widen, column).await?;
            }
        }
        None => {
            match policy {
                ColumnPolicy::Fail => {
                    return Err(FlowError::SchemaMutation(format!(
                        "new column '{}' found in stream but the new-column policy is fail",
                        column.name
                    )));
                }
                ColumnPolicy::Ignore => {
                    tracing::info!(column = %column.name, "Ignoring new column");
                    flow.ignore_column(&column.name);
                }
                ColumnPolicy::Add => {
                    if let Some(binding) = binding {
                        let table = binding.table.clone();
                        let added = Columns::new(vec![column.clone()]);
                        blocking(&binding.target, move |t| t.add_missing_columns(&table, &added))
                            .await
                            .map_err(|e| {
                                FlowError::SchemaMutation(format!(
                                    "could not add column '{}' to {}: {e}",
                                    column.name, binding.table
                                ))
                            })?;
                    }
                }
            }
            flow.schema_handle().update(|cols| cols.push(column.clone()));
            tracing::info!(
                column = %column.name,
                column_type = %column.column_type,
                stream = event.origin.as_ref().map(Datastream::name),
                "Column added"
            );
        }
    }
    // Only the origin produces the column. Other members keep their lists;
    // batches are encoded by name and a column a stream lacks reads as null.
    if let Some(origin) = &event.origin {
        origin.update_columns(|cols| {
            if cols.get(&column.name).is_none() {
                cols.push(column.clone());
            }
        });
    }
    Ok(())
}

async fn change_type(
    flow: &Dataflow,
    binding: Option<&TargetBinding>,
    policy: TypeChangePolicy,
    column: &Column,
) -> Result<(), FlowError> {
    let Some(current) = flow.schema().columns.get(&column.name).cloned() else {
        return Err(FlowError::SchemaMutation(format!(
            "cannot change type of unknown column '{}'",
            column.name
        )));
    };
    let widened = current.column_type.widen(column.column_type);
    if widened != current.column_type {
        if policy == TypeChangePolicy::Fail {
            return Err(FlowError::SchemaMutation(format!(
                "column '{}' would widen from {} to {widened} but the type-change policy is fail",
                column.name, current.column_type
            )));
        }
        let alter = policy == TypeChangePolicy::Widen && !flow.is_ignored(&column.name);
        if let (true, Some(binding)) = (alter, binding) {
            let table = binding.table.clone();
            let target_column = Column {
                column_type: widened,
                db_type: None,
                ..current.clone()
            };
            blocking(&binding.target, move |t| t.alter_column_type(&table, &target_column))
                .await
                .map_err(|e| {
                    FlowError::SchemaMutation(format!(
                        "could not widen column '{}' of {} to {widened}: {e}",
                        column.name, binding.table
                    ))
                })?;
        }
        flow.schema_handle().update(|cols| {
            if let Some(col) = cols.get_mut(&column.name) {
                col.widen(widened);
            }
        });
        flow.reset_checksum(&column.name);
        tracing::info!(
            column = %column.name,
            from = %current.column_type,
            to = %widened,
            "Column type widened"
        );
    }
    for stream in flow.streams() {
        stream.update_columns(|cols| {
            if let Some(col) = cols.get_mut(&column.name) {
                col.widen(widened);
            }
        });
    }
    Ok(())
}
