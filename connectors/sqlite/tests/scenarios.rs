//! Load scenarios against a real SQLite target.

use std::sync::Arc;

use rstest::rstest;
use tidewater_engine::inference::InferenceOptions;
use tidewater_engine::verify::ChecksumOutcome;
use tidewater_engine::{
    Dataflow, Datastream, FlowOptions, LoadOptions, LoadOrchestrator, LoadPhase, LoadSpec, MergeStrategy, TableName,
    TargetConnection,
};
use tidewater_sqlite::SqliteTarget;
use tidewater_types::{Column, ColumnType, Columns, FlowError, KeyType, LoadMode, Row, Value};

fn options() -> FlowOptions {
    FlowOptions {
        batch_rows: 2,
        queue_batches: 4,
        sample_size: 2,
        ragged: false,
    }
}

fn spec(mode: LoadMode) -> LoadSpec {
    LoadSpec {
        table: TableName::new("users"),
        mode,
        options: LoadOptions {
            inference: InferenceOptions {
                safe: false,
                safe_min_rows: 0,
            },
            strict_checksum: true,
            ..LoadOptions::default()
        },
    }
}

fn user(id: i64, name: &str, age: i64) -> Row {
    vec![Value::Int(id), Value::from(name), Value::Int(age)]
}

fn user_columns() -> Columns {
    Columns::from_names(["id", "name", "age"], ColumnType::String)
}

/// A one-stream flow fed by a background producer.
fn flow_of(columns: Columns, rows: Vec<Row>) -> Dataflow {
    let flow = Dataflow::new(options());
    let (stream, mut writer) = Datastream::new("users", columns, options());
    flow.add_stream(stream).unwrap();
    tokio::spawn(async move {
        for row in rows {
            if let Err(e) = writer.produce(row).await {
                writer.fail(e);
                return;
            }
        }
        let _ = writer.finish().await;
    });
    flow
}

fn seeded(rows: &[Row]) -> (tempfile::TempDir, SqliteTarget) {
    let dir = tempfile::tempdir().unwrap();
    let target = SqliteTarget::open(&dir.path().join("dst.db")).unwrap();
    target
        .execute("CREATE TABLE users (id INT, name VARCHAR(255), age INT)")
        .unwrap();
    let columns = Columns::new(vec![
        Column::new("id", ColumnType::Integer),
        Column::new("name", ColumnType::String),
        Column::new("age", ColumnType::Integer),
    ]);
    target.insert_rows(&TableName::new("users"), &columns, rows).unwrap();
    (dir, target)
}

fn target_with(rows: &[Row]) -> (tempfile::TempDir, Arc<SqliteTarget>) {
    let (dir, target) = seeded(rows);
    (dir, Arc::new(target))
}

fn final_rows(target: &SqliteTarget) -> Vec<Row> {
    target.query_rows("SELECT * FROM users ORDER BY id").unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn full_refresh_replaces_table() {
    let (_dir, target) = target_with(&[user(9, "Old", 99)]);
    let rows = vec![user(1, "Alice", 30), user(2, "Bob", 25), user(3, "Charlie", 35)];
    let flow = flow_of(user_columns(), rows.clone());

    let mut orch = LoadOrchestrator::new(target.clone(), spec(LoadMode::FullRefresh));
    let result = orch.run(&flow).await.unwrap();

    assert_eq!(result.phase, LoadPhase::Committed);
    assert_eq!(result.strategy, Some(MergeStrategy::Replace));
    assert_eq!(result.rows_merged, 3);
    assert_eq!(final_rows(&target), rows);
    assert!(!target.table_exists(&TableName::new("users_tmp")).unwrap());
}

#[rstest]
#[case::native_upsert(true, MergeStrategy::Upsert)]
#[case::delete_insert(false, MergeStrategy::DeleteInsert)]
#[tokio::test(flavor = "multi_thread")]
async fn incremental_merge_replaces_keyed_rows(#[case] native: bool, #[case] expected: MergeStrategy) {
    let dir = tempfile::tempdir().unwrap();
    let target = Arc::new(
        SqliteTarget::open(&dir.path().join("dst.db"))
            .unwrap()
            .with_native_upsert(native),
    );
    for rows in [vec![user(1, "Alice", 30)], vec![user(1, "Alice", 31)]] {
        let flow = flow_of(user_columns(), rows);
        flow.set_metadata(KeyType::PrimaryKey, &["id".to_string()], "source").unwrap();
        let mut orch = LoadOrchestrator::new(target.clone(), spec(LoadMode::Incremental));
        let result = orch.run(&flow).await.unwrap();
        assert_eq!(result.strategy, Some(expected));
    }
    assert_eq!(final_rows(&target), vec![user(1, "Alice", 31)]);
}

#[rstest]
#[case::native_upsert(true)]
#[case::delete_insert(false)]
#[tokio::test(flavor = "multi_thread")]
async fn upsert_keeps_last_staged_row_per_key(#[case] native: bool) {
    let (_dir, target) = seeded(&[user(1, "Alice", 30), user(2, "Bob", 25)]);
    let target = Arc::new(target.with_native_upsert(native));
    let flow = flow_of(
        user_columns(),
        vec![user(2, "Bob", 26), user(3, "Cleo", 40), user(2, "Bob", 27)],
    );
    flow.set_metadata(KeyType::PrimaryKey, &["id".to_string()], "source").unwrap();
    let mut load = spec(LoadMode::Incremental);
    load.options.writers = 1;
    let mut orch = LoadOrchestrator::new(target.clone(), load);
    orch.run(&flow).await.unwrap();

    assert_eq!(
        final_rows(&target),
        vec![user(1, "Alice", 30), user(2, "Bob", 27), user(3, "Cleo", 40)]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_rows_leave_final_table_alone() {
    let (_dir, target) = target_with(&[user(1, "Alice", 30)]);
    let flow = flow_of(user_columns(), Vec::new());
    let mut orch = LoadOrchestrator::new(target.clone(), spec(LoadMode::FullRefresh));
    let result = orch.run(&flow).await.unwrap();

    assert!(result.merge_skipped);
    assert_eq!(result.phase, LoadPhase::Committed);
    assert_eq!(final_rows(&target), vec![user(1, "Alice", 30)]);
    assert!(!target.table_exists(&TableName::new("users_tmp")).unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn column_added_mid_stream_reaches_final_table() {
    let dir = tempfile::tempdir().unwrap();
    let target = Arc::new(SqliteTarget::open(&dir.path().join("dst.db")).unwrap());

    let flow = Dataflow::new(options());
    let (stream, mut writer) = Datastream::new(
        "users",
        Columns::from_names(["id", "name"], ColumnType::String),
        options(),
    );
    flow.add_stream(stream).unwrap();
    let producer = tokio::spawn(async move {
        for row in [
            vec![Value::Int(1), Value::from("Alice")],
            vec![Value::Int(2), Value::from("Bob")],
            vec![Value::Int(3), Value::from("Cleo")],
        ] {
            writer.produce(row).await?;
        }
        writer.add_columns(vec![Column::new("age", ColumnType::Integer)]).await?;
        writer.produce(user(4, "Dana", 40)).await?;
        writer.finish().await
    });

    let mut orch = LoadOrchestrator::new(target.clone(), spec(LoadMode::FullRefresh));
    let result = orch.run(&flow).await.unwrap();
    producer.await.unwrap().unwrap();

    assert_eq!(result.rows_merged, 4);
    let columns = target.get_columns(&TableName::new("users")).unwrap();
    assert_eq!(columns.names(), vec!["id", "name", "age"]);
    assert_eq!(columns[2].column_type, ColumnType::Integer);
    let rows = final_rows(&target);
    assert_eq!(rows[0], vec![Value::Int(1), Value::from("Alice"), Value::Null]);
    assert_eq!(rows[3], user(4, "Dana", 40));
}

#[tokio::test(flavor = "multi_thread")]
async fn type_widened_mid_stream_commits_with_strict_checksum() {
    let dir = tempfile::tempdir().unwrap();
    let target = Arc::new(SqliteTarget::open(&dir.path().join("dst.db")).unwrap());

    let flow = Dataflow::new(options());
    let (stream, mut writer) = Datastream::new(
        "users",
        Columns::from_names(["id", "name"], ColumnType::String),
        options(),
    );
    flow.add_stream(stream).unwrap();
    let producer = tokio::spawn(async move {
        writer.produce(vec![Value::from("10"), Value::from("a")]).await?;
        writer.produce(vec![Value::from("20"), Value::from("b")]).await?;
        // Let the first batch reach staging as integers.
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        writer.produce(vec![Value::from("x"), Value::from("c")]).await?;
        writer.finish().await
    });

    let mut orch = LoadOrchestrator::new(target.clone(), spec(LoadMode::FullRefresh));
    let result = orch.run(&flow).await.unwrap();
    producer.await.unwrap().unwrap();

    assert_eq!(result.phase, LoadPhase::Committed);
    assert_eq!(result.rows_merged, 3);
    assert_eq!(result.checksum, Some(ChecksumOutcome::Matched));
    assert_eq!(flow.checksums()["id"], None);
    let columns = target.get_columns(&TableName::new("users")).unwrap();
    assert_eq!(columns[0].column_type, ColumnType::String);
    let names: Vec<Value> = target
        .query_rows("SELECT name FROM users ORDER BY name")
        .unwrap()
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(names, vec![Value::from("a"), Value::from("b"), Value::from("c")]);
}

#[tokio::test(flavor = "multi_thread")]
async fn count_mismatch_aborts_before_merge() {
    let (_dir, target) = target_with(&[user(9, "Keep", 1)]);
    let flow = flow_of(
        user_columns(),
        vec![user(1, "Alice", 30), user(2, "Bob", 25), user(3, "Cleo", 35)],
    );
    let mut load = spec(LoadMode::FullRefresh);
    // The trigger silently discards one staged row.
    load.options.table_ddl = Some(
        "CREATE TABLE users (id INT, name VARCHAR(255), age INT); \
         CREATE TRIGGER users_lossy AFTER INSERT ON users WHEN NEW.id = 2 \
         BEGIN DELETE FROM users WHERE id = 2; END;"
            .into(),
    );
    let mut orch = LoadOrchestrator::new(target.clone(), load);
    let err = orch.run(&flow).await.unwrap_err();

    assert!(matches!(err.root_cause(), FlowError::Consistency(_)), "got: {err}");
    assert_eq!(orch.phase(), LoadPhase::Aborted);
    assert_eq!(final_rows(&target), vec![user(9, "Keep", 1)]);
    assert!(!target.table_exists(&TableName::new("users_tmp")).unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn swap_full_refresh_drops_previous_table() {
    let (_dir, target) = target_with(&[user(9, "Old", 99)]);
    let flow = flow_of(user_columns(), vec![user(1, "Alice", 30)]);
    let mut load = spec(LoadMode::FullRefresh);
    load.options.use_swap = true;
    let mut orch = LoadOrchestrator::new(target.clone(), load);
    let result = orch.run(&flow).await.unwrap();

    assert_eq!(result.strategy, Some(MergeStrategy::Swap));
    assert_eq!(final_rows(&target), vec![user(1, "Alice", 30)]);
    assert!(!target.table_exists(&TableName::new("users_tmp")).unwrap());
}
