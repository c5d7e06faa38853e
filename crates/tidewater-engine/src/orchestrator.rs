//! Load orchestrator: stage, verify, merge.
//!
//! A load moves through `Staging -> Verifying -> Merging -> Committed`;
//! any failure moves it to `Aborted`. The staging table is dropped on
//! success and on staging failure, and kept when the merge fails so the
//! staged rows can be inspected.

use std::sync::Arc;
use std::time::Instant;

use tidewater_types::{
    Column, ColumnCasing, ColumnType, Columns, ConnectorError, FlowError, KeyType, LoadMode, SchemaPolicy, Value,
};

use crate::cleanup::CleanupHandle;
use crate::connector::{blocking, IsolationLevel, TableName, TargetCapabilities, TargetConnection};
use crate::dataflow::Dataflow;
use crate::evolution::TargetBinding;
use crate::inference::{infer_columns, InferenceOptions};
use crate::result::{LoadPhase, LoadResult, LoadTimings, MergeStrategy};
use crate::staging::staging_table_name;
use crate::verify::{verify_checksum, verify_count, ChecksumOutcome};
use crate::writer::{bulk_import, DEFAULT_WRITERS};

/// Column stamped on every row of a snapshot load.
pub const SNAPSHOT_COLUMN: &str = "_tw_loaded_at";

/// Largest staged row count for which checksums are compared.
pub const DEFAULT_CHECKSUM_MAX_ROWS: u64 = 10_000;

/// Target-side knobs of one load.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct LoadOptions {
    pub table_tmp: Option<String>,
    pub table_ddl: Option<String>,
    pub pre_sql: Option<String>,
    pub post_sql: Option<String>,
    pub casing: ColumnCasing,
    pub use_swap: bool,
    pub allow_empty: bool,
    pub policy: SchemaPolicy,
    pub writers: usize,
    pub inference: InferenceOptions,
    pub checksum_max_rows: u64,
    pub strict_checksum: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            table_tmp: None,
            table_ddl: None,
            pre_sql: None,
            post_sql: None,
            casing: ColumnCasing::default(),
            use_swap: false,
            allow_empty: false,
            policy: SchemaPolicy::default(),
            writers: DEFAULT_WRITERS,
            inference: InferenceOptions::default(),
            checksum_max_rows: DEFAULT_CHECKSUM_MAX_ROWS,
            strict_checksum: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSpec {
    pub table: TableName,
    pub mode: LoadMode,
    pub options: LoadOptions,
}

/// Pick the merge strategy for `mode` on a store with `caps`.
#[must_use]
pub fn choose_strategy(mode: LoadMode, has_keys: bool, use_swap: bool, caps: &TargetCapabilities) -> MergeStrategy {
    match mode {
        LoadMode::FullRefresh | LoadMode::Snapshot if use_swap && caps.supports_swap => MergeStrategy::Swap,
        LoadMode::FullRefresh | LoadMode::Snapshot => MergeStrategy::Replace,
        LoadMode::Truncate => MergeStrategy::TruncateInsert,
        LoadMode::Incremental | LoadMode::Backfill if !has_keys => MergeStrategy::Insert,
        LoadMode::Incremental | LoadMode::Backfill if caps.native_upsert => MergeStrategy::Upsert,
        LoadMode::Incremental | LoadMode::Backfill => MergeStrategy::DeleteInsert,
    }
}

/// Drives one dataflow into one target table.
pub struct LoadOrchestrator {
    target: Arc<dyn TargetConnection>,
    spec: LoadSpec,
    caps: TargetCapabilities,
    staging: TableName,
    phase: LoadPhase,
    drop_staging: Option<CleanupHandle>,
}

impl LoadOrchestrator {
    #[must_use]
    pub fn new(target: Arc<dyn TargetConnection>, spec: LoadSpec) -> Self {
        let caps = target.capabilities();
        let staging = staging_table_name(&spec.table, &caps, spec.options.table_tmp.as_deref());
        Self {
            target,
            spec,
            caps,
            staging,
            phase: LoadPhase::Staging,
            drop_staging: None,
        }
    }

    #[must_use]
    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    #[must_use]
    pub fn staging_table(&self) -> &TableName {
        &self.staging
    }

    fn transition(&mut self, next: LoadPhase) {
        tracing::info!(
            table = %self.spec.table,
            from = %self.phase,
            to = %next,
            "Load phase transition"
        );
        self.phase = next;
    }

    async fn call<T, F>(&self, f: F) -> Result<T, FlowError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn TargetConnection) -> Result<T, ConnectorError> + Send + 'static,
    {
        blocking(&self.target, f).await.map_err(FlowError::from)
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<(), FlowError> {
        self.call(move |t| t.begin(isolation))
            .await
            .map_err(|e| FlowError::Transaction(format!("could not begin transaction: {e}")))
    }

    async fn commit(&self) -> Result<(), FlowError> {
        self.call(|t| t.commit())
            .await
            .map_err(|e| FlowError::Transaction(format!("could not commit transaction: {e}")))
    }

    async fn rollback(&self) {
        if let Err(e) = self.call(|t| t.rollback()).await {
            tracing::warn!(table = %self.spec.table, error = %e, "Rollback failed");
        }
    }

    /// Run the load to completion. The dataflow is always torn down.
    ///
    /// # Errors
    ///
    /// Returns the first error of any phase, wrapped with phase context.
    pub async fn run(&mut self, flow: &Dataflow) -> Result<LoadResult, FlowError> {
        let started = Instant::now();
        let result = self.load(flow, started).await;
        if let Err(err) = &result {
            self.transition(LoadPhase::Aborted);
            flow.capture(err.clone());
        }
        flow.teardown().await;
        result
    }

    async fn load(&mut self, flow: &Dataflow, started: Instant) -> Result<LoadResult, FlowError> {
        let mut result = LoadResult {
            phase: LoadPhase::Staging,
            table: self.spec.table.to_string(),
            staging_table: self.staging.to_string(),
            mode: self.spec.mode,
            strategy: None,
            rows_staged: 0,
            rows_merged: 0,
            checksum: None,
            merge_skipped: false,
            timings: LoadTimings::default(),
        };

        self.transition(LoadPhase::Staging);
        let phase_start = Instant::now();
        let written = self.stage(flow).await?;
        result.timings.staging_secs = phase_start.elapsed().as_secs_f64();

        self.transition(LoadPhase::Verifying);
        let phase_start = Instant::now();
        let staging = self.staging.clone();
        let staged = self.call(move |t| t.count(&staging)).await?;
        let observed = flow.count();
        tracing::debug!(table = %self.staging, staged, observed, written, "Verifying staged rows");
        verify_count(staged, observed)?;
        let sampled = flow.sample().len();
        if staged == 0 && sampled > 0 {
            return Err(FlowError::Consistency(format!(
                "staging table {} is empty but {sampled} rows were sampled from the stream",
                self.staging
            )));
        }
        result.rows_staged = staged;
        result.checksum = if staged > 0 && staged <= self.spec.options.checksum_max_rows {
            Some(
                verify_checksum(
                    &self.target,
                    &self.staging,
                    &flow.writable_columns(),
                    &flow.checksums(),
                    self.spec.options.strict_checksum,
                )
                .await?,
            )
        } else {
            Some(ChecksumOutcome::Skipped(format!(
                "{staged} rows outside checksum range"
            )))
        };
        result.timings.verify_secs = phase_start.elapsed().as_secs_f64();

        if staged == 0 && !self.spec.options.allow_empty {
            tracing::warn!(
                table = %self.spec.table,
                "No rows staged; skipping merge (set allow_empty to load empty results)"
            );
            self.transition(LoadPhase::Committed);
            result.phase = LoadPhase::Committed;
            result.merge_skipped = true;
            result.timings.total_secs = started.elapsed().as_secs_f64();
            return Ok(result);
        }

        self.transition(LoadPhase::Merging);
        let phase_start = Instant::now();
        let (strategy, merged) = self.merge(flow).await?;
        result.strategy = Some(strategy);
        result.rows_merged = merged;
        result.timings.merge_secs = phase_start.elapsed().as_secs_f64();

        let staging = self.staging.clone();
        match self.call(move |t| t.drop_table(&staging)).await {
            Ok(()) => {
                if let Some(handle) = &self.drop_staging {
                    handle.disarm();
                }
            }
            Err(e) => tracing::warn!(table = %self.staging, error = %e, "Could not drop staging table"),
        }

        self.transition(LoadPhase::Committed);
        result.phase = LoadPhase::Committed;
        result.timings.total_secs = started.elapsed().as_secs_f64();
        tracing::info!(
            table = %self.spec.table,
            mode = %self.spec.mode,
            rows = merged,
            strategy = ?strategy,
            duration_secs = result.timings.total_secs,
            "Load committed"
        );
        Ok(result)
    }

    /// Stage the flow. Returns the rows the writer pool reported.
    async fn stage(&mut self, flow: &Dataflow) -> Result<u64, FlowError> {
        let staging = self.staging.clone();
        self.call(move |t| t.drop_table(&staging))
            .await
            .map_err(|e| e.context(format!("could not drop staging table {}", self.staging)))?;

        if !flow.pause().await {
            return Err(flow
                .err()
                .unwrap_or_else(|| FlowError::Config("could not pause streams to infer columns".into())));
        }

        let options = &self.spec.options;
        flow.apply_casing(options.casing, self.caps.upper_case_identifiers);
        flow.set_schema_policy(options.policy);
        if !flow.is_inferred() {
            let inferred = infer_columns(&flow.columns(), &flow.sample(), options.inference);
            flow.set_columns(inferred);
            flow.set_inferred(true);
        }
        if self.spec.mode == LoadMode::Snapshot {
            let name = if self.caps.upper_case_identifiers {
                SNAPSHOT_COLUMN.to_uppercase()
            } else {
                SNAPSHOT_COLUMN.to_string()
            };
            flow.add_constant_column(Column::new(name, ColumnType::TimestampTz), Value::now());
        }

        if self.caps.transactional_ddl {
            self.begin(IsolationLevel::Default).await?;
        }
        let columns = flow.writable_columns();
        let ddl = options.table_ddl.as_deref().map(|ddl| self.staging_ddl(ddl));
        {
            let gate = flow.write_gate();
            let _exclusive = gate.write().await;
            let staging = self.staging.clone();
            let created = self
                .call(move |t| t.create_table_if_not_exists(&staging, &columns, ddl.as_deref()))
                .await;
            if let Err(e) = created {
                if self.caps.transactional_ddl {
                    self.rollback().await;
                }
                return Err(e.context(format!("could not create staging table {}", self.staging)));
            }
            flow.bind_target(TargetBinding {
                target: Arc::clone(&self.target),
                table: self.staging.clone(),
            });
        }
        tracing::debug!(table = %self.staging, columns = flow.columns().len(), "Staging table created");

        let target = Arc::clone(&self.target);
        let staging = self.staging.clone();
        self.drop_staging = Some(flow.defer(format!("drop {}", self.staging), move || {
            if let Err(e) = target.drop_table(&staging) {
                tracing::warn!(table = %staging, error = %e, "Could not drop staging table");
            }
        }));

        if !self.caps.transactional_ddl {
            self.begin(IsolationLevel::Default).await?;
        }

        if !flow.unpause() {
            tracing::debug!("Some streams were not paused at unpause");
        }
        let written = match bulk_import(Arc::clone(&self.target), &self.staging, flow, options.writers).await {
            Ok(written) => written,
            Err(e) => {
                self.rollback().await;
                flow.unbind_target();
                return Err(e.context(format!("could not insert into {}", self.staging)));
            }
        };
        flow.unbind_target();
        if let Err(e) = self.commit().await {
            self.rollback().await;
            return Err(e.context(format!("could not insert into {}", self.staging)));
        }
        tracing::info!(table = %self.staging, rows = written, "Staging complete");
        Ok(written)
    }

    fn staging_ddl(&self, ddl: &str) -> String {
        let qualified = self.spec.table.to_string();
        if ddl.contains(&qualified) {
            ddl.replace(&qualified, &self.staging.to_string())
        } else {
            ddl.replace(&self.spec.table.name, &self.staging.name)
        }
    }

    fn render_sql(&self, sql: &str) -> String {
        sql.replace("{target_table}", &self.spec.table.to_string())
            .replace("{staging_table}", &self.staging.to_string())
    }

    async fn merge(&mut self, flow: &Dataflow) -> Result<(MergeStrategy, u64), FlowError> {
        let columns = flow.writable_columns();
        let keys: Vec<String> = columns.keys(KeyType::PrimaryKey).iter().map(|c| c.name.clone()).collect();
        let strategy = choose_strategy(self.spec.mode, !keys.is_empty(), self.spec.options.use_swap, &self.caps);
        let isolation = if self.caps.serializable_merge {
            IsolationLevel::Serializable
        } else {
            IsolationLevel::Default
        };
        tracing::info!(table = %self.spec.table, strategy = ?strategy, "Merging staged rows");

        self.begin(isolation).await?;
        let merged = match self.merge_in_transaction(strategy, &columns, &keys).await {
            Ok(merged) => self.commit().await.map(|()| merged),
            Err(e) => Err(e),
        };
        match merged {
            Ok(merged) => Ok((strategy, merged)),
            Err(e) => {
                self.rollback().await;
                if let Some(handle) = &self.drop_staging {
                    handle.disarm();
                }
                tracing::error!(
                    table = %self.spec.table,
                    staging = %self.staging,
                    error = %e,
                    "Merge failed; staging table kept"
                );
                Err(e.context(format!(
                    "could not merge {} into {} (staging table kept)",
                    self.staging, self.spec.table
                )))
            }
        }
    }

    async fn merge_in_transaction(
        &self,
        strategy: MergeStrategy,
        columns: &Columns,
        keys: &[String],
    ) -> Result<u64, FlowError> {
        if let Some(sql) = &self.spec.options.pre_sql {
            let sql = self.render_sql(sql);
            self.call(move |t| t.execute(&sql))
                .await
                .map_err(|e| e.context("pre_sql failed"))?;
        }

        let staging = self.staging.clone();
        let table = self.spec.table.clone();
        let merged = match strategy {
            MergeStrategy::Swap => {
                let (s, t) = (staging.clone(), table.clone());
                self.call(move |c| c.swap_table(&s, &t)).await?;
                self.call(move |c| c.count(&table)).await?
            }
            MergeStrategy::Replace => {
                let t = table.clone();
                self.call(move |c| c.drop_table(&t)).await?;
                self.create_final(columns).await?;
                self.insert_from(columns, &[]).await?
            }
            MergeStrategy::TruncateInsert => {
                if !self.create_final(columns).await? {
                    self.evolve_final(columns).await?;
                    self.call(move |c| c.truncate(&table)).await?;
                }
                self.insert_from(columns, &[]).await?
            }
            MergeStrategy::Insert => {
                if !self.create_final(columns).await? {
                    self.evolve_final(columns).await?;
                }
                self.insert_from(columns, &[]).await?
            }
            MergeStrategy::Upsert => {
                if !self.create_final(columns).await? {
                    self.evolve_final(columns).await?;
                }
                let (cols, keys) = (columns.clone(), keys.to_vec());
                self.call(move |c| c.upsert(&staging, &table, &cols, &keys)).await?
            }
            MergeStrategy::DeleteInsert => {
                if !self.create_final(columns).await? {
                    self.evolve_final(columns).await?;
                }
                let owned_keys = keys.to_vec();
                let deleted = self
                    .call(move |c| c.delete_matching(&staging, &table, &owned_keys))
                    .await?;
                tracing::debug!(table = %self.spec.table, rows = deleted, "Deleted rows matching staged keys");
                self.insert_from(columns, keys).await?
            }
        };

        if let Some(sql) = &self.spec.options.post_sql {
            let sql = self.render_sql(sql);
            self.call(move |t| t.execute(&sql))
                .await
                .map_err(|e| e.context("post_sql failed"))?;
        }
        Ok(merged)
    }

    async fn create_final(&self, columns: &Columns) -> Result<bool, FlowError> {
        let table = self.spec.table.clone();
        let cols = columns.clone();
        let ddl = self.spec.options.table_ddl.clone();
        self.call(move |t| t.create_table_if_not_exists(&table, &cols, ddl.as_deref()))
            .await
            .map_err(|e| e.context(format!("could not create table {}", self.spec.table)))
    }

    async fn evolve_final(&self, columns: &Columns) -> Result<(), FlowError> {
        let policy = self.spec.options.policy;
        if policy.adds_columns() {
            let (table, cols) = (self.spec.table.clone(), columns.clone());
            if self.call(move |t| t.add_missing_columns(&table, &cols)).await? {
                tracing::info!(table = %self.spec.table, "Added missing columns to target table");
            }
        }
        if policy.widens_types() {
            let (table, cols) = (self.spec.table.clone(), columns.clone());
            if self.call(move |t| t.optimize_column_type(&table, &cols)).await? {
                tracing::info!(table = %self.spec.table, "Widened target column types");
            }
        }
        Ok(())
    }

    async fn insert_from(&self, columns: &Columns, dedupe_keys: &[String]) -> Result<u64, FlowError> {
        let (staging, table) = (self.staging.clone(), self.spec.table.clone());
        let (cols, keys) = (columns.clone(), dedupe_keys.to_vec());
        self.call(move |t| t.insert_from(&staging, &table, &cols, &keys)).await
    }
}
