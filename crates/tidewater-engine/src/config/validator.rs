//! Semantic validation for parsed task configuration values.

use anyhow::{bail, Result};

use tidewater_types::LoadMode;

use crate::config::types::{parse_range, ConnUrl, TaskConfig};

/// Validate a parsed task configuration, reporting every problem at once.
///
/// # Errors
///
/// Returns an error listing all validation failures.
pub fn validate_task(config: &TaskConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported task version '{}', expected '1.0'",
            config.version
        ));
    }
    if config.task.trim().is_empty() {
        errors.push("Task name must not be empty".to_string());
    }

    let source = ConnUrl::parse(&config.source.conn);
    if let Err(e) = &source {
        errors.push(format!("source: {e}"));
    }
    let target = ConnUrl::parse(&config.target.conn);
    if let Err(e) = &target {
        errors.push(format!("target: {e}"));
    }
    if matches!(&source, Ok(url) if !url.is_file()) && config.source.stream.as_deref().map_or(true, |s| s.trim().is_empty()) {
        errors.push("source: stream is required for database sources".to_string());
    }
    let db_target = matches!(&target, Ok(url) if !url.is_file());
    let object = config.target.object.as_deref().map(str::trim).unwrap_or_default();
    if db_target && object.is_empty() {
        errors.push("target: object is required for database targets".to_string());
    }

    let has_update_key = config.source.update_key.as_deref().is_some_and(|k| !k.trim().is_empty());
    let has_primary_key = !config.source.primary_key.is_empty();
    match config.mode {
        LoadMode::Incremental if !has_update_key && !has_primary_key => {
            errors.push("Mode 'incremental' requires an update_key or a primary_key".to_string());
        }
        LoadMode::Backfill => {
            if !has_update_key || !has_primary_key {
                errors.push("Mode 'backfill' requires both an update_key and a primary_key".to_string());
            }
            match config.source.options.range.as_deref() {
                None => errors.push("Mode 'backfill' requires a range \"start,end\"".to_string()),
                Some(range) => {
                    if let Err(e) = parse_range(range) {
                        errors.push(e.to_string());
                    }
                }
            }
        }
        _ => {}
    }

    if let Some(ddl) = &config.target.options.table_ddl {
        let table = object.rsplit('.').next().unwrap_or(object);
        if !object.is_empty() && !ddl.to_lowercase().contains(&table.to_lowercase()) {
            errors.push(format!("target: table_ddl must reference the target object '{object}'"));
        }
    }

    let res = &config.resources;
    for (name, value) in [
        ("sample_size", res.sample_size),
        ("safe_min_rows", res.safe_min_rows),
        ("batch_rows", res.batch_rows),
        ("queue_batches", res.queue_batches),
        ("writers", res.writers),
    ] {
        if value == 0 {
            errors.push(format!("{name} must be at least 1"));
        }
    }
    if res.checksum_max_rows == 0 {
        errors.push("checksum_max_rows must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Task validation failed:\n  - {}", errors.join("\n  - "));
    }
}
