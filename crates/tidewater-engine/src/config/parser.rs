//! Task YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::TaskConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| {
            missing.push(cap[1].to_string());
            String::new()
        })
    });
    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }
    Ok(result.into_owned())
}

/// Parse a task YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if substitution fails or the YAML does not describe a
/// task.
pub fn parse_task_str(yaml: &str) -> Result<TaskConfig> {
    let substituted = substitute_env_vars(yaml)?;
    serde_yaml::from_str(&substituted).context("Failed to parse task YAML")
}

/// Parse a task YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn parse_task(path: &Path) -> Result<TaskConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read task file: {}", path.display()))?;
    parse_task_str(&content)
}
