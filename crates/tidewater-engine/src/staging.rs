//! Staging table naming.

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::connector::{TableName, TargetCapabilities};

const TRUNCATED_LEN: usize = 24;

/// Staging table for `target`: `<table>_tmp`, upper-cased for stores with
/// upper-case identifiers. Stores with an identifier length limit get the
/// base name cut to 24 characters plus a random 2-character suffix, so
/// concurrent loads of long names do not collide.
///
/// `override_name` wins when set.
#[must_use]
pub fn staging_table_name(target: &TableName, caps: &TargetCapabilities, override_name: Option<&str>) -> TableName {
    if let Some(name) = override_name.map(str::trim).filter(|n| !n.is_empty()) {
        return match TableName::parse(name) {
            Ok(parsed) if parsed.schema.is_some() => parsed,
            _ => target.with_name(name),
        };
    }
    let suffix = if caps.upper_case_identifiers { "_TMP" } else { "_tmp" };
    let name = match caps.max_identifier_len {
        Some(_) => {
            let base: String = target.name.chars().take(TRUNCATED_LEN).collect();
            let random: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(2)
                .map(|b| char::from(b).to_ascii_lowercase())
                .collect();
            format!("{base}{suffix}{random}")
        }
        None => format!("{}{suffix}", target.name),
    };
    target.with_name(if caps.upper_case_identifiers {
        name.to_uppercase()
    } else {
        name
    })
}
