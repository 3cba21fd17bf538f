//! Flattening of records into CSV rows.
//!
//! Nested objects become `parent_child` columns, lists become a JSON string
//! (empty string for an empty list) and nulls become empty cells.

use std::collections::{BTreeMap, BTreeSet};

use harvest_core::error::AppError;
use harvest_core::models::ScrapedRecord;
use serde_json::Value;

pub type FlatRow = BTreeMap<String, String>;

pub fn flatten_record(record: &ScrapedRecord) -> Result<FlatRow, AppError> {
    let value = serde_json::to_value(record)?;
    let mut row = FlatRow::new();
    if let Value::Object(map) = value {
        for (key, value) in map {
            flatten_into(&mut row, key, value);
        }
    }
    Ok(row)
}

fn flatten_into(row: &mut FlatRow, key: String, value: Value) {
    match value {
        Value::Object(map) => {
            for (child, value) in map {
                flatten_into(row, format!("{key}_{child}"), value);
            }
        }
        Value::Array(items) if items.is_empty() => {
            row.insert(key, String::new());
        }
        Value::Array(_) => {
            row.insert(key, value.to_string());
        }
        Value::Null => {
            row.insert(key, String::new());
        }
        Value::String(s) => {
            row.insert(key, s);
        }
        other => {
            row.insert(key, other.to_string());
        }
    }
}

/// Sorted union of the keys of every row.
pub fn header(rows: &[FlatRow]) -> Vec<String> {
    rows.iter()
        .flat_map(|row| row.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
