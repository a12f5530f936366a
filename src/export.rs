//! Flattened tabular export of leads.
//!
//! Each lead becomes one flat `key → value` row. Nested objects (`score`,
//! `metadata`) are joined with `_` (`score_total`, `metadata_superhost`) and
//! the header is the sorted union of every row's keys.

use crate::errors::LeadGenError;
use crate::models::{ExportFormat, Lead};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// One flattened lead. Absent fields have no key.
pub type FlatRow = BTreeMap<String, String>;

pub fn flatten_lead(lead: &Lead) -> Result<FlatRow, LeadGenError> {
    let value = serde_json::to_value(lead)
        .map_err(|e| LeadGenError::Internal(format!("Failed to serialize lead: {}", e)))?;
    let mut row = FlatRow::new();
    flatten_value(None, &value, &mut row);
    Ok(row)
}

fn flatten_value(prefix: Option<&str>, value: &Value, row: &mut FlatRow) {
    match value {
        Value::Null => {}
        Value::Object(map) => flatten_object(prefix, map, row),
        Value::Array(items) => {
            if let Some(key) = prefix {
                if !items.is_empty() {
                    row.insert(key.to_string(), array_cell(items));
                }
            }
        }
        scalar => {
            if let Some(key) = prefix {
                row.insert(key.to_string(), scalar_cell(scalar));
            }
        }
    }
}

fn flatten_object(prefix: Option<&str>, map: &Map<String, Value>, row: &mut FlatRow) {
    for (key, value) in map {
        let key = match prefix {
            Some(p) => format!("{}_{}", p, key),
            None => key.clone(),
        };
        flatten_value(Some(&key), value, row);
    }
}

fn scalar_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Scalar lists are joined with "; ", anything else stays JSON.
fn array_cell(items: &[Value]) -> String {
    if items.iter().all(|v| !v.is_object() && !v.is_array()) {
        items
            .iter()
            .filter(|v| !v.is_null())
            .map(scalar_cell)
            .collect::<Vec<_>>()
            .join("; ")
    } else {
        Value::Array(items.to_vec()).to_string()
    }
}

/// Serializes `leads`. Zero leads yield zero bytes in every format.
pub fn export(leads: &[Lead], format: ExportFormat) -> Result<Vec<u8>, LeadGenError> {
    if leads.is_empty() {
        return Ok(Vec::new());
    }

    let rows = leads
        .iter()
        .map(flatten_lead)
        .collect::<Result<Vec<_>, _>>()?;

    let bytes = match format {
        ExportFormat::Csv => to_csv(&rows)?,
        ExportFormat::Json => serde_json::to_vec_pretty(&rows)
            .map_err(|e| LeadGenError::Internal(format!("Failed to serialize export: {}", e)))?,
    };

    tracing::info!(leads = leads.len(), format = %format, bytes = bytes.len(), "Leads exported");
    Ok(bytes)
}

fn to_csv(rows: &[FlatRow]) -> Result<Vec<u8>, LeadGenError> {
    let header: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&header)
        .map_err(|e| LeadGenError::Internal(format!("Failed to write CSV header: {}", e)))?;

    for row in rows {
        let record = header
            .iter()
            .map(|key| row.get(*key).map(String::as_str).unwrap_or(""));
        writer
            .write_record(record)
            .map_err(|e| LeadGenError::Internal(format!("Failed to write CSV row: {}", e)))?;
    }

    writer
        .into_inner()
        .map_err(|e| LeadGenError::Internal(format!("Failed to flush CSV: {}", e)))
}
