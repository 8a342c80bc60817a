//! Clean tool: impute missing values and clip outliers

use std::collections::BTreeMap;

use async_trait::async_trait;
use dp_core::{Tool, ToolCall, ToolError};
use serde_json::{Value, json};

use crate::records::{self, Record};

/// Tukey fence multiplier
const IQR_FACTOR: f64 = 1.5;

pub struct CleanTool;

impl CleanTool {
    pub fn new() -> Self {
        Self
    }
}

fn is_missing(record: &Record, column: &str) -> bool {
    matches!(record.get(column), None | Some(Value::Null))
}

/// Fill missing cells: column mean for numeric columns, mode otherwise
fn impute(rows: &mut [Record]) -> BTreeMap<String, usize> {
    let mut imputed = BTreeMap::new();

    for column in records::columns(rows) {
        let fill = if records::is_numeric(rows, &column) {
            records::mean(&records::numbers(rows, &column)).map(records::number)
        } else {
            mode(rows, &column)
        };
        let Some(fill) = fill else { continue };

        let mut count = 0;
        for row in rows.iter_mut() {
            if is_missing(row, &column) {
                row.insert(column.clone(), fill.clone());
                count += 1;
            }
        }
        if count > 0 {
            imputed.insert(column, count);
        }
    }

    imputed
}

/// Most frequent non-null value, first seen on ties
fn mode(rows: &[Record], column: &str) -> Option<Value> {
    let mut counts: Vec<(&Value, usize)> = Vec::new();
    for value in rows.iter().filter_map(|r| r.get(column)).filter(|v| !v.is_null()) {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value, 1)),
        }
    }
    let best = counts.iter().map(|(_, n)| *n).max()?;
    counts.into_iter().find(|(_, n)| *n == best).map(|(v, _)| v.clone())
}

/// Clip numeric columns to `[Q1 - 1.5*IQR, Q3 + 1.5*IQR]`
fn clip(rows: &mut [Record]) -> BTreeMap<String, usize> {
    let mut clipped = BTreeMap::new();

    for column in records::numeric_columns(rows) {
        let sorted = records::sorted(&records::numbers(rows, &column));
        let (Some(q1), Some(q3)) = (records::quantile(&sorted, 0.25), records::quantile(&sorted, 0.75)) else {
            continue;
        };
        let iqr = q3 - q1;
        let (low, high) = (q1 - IQR_FACTOR * iqr, q3 + IQR_FACTOR * iqr);

        let mut count = 0;
        for row in rows.iter_mut() {
            let Some(v) = row.get(&column).and_then(Value::as_f64) else { continue };
            let bounded = v.clamp(low, high);
            if bounded != v {
                row.insert(column.clone(), records::number(bounded));
                count += 1;
            }
        }
        if count > 0 {
            clipped.insert(column, count);
        }
    }

    clipped
}

#[async_trait]
impl Tool for CleanTool {
    fn name(&self) -> &str {
        "clean"
    }

    fn description(&self) -> &str {
        "Impute missing values (mean or mode) and clip numeric outliers to the IQR fences"
    }

    async fn invoke(&self, call: ToolCall) -> Result<Value, ToolError> {
        let mut rows = records::extract_records(&call.payload)?;

        let imputed = impute(&mut rows);
        let clipped = clip(&mut rows);

        tracing::debug!(rows = rows.len(), ?imputed, ?clipped, "Cleaned records");

        Ok(json!({
            "records": rows,
            "report": {
                "imputed": imputed,
                "clipped": clipped,
            },
        }))
    }
}

impl Default for CleanTool {
    fn default() -> Self {
        Self::new()
    }
}
