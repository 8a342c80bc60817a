//! Tabular helpers shared by the data tools
//!
//! A table is a list of JSON objects. A column is numeric when every
//! non-null value in it is a JSON number; otherwise it is categorical.

use dp_core::ToolError;
use serde_json::{Map, Value};

pub type Record = Map<String, Value>;

/// Pull records out of a tool payload
///
/// The most recent upstream input that carries records wins (either
/// `{"records": [...]}` or a bare array); otherwise `params.records`.
pub fn extract_records(payload: &Value) -> Result<Vec<Record>, ToolError> {
    let inputs = payload["inputs"].as_array().map(Vec::as_slice).unwrap_or(&[]);
    for input in inputs.iter().rev() {
        if let Some(records) = input.get("records") {
            return to_records(records);
        }
        if input.is_array() {
            return to_records(input);
        }
    }

    match payload["params"].get("records") {
        Some(records) => to_records(records),
        None => Err(ToolError::new("no_records", "no records in upstream inputs or params")),
    }
}

pub fn to_records(value: &Value) -> Result<Vec<Record>, ToolError> {
    let rows = value
        .as_array()
        .ok_or_else(|| ToolError::new("invalid_records", "records must be an array"))?;

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            row.as_object()
                .cloned()
                .ok_or_else(|| ToolError::new("invalid_records", format!("record {} is not an object", i)))
        })
        .collect()
}

/// Column names in first-seen order
pub fn columns(records: &[Record]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
    }
    names
}

pub fn is_numeric(records: &[Record], column: &str) -> bool {
    let mut seen = false;
    for value in records.iter().filter_map(|r| r.get(column)) {
        match value {
            Value::Null => {}
            Value::Number(_) => seen = true,
            _ => return false,
        }
    }
    seen
}

pub fn numeric_columns(records: &[Record]) -> Vec<String> {
    columns(records)
        .into_iter()
        .filter(|c| is_numeric(records, c))
        .collect()
}

pub fn categorical_columns(records: &[Record]) -> Vec<String> {
    columns(records)
        .into_iter()
        .filter(|c| !is_numeric(records, c))
        .collect()
}

/// Non-null numeric values of a column
pub fn numbers(records: &[Record], column: &str) -> Vec<f64> {
    records
        .iter()
        .filter_map(|r| r.get(column).and_then(Value::as_f64))
        .collect()
}

/// Non-null values of a column rendered as category labels
pub fn labels(records: &[Record], column: &str) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| match r.get(column) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        })
        .collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1)
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

/// Quantile with linear interpolation between closest ranks; `sorted` must be sorted
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

/// Label counts, most frequent first; ties keep first-seen order
pub fn value_counts(labels: &[String]) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for label in labels {
        match counts.iter_mut().find(|(l, _)| l == label) {
            Some((_, n)) => *n += 1,
            None => counts.push((label.clone(), 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

/// Pearson correlation over rows where both columns are numeric
pub fn pearson(records: &[Record], x: &str, y: &str) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = records
        .iter()
        .filter_map(|r| Some((r.get(x)?.as_f64()?, r.get(y)?.as_f64()?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }

    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let cov: f64 = pairs.iter().map(|(a, b)| (a - mx) * (b - my)).sum();
    let sx: f64 = pairs.iter().map(|(a, _)| (a - mx).powi(2)).sum::<f64>().sqrt();
    let sy: f64 = pairs.iter().map(|(_, b)| (b - my).powi(2)).sum::<f64>().sqrt();
    if sx == 0.0 || sy == 0.0 {
        return None;
    }
    Some(cov / (sx * sy))
}

/// Pairwise Pearson matrix, `{col: {col: r}}`; `null` where undefined
pub fn correlation_matrix(records: &[Record], columns: &[String]) -> Map<String, Value> {
    columns
        .iter()
        .map(|x| {
            let row: Map<String, Value> = columns
                .iter()
                .map(|y| {
                    let r = if x == y { Some(1.0) } else { pearson(records, x, y) };
                    (y.clone(), r.map(number).unwrap_or(Value::Null))
                })
                .collect();
            (x.clone(), Value::Object(row))
        })
        .collect()
}

/// Typed JSON value for a text cell: empty is null, numeric text is a number
pub fn parse_cell(cell: &str) -> Value {
    let cell = cell.trim();
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = cell.parse::<i64>() {
        return Value::from(n);
    }
    match cell.parse::<f64>() {
        Ok(f) if f.is_finite() => number(f),
        _ => Value::String(cell.to_string()),
    }
}

/// Text form of a cell for flat formats; null becomes empty
pub fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// JSON number from an `f64`, `null` for non-finite values
pub fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
