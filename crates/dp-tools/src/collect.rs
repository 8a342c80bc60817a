//! Collect tool: load records from a CSV, JSON, or JSONL file

use std::path::Path;

use async_trait::async_trait;
use dp_core::{Tool, ToolCall, ToolError};
use serde_json::{Value, json};
use tokio::fs;

use crate::records::{self, Record};

/// Loads records from `params.source` or passes `params.records` through
pub struct CollectTool;

impl CollectTool {
    pub fn new() -> Self {
        Self
    }

    async fn load(path: &str) -> Result<Vec<Record>, ToolError> {
        let extension = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        if !matches!(extension.as_deref(), Some("csv") | Some("json") | Some("jsonl")) {
            return Err(ToolError::new(
                "unsupported_format",
                format!("'{}' is not a .csv, .json, or .jsonl file", path),
            ));
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            let kind = if e.kind() == std::io::ErrorKind::NotFound {
                "not_found"
            } else {
                "io_error"
            };
            ToolError::new(kind, format!("Failed to read '{}': {}", path, e))
        })?;

        let parse_error = |e: serde_json::Error| ToolError::new("parse_error", format!("'{}': {}", path, e));

        if extension.as_deref() == Some("csv") {
            return parse_csv(&content).map_err(|e| ToolError::new("parse_error", format!("'{}': {}", path, e)));
        }

        if extension.as_deref() == Some("jsonl") {
            let mut rows = Vec::new();
            for (n, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let value: Value = serde_json::from_str(line).map_err(parse_error)?;
                match value {
                    Value::Object(row) => rows.push(row),
                    _ => {
                        return Err(ToolError::new(
                            "parse_error",
                            format!("'{}' line {} is not an object", path, n + 1),
                        ));
                    }
                }
            }
            Ok(rows)
        } else {
            let value: Value = serde_json::from_str(&content).map_err(parse_error)?;
            records::to_records(&value).map_err(|e| ToolError::new("parse_error", e.message))
        }
    }
}

/// Header row names the columns; cells are typed with [`records::parse_cell`]
fn parse_csv(content: &str) -> Result<Vec<Record>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(content.as_bytes());
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for row in reader.records() {
        let row = row?;
        let record: Record = headers
            .iter()
            .zip(row.iter())
            .map(|(column, cell)| (column.to_string(), records::parse_cell(cell)))
            .collect();
        rows.push(record);
    }
    Ok(rows)
}

#[async_trait]
impl Tool for CollectTool {
    fn name(&self) -> &str {
        "collect"
    }

    fn description(&self) -> &str {
        "Load records from a .csv, .json array, or .jsonl file"
    }

    async fn invoke(&self, call: ToolCall) -> Result<Value, ToolError> {
        let params = &call.payload["params"];

        let rows = match params["source"].as_str() {
            Some(source) => {
                tracing::debug!(source = %source, "Collecting records");
                Self::load(source).await?
            }
            None => records::extract_records(&call.payload)?,
        };

        if rows.is_empty() {
            return Err(ToolError::new("no_records", "source contains no records"));
        }

        let columns = records::columns(&rows);
        Ok(json!({
            "records": rows,
            "rows": rows.len(),
            "columns": columns,
        }))
    }
}

impl Default for CollectTool {
    fn default() -> Self {
        Self::new()
    }
}
