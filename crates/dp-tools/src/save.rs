//! Save tool: write processed records to disk

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dp_core::{Tool, ToolCall, ToolError};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::fs;

use crate::records::{self, Record};

/// Where records go when `params.save_path` is not given
pub const DEFAULT_SAVE_PATH: &str = "output/processed_data.csv";

#[derive(Debug, Default, Deserialize)]
struct SaveParams {
    #[serde(default)]
    save_path: Option<PathBuf>,
}

/// Writes the latest records as `.csv`, `.json`, or `.jsonl` and passes them on
pub struct SaveTool;

impl SaveTool {
    pub fn new() -> Self {
        Self
    }
}

fn io_error(path: &Path, e: impl std::fmt::Display) -> ToolError {
    ToolError::new("io_error", format!("Failed to write '{}': {}", path.display(), e))
}

fn encode(path: &Path, rows: &[Record]) -> Result<Vec<u8>, ToolError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("csv") => {
            let columns = records::columns(rows);
            let mut writer = csv::Writer::from_writer(Vec::new());
            writer.write_record(&columns).map_err(|e| io_error(path, e))?;
            for row in rows {
                writer
                    .write_record(columns.iter().map(|c| records::cell_text(row.get(c))))
                    .map_err(|e| io_error(path, e))?;
            }
            writer.into_inner().map_err(|e| io_error(path, e))
        }
        Some("json") => serde_json::to_vec_pretty(rows).map_err(|e| io_error(path, e)),
        Some("jsonl") => {
            let mut out = Vec::new();
            for row in rows {
                serde_json::to_writer(&mut out, row).map_err(|e| io_error(path, e))?;
                out.push(b'\n');
            }
            Ok(out)
        }
        _ => Err(ToolError::new(
            "unsupported_format",
            format!("'{}' is not a .csv, .json, or .jsonl path", path.display()),
        )),
    }
}

#[async_trait]
impl Tool for SaveTool {
    fn name(&self) -> &str {
        "save"
    }

    fn description(&self) -> &str {
        "Write processed records to a .csv, .json, or .jsonl file"
    }

    async fn invoke(&self, call: ToolCall) -> Result<Value, ToolError> {
        let rows = records::extract_records(&call.payload)?;
        let params: SaveParams = match &call.payload["params"] {
            Value::Null => SaveParams::default(),
            p => serde_json::from_value(p.clone())
                .map_err(|e| ToolError::new("invalid_params", e.to_string()))?,
        };
        let path = params
            .save_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SAVE_PATH));

        let bytes = encode(&path, &rows)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| io_error(&path, e))?;
        }
        fs::write(&path, &bytes).await.map_err(|e| io_error(&path, e))?;

        tracing::debug!(path = %path.display(), rows = rows.len(), bytes = bytes.len(), "Saved records");

        Ok(json!({
            "path": path.display().to_string(),
            "rows": rows.len(),
            "records": rows,
        }))
    }
}

impl Default for SaveTool {
    fn default() -> Self {
        Self::new()
    }
}
