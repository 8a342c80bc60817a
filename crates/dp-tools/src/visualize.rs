//! Visualize tool: chart specifications from records
//!
//! Charts are returned as data (bins, summaries, counts, points) for a
//! renderer downstream; nothing is drawn here.

use async_trait::async_trait;
use dp_core::{Tool, ToolCall, ToolError};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::records::{self, Record, number};

const DEFAULT_BINS: usize = 10;
/// Column caps for the batch mode (no `plot_type`)
const BATCH_DISTRIBUTIONS: usize = 5;
const BATCH_BARS: usize = 3;
const BATCH_SCATTER_COLUMNS: usize = 3;
/// Batch mode adds a heatmap above this many numeric columns
const BATCH_HEATMAP_MIN: usize = 2;

#[derive(Debug, Default, Deserialize)]
struct VisualizeParams {
    #[serde(default)]
    plot_type: Option<String>,
    #[serde(default)]
    x_column: Option<String>,
    #[serde(default)]
    y_column: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    bins: Option<usize>,
}

pub struct VisualizeTool;

impl VisualizeTool {
    pub fn new() -> Self {
        Self
    }
}

fn invalid(message: impl Into<String>) -> ToolError {
    ToolError::new("invalid_params", message)
}

fn numeric_column(rows: &[Record], requested: Option<&String>) -> Result<String, ToolError> {
    match requested {
        Some(column) if records::is_numeric(rows, column) => Ok(column.clone()),
        Some(column) => Err(invalid(format!("column '{}' is not numeric", column))),
        None => records::numeric_columns(rows)
            .into_iter()
            .next()
            .ok_or_else(|| invalid("no numeric column to plot")),
    }
}

fn histogram(rows: &[Record], column: &str, bins: usize, title: Option<&str>) -> Value {
    let values = records::numbers(rows, column);
    let sorted = records::sorted(&values);
    let (min, max) = match (sorted.first(), sorted.last()) {
        (Some(min), Some(max)) => (*min, *max),
        _ => (0.0, 0.0),
    };
    let width = if max > min { (max - min) / bins as f64 } else { 1.0 };

    let mut counts = vec![0usize; bins];
    for v in &values {
        let i = (((v - min) / width) as usize).min(bins - 1);
        counts[i] += 1;
    }
    let edges: Vec<Value> = (0..=bins).map(|i| number(min + width * i as f64)).collect();

    json!({
        "type": "histogram",
        "title": title.map(str::to_string).unwrap_or_else(|| format!("Distribution of {}", column)),
        "column": column,
        "bin_edges": edges,
        "counts": counts,
    })
}

fn boxplot(rows: &[Record], column: &str, title: Option<&str>) -> Result<Value, ToolError> {
    let sorted = records::sorted(&records::numbers(rows, column));
    let q = |p: f64| records::quantile(&sorted, p).ok_or_else(|| invalid(format!("column '{}' is empty", column)));
    let (q1, median, q3) = (q(0.25)?, q(0.5)?, q(0.75)?);
    let iqr = q3 - q1;
    let (low, high) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);

    let inside: Vec<f64> = sorted.iter().copied().filter(|v| *v >= low && *v <= high).collect();
    let outliers: Vec<Value> = sorted
        .iter()
        .copied()
        .filter(|v| *v < low || *v > high)
        .map(number)
        .collect();

    Ok(json!({
        "type": "boxplot",
        "title": title.map(str::to_string).unwrap_or_else(|| format!("Box plot of {}", column)),
        "column": column,
        "min": inside.first().copied().map(number),
        "q1": number(q1),
        "median": number(median),
        "q3": number(q3),
        "max": inside.last().copied().map(number),
        "outliers": outliers,
    }))
}

fn bar(rows: &[Record], column: &str, title: Option<&str>) -> Value {
    let counts = records::value_counts(&records::labels(rows, column));
    let (categories, values): (Vec<String>, Vec<usize>) = counts.into_iter().unzip();

    json!({
        "type": "bar",
        "title": title.map(str::to_string).unwrap_or_else(|| format!("Counts of {}", column)),
        "column": column,
        "categories": categories,
        "counts": values,
    })
}

fn scatter(rows: &[Record], x: &str, y: &str, title: Option<&str>) -> Value {
    let points: Vec<Value> = rows
        .iter()
        .filter_map(|r| Some(json!([r.get(x)?.as_f64()?, r.get(y)?.as_f64()?])))
        .collect();

    json!({
        "type": "scatter",
        "title": title.map(str::to_string).unwrap_or_else(|| format!("{} vs {}", y, x)),
        "x_column": x,
        "y_column": y,
        "points": points,
    })
}

fn correlation(rows: &[Record], title: Option<&str>) -> Result<Value, ToolError> {
    let columns = records::numeric_columns(rows);
    if columns.len() < 2 {
        return Err(invalid("correlation heatmaps need at least two numeric columns"));
    }

    Ok(json!({
        "type": "correlation",
        "title": title.unwrap_or("Correlation matrix"),
        "columns": columns,
        "matrix": records::correlation_matrix(rows, &columns),
    }))
}

/// Heatmap, per-column distributions, category counts, then pairwise scatters
fn batch(rows: &[Record], bins: usize) -> Result<Vec<Value>, ToolError> {
    let numeric = records::numeric_columns(rows);
    let mut charts = Vec::new();

    if numeric.len() > BATCH_HEATMAP_MIN {
        charts.push(correlation(rows, None)?);
    }
    for column in numeric.iter().take(BATCH_DISTRIBUTIONS) {
        charts.push(histogram(rows, column, bins, None));
        charts.push(boxplot(rows, column, None)?);
    }
    for column in records::categorical_columns(rows).iter().take(BATCH_BARS) {
        charts.push(bar(rows, column, None));
    }
    let paired = &numeric[..numeric.len().min(BATCH_SCATTER_COLUMNS)];
    for (i, x) in paired.iter().enumerate() {
        for y in &paired[i + 1..] {
            charts.push(scatter(rows, x, y, None));
        }
    }
    Ok(charts)
}

fn charts(rows: &[Record], params: &VisualizeParams) -> Result<Vec<Value>, ToolError> {
    let bins = params.bins.unwrap_or(DEFAULT_BINS);
    if bins == 0 {
        return Err(invalid("bins must be positive"));
    }
    let title = params.title.as_deref();

    let Some(plot_type) = params.plot_type.as_deref() else {
        return batch(rows, bins);
    };

    let chart = match plot_type {
        "histogram" => {
            let column = numeric_column(rows, params.x_column.as_ref())?;
            histogram(rows, &column, bins, title)
        }
        "boxplot" => {
            let column = numeric_column(rows, params.x_column.as_ref())?;
            boxplot(rows, &column, title)?
        }
        "bar" => {
            let column = match &params.x_column {
                Some(column) => column.clone(),
                None => records::categorical_columns(rows)
                    .into_iter()
                    .next()
                    .ok_or_else(|| invalid("no categorical column to plot"))?,
            };
            bar(rows, &column, title)
        }
        "scatter" => {
            let (Some(x), Some(y)) = (&params.x_column, &params.y_column) else {
                return Err(invalid("scatter plots need x_column and y_column"));
            };
            let x = numeric_column(rows, Some(x))?;
            let y = numeric_column(rows, Some(y))?;
            scatter(rows, &x, &y, title)
        }
        "correlation" => correlation(rows, title)?,
        other => return Err(invalid(format!("unsupported plot_type '{}'", other))),
    };

    Ok(vec![chart])
}

#[async_trait]
impl Tool for VisualizeTool {
    fn name(&self) -> &str {
        "visualize"
    }

    fn description(&self) -> &str {
        "Build histogram, boxplot, bar, scatter, or correlation chart specifications"
    }

    async fn invoke(&self, call: ToolCall) -> Result<Value, ToolError> {
        let rows = records::extract_records(&call.payload)?;
        let params: VisualizeParams = match &call.payload["params"] {
            Value::Null => VisualizeParams::default(),
            p => serde_json::from_value(p.clone()).map_err(|e| invalid(e.to_string()))?,
        };

        let charts = charts(&rows, &params)?;
        tracing::debug!(plot_type = ?params.plot_type, charts = charts.len(), "Built charts");

        Ok(json!({ "charts": charts }))
    }
}

impl Default for VisualizeTool {
    fn default() -> Self {
        Self::new()
    }
}
