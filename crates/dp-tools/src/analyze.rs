//! Analyze tool: descriptive statistics, correlations, and insights

use async_trait::async_trait;
use dp_core::{Tool, ToolCall, ToolError};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::records::{self, Record, number};

/// Correlations stronger than this are called out in the insights
const STRONG_CORRELATION: f64 = 0.5;
/// Skewness beyond this is called out in the insights
const SKEW_THRESHOLD: f64 = 1.0;
const MOST_COMMON: usize = 5;

#[derive(Debug, Default, Deserialize)]
struct AnalyzeParams {
    #[serde(default)]
    target_column: Option<String>,
}

pub struct AnalyzeTool;

impl AnalyzeTool {
    pub fn new() -> Self {
        Self
    }
}

/// Adjusted Fisher-Pearson sample skewness
fn skewness(values: &[f64]) -> Option<f64> {
    let n = values.len() as f64;
    if values.len() < 3 {
        return None;
    }
    let m = records::mean(values)?;
    let m2 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
    let m3 = values.iter().map(|v| (v - m).powi(3)).sum::<f64>() / n;
    if m2 == 0.0 {
        return Some(0.0);
    }
    let g1 = m3 / m2.powf(1.5);
    Some(g1 * (n * (n - 1.0)).sqrt() / (n - 2.0))
}

struct NumericSummary {
    mean: f64,
    median: f64,
    std: Option<f64>,
    min: f64,
    max: f64,
    q1: f64,
    q3: f64,
    skew: Option<f64>,
    outliers: usize,
}

impl NumericSummary {
    fn of(values: &[f64]) -> Option<Self> {
        let sorted = records::sorted(values);
        let q1 = records::quantile(&sorted, 0.25)?;
        let q3 = records::quantile(&sorted, 0.75)?;
        let iqr = q3 - q1;
        let outliers = sorted
            .iter()
            .filter(|v| **v < q1 - 1.5 * iqr || **v > q3 + 1.5 * iqr)
            .count();

        Some(Self {
            mean: records::mean(values)?,
            median: records::quantile(&sorted, 0.5)?,
            std: records::std_dev(values),
            min: *sorted.first()?,
            max: *sorted.last()?,
            q1,
            q3,
            skew: skewness(values),
            outliers,
        })
    }

    fn to_value(&self) -> Value {
        json!({
            "mean": number(self.mean),
            "median": number(self.median),
            "std": self.std.map(number),
            "min": number(self.min),
            "max": number(self.max),
            "skew": self.skew.map(number),
            "quartiles": { "q1": number(self.q1), "q3": number(self.q3) },
        })
    }
}

fn categorical_summary(rows: &[Record], column: &str) -> Value {
    let labels = records::labels(rows, column);
    let counts = records::value_counts(&labels);
    let missing = rows.len() - labels.len();
    let most_common: Vec<Value> = counts
        .iter()
        .take(MOST_COMMON)
        .map(|(value, count)| json!({ "value": value, "count": count }))
        .collect();

    json!({
        "unique_values": counts.len(),
        "most_common": most_common,
        "missing_values": missing,
    })
}

#[async_trait]
impl Tool for AnalyzeTool {
    fn name(&self) -> &str {
        "analyze"
    }

    fn description(&self) -> &str {
        "Summarize columns, build a correlation matrix, and correlate against an optional target"
    }

    async fn invoke(&self, call: ToolCall) -> Result<Value, ToolError> {
        let rows = records::extract_records(&call.payload)?;
        if rows.is_empty() {
            return Err(ToolError::new("no_records", "nothing to analyze"));
        }

        let params: AnalyzeParams = match &call.payload["params"] {
            Value::Null => AnalyzeParams::default(),
            p => serde_json::from_value(p.clone())
                .map_err(|e| ToolError::new("invalid_params", e.to_string()))?,
        };

        let numeric = records::numeric_columns(&rows);
        let mut stats = Map::new();
        let mut insights: Vec<String> = Vec::new();

        for column in &numeric {
            let Some(summary) = NumericSummary::of(&records::numbers(&rows, column)) else {
                continue;
            };
            if let Some(skew) = summary.skew.filter(|s| s.abs() > SKEW_THRESHOLD) {
                let direction = if skew > 0.0 { "right" } else { "left" };
                insights.push(format!("{} is {}-skewed", column, direction));
            }
            if summary.outliers > 0 {
                insights.push(format!("{} has {} potential outliers", column, summary.outliers));
            }
            stats.insert(column.clone(), summary.to_value());
        }

        for column in records::categorical_columns(&rows) {
            let summary = categorical_summary(&rows, &column);
            stats.insert(column, summary);
        }

        let mut target_correlations = Map::new();
        if let Some(target) = &params.target_column {
            if !numeric.contains(target) {
                return Err(ToolError::new(
                    "invalid_params",
                    format!("target_column '{}' is not a numeric column", target),
                ));
            }

            let mut strong = Vec::new();
            for column in numeric.iter().filter(|c| *c != target) {
                let Some(r) = records::pearson(&rows, column, target) else { continue };
                if r.abs() > STRONG_CORRELATION {
                    let direction = if r > 0.0 { "positive" } else { "negative" };
                    strong.push(format!("{} has a {} correlation of {:.2}", column, direction, r.abs()));
                }
                target_correlations.insert(column.clone(), number(r));
            }

            if !strong.is_empty() {
                insights.push(format!("Strong correlations with {}: {}", target, strong.join("; ")));
            }
        }

        let matrix = if numeric.len() > 1 {
            Value::Object(records::correlation_matrix(&rows, &numeric))
        } else {
            Value::Object(Map::new())
        };

        tracing::debug!(
            rows = rows.len(),
            columns = stats.len(),
            insights = insights.len(),
            "Analyzed records"
        );

        Ok(json!({
            "rows": rows.len(),
            "records": rows,
            "basic_stats": stats,
            "correlations": {
                "matrix": matrix,
                "target_correlations": target_correlations,
            },
            "insights": insights,
        }))
    }
}

impl Default for AnalyzeTool {
    fn default() -> Self {
        Self::new()
    }
}
