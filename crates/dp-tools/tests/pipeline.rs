//! End-to-end runs of the default pipeline over the reference tools

use std::io::Write;
use std::sync::Arc;

use serde_json::json;
use tempfile::{Builder, TempDir};

use dp_core::{Config, Registry, RunStatus, SubtaskStatus, Task, ToolManager, WorkflowManager};

fn manager() -> WorkflowManager {
    let registry = Arc::new(Registry::from_config(Config::default_pipeline()).unwrap());
    let mut tools = ToolManager::new();
    dp_tools::register_default_tools(&mut tools);
    registry.configure_tools(&mut tools);
    WorkflowManager::new(registry, Arc::new(tools)).unwrap()
}

#[tokio::test]
async fn test_full_pipeline_from_jsonl() {
    let mut file = Builder::new().suffix(".jsonl").tempfile().unwrap();
    for (price, units, region) in [(10, 1, "north"), (20, 2, "south"), (30, 3, "north"), (40, 4, "east")] {
        writeln!(file, "{}", json!({"price": price, "units": units, "region": region})).unwrap();
    }
    writeln!(file, "{}", json!({"price": null, "units": 5, "region": "north"})).unwrap();

    let task = Task::new("load the sales file, clean it, analyze correlations and plot charts")
        .with_params(json!({
            "source": file.path().to_str().unwrap(),
            "target_column": "units",
        }));

    let result = manager().run(task).await;

    assert_eq!(result.status, RunStatus::Success, "{:?}", result.failure);
    let order: Vec<&str> = result.outputs.iter().map(|o| o.capability.as_str()).collect();
    assert_eq!(order, vec!["collect", "clean", "analyze", "visualize"]);

    let clean = result.by_capability("clean").unwrap().output.as_ref().unwrap();
    assert_eq!(clean["report"]["imputed"]["price"], 1);

    let analyze = result.by_capability("analyze").unwrap().output.as_ref().unwrap();
    assert!(analyze["correlations"]["target_correlations"]["price"].as_f64().unwrap() > 0.5);
    assert_eq!(analyze["correlations"]["matrix"]["units"]["units"], json!(1.0));

    let visualize = result.by_capability("visualize").unwrap().output.as_ref().unwrap();
    let types: Vec<&str> = visualize["charts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["type"].as_str().unwrap())
        .collect();
    assert_eq!(types, vec!["histogram", "boxplot", "histogram", "boxplot", "bar", "scatter"]);
}

#[tokio::test]
async fn test_csv_source_is_typed_and_analyzed() {
    let mut file = Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(file, "price,units,region").unwrap();
    writeln!(file, "10,1,north").unwrap();
    writeln!(file, "20.5,2,south").unwrap();
    writeln!(file, ",3,north").unwrap();

    let task = Task::new("load the sales csv and analyze it")
        .with_params(json!({"source": file.path().to_str().unwrap()}));

    let result = manager().run(task).await;

    assert_eq!(result.status, RunStatus::Success, "{:?}", result.failure);
    let collect = result.by_capability("collect").unwrap().output.as_ref().unwrap();
    assert_eq!(collect["records"][1]["price"], json!(20.5));
    assert!(collect["records"][2]["price"].is_null());

    let analyze = result.by_capability("analyze").unwrap().output.as_ref().unwrap();
    assert_eq!(analyze["basic_stats"]["units"]["mean"], json!(2.0));
    assert_eq!(analyze["basic_stats"]["region"]["unique_values"], 2);
}

#[tokio::test]
async fn test_save_writes_cleaned_records_before_analysis() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("sales.jsonl");
    std::fs::write(
        &source,
        "{\"price\": 10, \"region\": \"north\"}\n{\"price\": null, \"region\": \"south\"}\n{\"price\": 30, \"region\": \"north\"}\n",
    )
    .unwrap();
    let target = dir.path().join("out/processed.csv");

    let task = Task::new("load the sales file, clean it, save the result and analyze it").with_params(json!({
        "source": source.to_str().unwrap(),
        "save_path": target.to_str().unwrap(),
    }));

    let result = manager().run(task).await;

    assert_eq!(result.status, RunStatus::Success, "{:?}", result.failure);
    let order: Vec<&str> = result.outputs.iter().map(|o| o.capability.as_str()).collect();
    assert_eq!(order, vec!["collect", "clean", "save", "analyze"]);

    let save = result.by_capability("save").unwrap().output.as_ref().unwrap();
    assert_eq!(save["rows"], 3);
    let written = std::fs::read_to_string(&target).unwrap();
    assert_eq!(written.lines().next(), Some("price,region"));
    assert_eq!(written.lines().count(), 4);
    assert!(!written.lines().any(|l| l.starts_with(',')), "{}", written);

    let analyze = result.by_capability("analyze").unwrap().output.as_ref().unwrap();
    assert_eq!(analyze["rows"], 3);
}

#[tokio::test]
async fn test_missing_source_fails_and_skips_downstream() {
    let task = Task::new("x")
        .with_requires(["collect", "analyze"])
        .with_params(json!({"source": "/nonexistent/sales.json"}));

    let result = manager().run(task).await;

    assert_eq!(result.status, RunStatus::PartialFailure);
    let collect = result.by_capability("collect").unwrap();
    assert_eq!(collect.status, SubtaskStatus::Failed);
    assert_eq!(collect.error.as_ref().unwrap().tool_kind.as_deref(), Some("not_found"));
    assert_eq!(result.by_capability("analyze").unwrap().status, SubtaskStatus::Skipped);
}

#[tokio::test]
async fn test_bad_plot_type_is_rejected_by_the_agent() {
    let task = Task::new("x")
        .with_requires(["visualize"])
        .with_params(json!({"records": [{"v": 1}], "plot_type": "pie"}));

    let result = manager().run(task).await;

    assert_eq!(result.status, RunStatus::PartialFailure);
    let report = result.by_capability("visualize").unwrap();
    assert_eq!(report.error.as_ref().unwrap().kind, dp_core::ErrorKind::InvalidTask);
}
