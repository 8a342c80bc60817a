//! End-to-end runs through the workflow manager with mock tools

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{MockTool, Mode, config_with_profile, default_tools, manager, records};
use dp_core::{
    AgentDescriptor, AgentId, CapabilityBinding, Config, Error, ErrorKind, MessageKind, Registry,
    Role, RunStatus, SubtaskStatus, Task, Tool, ToolManager, WorkflowManager,
};

fn status_of(result: &dp_core::RunResult, capability: &str) -> SubtaskStatus {
    result
        .by_capability(capability)
        .unwrap_or_else(|| panic!("no subtask for {capability}"))
        .status
}

#[tokio::test]
async fn test_visualization_failure_is_partial() {
    let viz = MockTool::failing("visualize", "render_failed");
    let manager = manager(Config::default_pipeline(), &default_tools(vec![viz.clone()]));
    let task = Task::new("report")
        .with_requires(["clean", "analyze", "visualize"])
        .with_params(records());

    let result = manager.run(task).await;

    let plan = result.plan.as_ref().unwrap();
    assert_eq!(plan.len(), 3);
    assert_eq!(plan.edges().len(), 2);
    assert_eq!(result.status, RunStatus::PartialFailure);
    assert_eq!(status_of(&result, "clean"), SubtaskStatus::Succeeded);
    assert_eq!(status_of(&result, "analyze"), SubtaskStatus::Succeeded);
    assert_eq!(status_of(&result, "visualize"), SubtaskStatus::Failed);

    let error = result.by_capability("visualize").unwrap().error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Tool);
    assert_eq!(error.tool_kind.as_deref(), Some("render_failed"));
    assert_eq!(viz.calls(), 1);
    assert_eq!(result.outputs.len(), 2);
}

#[tokio::test]
async fn test_single_analysis_succeeds() {
    let analyze = MockTool::ok("analyze");
    let manager = manager(Config::default_pipeline(), &default_tools(vec![analyze.clone()]));
    let task = Task::new("numbers").with_requires(["analyze"]).with_params(records());

    let result = manager.run(task).await;

    let plan = result.plan.as_ref().unwrap();
    assert_eq!(plan.len(), 1);
    assert!(plan.edges().is_empty());
    assert_eq!(result.status, RunStatus::Success);
    assert!(result.is_success());
    assert!(!result.cancelled);
    assert_eq!(analyze.calls(), 1);
    assert_eq!(result.outputs[0].output["tool"], "analyze");
}

#[tokio::test]
async fn test_outputs_flow_downstream_in_plan_order() {
    let manager = manager(Config::default_pipeline(), &default_tools(vec![]));
    let task = Task::new("x")
        .with_requires(["collect", "clean", "analyze"])
        .with_params(records());

    let result = manager.run(task).await;

    assert_eq!(result.status, RunStatus::Success);
    let order: Vec<&str> = result.outputs.iter().map(|o| o.capability.as_str()).collect();
    assert_eq!(order, vec!["collect", "clean", "analyze"]);
    // each downstream subtask saw exactly one upstream output
    assert_eq!(result.outputs[0].output["inputs"], 0);
    assert_eq!(result.outputs[1].output["inputs"], 1);
    assert_eq!(result.outputs[2].output["inputs"], 1);
}

#[tokio::test]
async fn test_missing_role_fails_before_anything_runs() {
    let mut config = Config::default_pipeline();
    config.agents.retain(|a| a.role != Role::Visualization);
    for agent in &mut config.agents {
        agent.peers.remove(&AgentId::new("viz"));
    }
    let clean = MockTool::ok("clean");
    let manager = manager(config, &default_tools(vec![clean.clone()]));
    let task = Task::new("x")
        .with_requires(["clean", "visualize"])
        .with_params(records());

    let result = manager.run(task).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.failure.as_ref().unwrap().kind, ErrorKind::UnsatisfiableTask);
    assert!(result.subtasks.is_empty());
    assert!(result.transcript.is_empty());
    assert!(result.plan.is_none());
    assert_eq!(clean.calls(), 0);
}

#[tokio::test]
async fn test_unclassified_task_is_failed_run() {
    let manager = manager(Config::default_pipeline(), &default_tools(vec![]));
    let result = manager.run(Task::new("order a pizza")).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.failure.unwrap().kind, ErrorKind::UnclassifiedTask);
}

#[tokio::test]
async fn test_failure_skips_only_transitive_dependents() {
    let collect = MockTool::failing("collect", "not_found");
    let profile = MockTool::ok("profile");
    let manager = manager(
        config_with_profile(),
        &default_tools(vec![collect, profile.clone()]),
    );
    let task = Task::new("x")
        .with_requires(["collect", "clean", "profile"])
        .with_params(records());

    let result = manager.run(task).await;

    assert_eq!(result.status, RunStatus::PartialFailure);
    assert_eq!(status_of(&result, "collect"), SubtaskStatus::Failed);
    assert_eq!(status_of(&result, "clean"), SubtaskStatus::Skipped);
    assert_eq!(status_of(&result, "profile"), SubtaskStatus::Succeeded);
    assert_eq!(profile.calls(), 1);

    let clean = result.by_capability("clean").unwrap();
    assert!(clean.skip_reason.as_deref().unwrap().starts_with("dependency_failed"));
    assert!(clean.started_at.is_none());
}

#[tokio::test]
async fn test_failure_skips_every_downstream_stage() {
    let clean = MockTool::failing("clean", "bad_data");
    let analyze = MockTool::ok("analyze");
    let visualize = MockTool::ok("visualize");
    let manager = manager(
        Config::default_pipeline(),
        &default_tools(vec![clean, analyze.clone(), visualize.clone()]),
    );
    let task = Task::new("x")
        .with_requires(["clean", "analyze", "visualize"])
        .with_params(records());

    let result = manager.run(task).await;

    assert_eq!(status_of(&result, "analyze"), SubtaskStatus::Skipped);
    assert_eq!(status_of(&result, "visualize"), SubtaskStatus::Skipped);
    assert_eq!(analyze.calls() + visualize.calls(), 0);
}

#[tokio::test]
async fn test_invalid_payload_becomes_error_reply() {
    let manager = manager(Config::default_pipeline(), &default_tools(vec![]));
    // no records and no upstream input for the analysis agent
    let task = Task::new("x").with_requires(["analyze"]);

    let result = manager.run(task).await;

    assert_eq!(result.status, RunStatus::PartialFailure);
    let report = result.by_capability("analyze").unwrap();
    assert_eq!(report.status, SubtaskStatus::Failed);
    assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::InvalidTask);
}

#[tokio::test]
async fn test_panicking_tool_fails_its_subtask_only() {
    let profile = MockTool::new("profile", Mode::Panic);
    let manager = manager(config_with_profile(), &default_tools(vec![profile]));
    let task = Task::new("x")
        .with_requires(["collect", "profile"])
        .with_params(records());

    let result = manager.run(task).await;

    assert_eq!(status_of(&result, "collect"), SubtaskStatus::Succeeded);
    let report = result.by_capability("profile").unwrap();
    assert_eq!(report.status, SubtaskStatus::Failed);
    assert_eq!(report.error.as_ref().unwrap().kind, ErrorKind::Internal);
}

#[tokio::test]
async fn test_transcript_replies_reference_tasks() {
    let manager = manager(Config::default_pipeline(), &default_tools(vec![]));
    let task = Task::new("x")
        .with_requires(["clean", "analyze", "visualize"])
        .with_params(records());

    let result = manager.run(task).await;
    let transcript = &result.transcript;

    let tasks: HashSet<_> = transcript
        .iter()
        .filter(|m| m.kind() == MessageKind::Task)
        .map(|m| m.id().clone())
        .collect();
    assert_eq!(tasks.len(), 3);

    for message in transcript.iter().filter(|m| m.kind() != MessageKind::Task) {
        let original = message.in_reply_to().expect("reply without reference");
        assert!(tasks.contains(original));
    }

    // started status precedes the result for every task
    for id in &tasks {
        let position = |kind: MessageKind| {
            transcript
                .iter()
                .position(|m| m.kind() == kind && m.in_reply_to() == Some(id))
                .unwrap()
        };
        assert!(position(MessageKind::Status) < position(MessageKind::Result));
    }
}

#[tokio::test]
async fn test_repeated_runs_have_identical_plans() {
    let manager = manager(Config::default_pipeline(), &default_tools(vec![]));
    let task = Task::new("clean the data, analyze it and chart it").with_params(records());

    let first = manager.run(task.clone()).await;
    let second = manager.run(task).await;

    assert_ne!(first.run_id, second.run_id);
    let first_plan = first.plan.unwrap();
    let second_plan = second.plan.unwrap();
    assert_eq!(first_plan.shape(), second_plan.shape());
    assert_eq!(first_plan.subtasks(), second_plan.subtasks());
}

/// Default pipeline where the analyst holds two independent capabilities
/// backed by the same tool implementation
fn shared_tool_config(parallelism: usize, max_concurrency: usize) -> Config {
    let mut config = Config::default_pipeline();
    config.workflow.default_tool_parallelism = parallelism;
    config.workflow.max_concurrency = max_concurrency;
    for name in ["analyze", "summarize"] {
        config.capabilities.insert(
            name.into(),
            CapabilityBinding::new(name, Role::Analysis).with_tool("stats"),
        );
    }
    if let Some(analyst) = config.agents.iter_mut().find(|a| a.id.as_str() == "analyst") {
        analyst.capabilities.insert("summarize".into());
    }
    config
}

#[tokio::test]
async fn test_shared_tool_is_serialized_by_default() {
    let stats = MockTool::new("stats", Mode::Sleep(Duration::from_millis(40)));
    let manager = manager(shared_tool_config(1, 4), &default_tools(vec![stats.clone()]));
    let task = Task::new("x")
        .with_requires(["analyze", "summarize"])
        .with_params(records());

    let result = manager.run(task).await;

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(stats.calls(), 2);
    assert_eq!(stats.peak(), 1);
}

#[tokio::test]
async fn test_unlimited_tool_runs_independent_subtasks_together() {
    let stats = MockTool::new("stats", Mode::Sleep(Duration::from_millis(100)));
    let manager = manager(shared_tool_config(0, 4), &default_tools(vec![stats.clone()]));
    let task = Task::new("x")
        .with_requires(["analyze", "summarize"])
        .with_params(records());

    let result = manager.run(task).await;

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(stats.peak(), 2);
}

#[tokio::test]
async fn test_max_concurrency_caps_dispatch() {
    let stats = MockTool::new("stats", Mode::Sleep(Duration::from_millis(40)));
    let manager = manager(shared_tool_config(0, 1), &default_tools(vec![stats.clone()]));
    let task = Task::new("x")
        .with_requires(["analyze", "summarize"])
        .with_params(records());

    let result = manager.run(task).await;

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(stats.peak(), 1);
}

#[tokio::test]
async fn test_cancel_skips_pending_and_abandons_in_flight() {
    let collect = MockTool::new("collect", Mode::Sleep(Duration::from_secs(5)));
    let clean = MockTool::ok("clean");
    let mut config = Config::default_pipeline();
    config.workflow.cancel_grace_secs = 0;
    let manager = manager(config, &default_tools(vec![collect, clean.clone()]));
    let task = Task::new("x")
        .with_requires(["collect", "clean", "analyze"])
        .with_params(records());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = manager.run_with_cancel(task, cancel).await;

    assert!(result.cancelled);
    assert_eq!(result.status, RunStatus::PartialFailure);
    let collect = result.by_capability("collect").unwrap();
    assert_eq!(collect.status, SubtaskStatus::Skipped);
    assert_eq!(collect.skip_reason.as_deref(), Some("abandoned"));
    let pending = result.by_capability("clean").unwrap();
    assert_eq!(pending.skip_reason.as_deref(), Some("cancelled"));
    assert_eq!(clean.calls(), 0);

    let notice = result
        .transcript
        .iter()
        .find(|m| m.kind() == MessageKind::Status && m.in_reply_to().is_none())
        .expect("cancellation broadcast");
    assert_eq!(notice.payload()["state"], "cancelled");
}

#[tokio::test]
async fn test_cooperative_tool_answers_within_grace() {
    let analyze = MockTool::new("analyze", Mode::Cooperative(Duration::from_secs(10)));
    let manager = manager(Config::default_pipeline(), &default_tools(vec![analyze]));
    let task = Task::new("x").with_requires(["analyze"]).with_params(records());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let result = manager.run_with_cancel(task, cancel).await;

    assert!(result.cancelled);
    let report = result.by_capability("analyze").unwrap();
    assert_eq!(report.status, SubtaskStatus::Skipped);
    assert_eq!(report.skip_reason.as_deref(), Some("cancelled"));
    assert!(report.finished_at.is_some());
}

#[tokio::test]
async fn test_cancel_before_start_runs_nothing() {
    let clean = MockTool::ok("clean");
    let manager = manager(Config::default_pipeline(), &default_tools(vec![clean.clone()]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = manager
        .run_with_cancel(Task::new("x").with_requires(["clean"]).with_params(records()), cancel)
        .await;

    assert!(result.cancelled);
    assert_eq!(status_of(&result, "clean"), SubtaskStatus::Skipped);
    assert_eq!(clean.calls(), 0);
}

#[test]
fn test_manager_requires_every_tool() {
    let registry = Registry::from_config(Config::default_pipeline()).unwrap();
    let mut tools = ToolManager::new();
    for tool in default_tools(vec![])
        .into_iter()
        .filter(|t| t.name() != "visualize")
    {
        tools.register(tool);
    }

    let err = WorkflowManager::new(Arc::new(registry), Arc::new(tools))
        .err()
        .unwrap();
    assert!(matches!(err, Error::UnboundCapability { agent, .. } if agent == "viz"));
}

#[test]
fn test_agent_missing_required_capability_fails_fast() {
    let mut config = Config::default_pipeline();
    config
        .agents
        .push(AgentDescriptor::new("painter", Role::Visualization).with_peer("coordinator"));
    let registry = Registry::from_config(config).unwrap();
    let mut tools = ToolManager::new();
    for tool in default_tools(vec![]) {
        tools.register(tool);
    }

    let err = WorkflowManager::new(Arc::new(registry), Arc::new(tools))
        .err()
        .unwrap();
    assert!(matches!(err, Error::UnboundCapability { capability, .. } if capability == "visualize"));
}

#[tokio::test]
async fn test_transcript_file_written() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = Config::default_pipeline();
    config.workflow.transcript_dir = Some(dir.path().to_path_buf());
    let manager = manager(config, &default_tools(vec![]));

    let result = manager
        .run(Task::new("x").with_requires(["analyze"]).with_params(records()))
        .await;

    let path = dir.path().join(format!("run-{}.jsonl", result.run_id));
    let content = std::fs::read_to_string(path).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.first().unwrap()["event"], "run_start");
    assert_eq!(lines[1]["event"], "plan");
    assert_eq!(lines.last().unwrap()["event"], "run_end");
    assert_eq!(lines.last().unwrap()["status"], json!("success"));
    // task, started, result
    assert_eq!(lines.iter().filter(|l| l["event"] == "message").count(), 3);
}
