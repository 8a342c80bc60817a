//! Mock tools and fixtures shared by the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use dp_core::{
    CapabilityBinding, Config, Registry, Role, Tool, ToolCall, ToolError, ToolManager,
    WorkflowManager,
};

/// How a [`MockTool`] behaves when invoked
#[derive(Clone)]
pub enum Mode {
    Succeed,
    Fail(ToolError),
    Panic,
    /// Sleeps, ignoring cancellation
    Sleep(Duration),
    /// Sleeps, but returns `cancelled` as soon as the run is cancelled
    Cooperative(Duration),
}

/// Counting tool with a scripted outcome
pub struct MockTool {
    name: String,
    mode: Mode,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockTool {
    pub fn new(name: &str, mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            mode,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn ok(name: &str) -> Arc<Self> {
        Self::new(name, Mode::Succeed)
    }

    pub fn failing(name: &str, kind: &str) -> Arc<Self> {
        Self::new(name, Mode::Fail(ToolError::new(kind, format!("{name} failed"))))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Scripted test tool"
    }

    async fn invoke(&self, call: ToolCall) -> Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let outcome = match &self.mode {
            Mode::Succeed => Ok(()),
            Mode::Fail(e) => Err(e.clone()),
            Mode::Panic => panic!("{} exploded", self.name),
            Mode::Sleep(d) => {
                tokio::time::sleep(*d).await;
                Ok(())
            }
            Mode::Cooperative(d) => tokio::select! {
                _ = tokio::time::sleep(*d) => Ok(()),
                _ = call.cancel.cancelled() => Err(ToolError::cancelled("stopped by run cancellation")),
            },
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome.map(|()| {
            json!({
                "tool": self.name,
                "capability": call.capability,
                "inputs": call.payload["inputs"].as_array().map(|a| a.len()).unwrap_or(0),
            })
        })
    }
}

/// Params every role accepts
pub fn records() -> Value {
    json!({ "records": [{ "x": 1.0, "label": "a" }, { "x": 2.0, "label": "b" }] })
}

/// Default pipeline plus a `profile` data capability with no `after`
pub fn config_with_profile() -> Config {
    let mut config = Config::default_pipeline();
    config.capabilities.insert(
        "profile".into(),
        CapabilityBinding::new("profile", Role::Data).with_keywords(vec!["profile".into()]),
    );
    if let Some(data) = config.agents.iter_mut().find(|a| a.id.as_str() == "data") {
        data.capabilities.insert("profile".into());
    }
    config
}

/// Register `tools` and build a workflow manager against `config`
pub fn manager(config: Config, tools: &[Arc<MockTool>]) -> WorkflowManager {
    let registry = Registry::from_config(config).unwrap();
    let mut manager = ToolManager::new();
    for tool in tools {
        manager.register(tool.clone());
    }
    registry.configure_tools(&mut manager);
    WorkflowManager::new(Arc::new(registry), Arc::new(manager)).unwrap()
}

/// One succeeding tool per default capability, plus any overrides by name
pub fn default_tools(overrides: Vec<Arc<MockTool>>) -> Vec<Arc<MockTool>> {
    let mut tools: Vec<Arc<MockTool>> = ["collect", "clean", "save", "profile", "analyze", "visualize"]
        .iter()
        .filter(|name| !overrides.iter().any(|t| t.name() == **name))
        .map(|name| MockTool::ok(name))
        .collect();
    tools.extend(overrides);
    tools
}
