//! Tool manager for registering and invoking tool implementations
//!
//! Each tool can carry a concurrency gate. Two subtasks that reach the same
//! external resource at once queue on that gate instead of hitting it in
//! parallel.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::ToolError;
use crate::tool::{Tool, ToolCall};

/// How many calls a tool accepts at the same time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolConcurrency {
    Unlimited,
    /// At most `n` concurrent calls; `Limit(1)` serializes the tool
    Limit(usize),
}

impl ToolConcurrency {
    /// Map a config `max_parallel` value (0 = unlimited)
    pub fn from_max_parallel(max_parallel: usize) -> Self {
        match max_parallel {
            0 => Self::Unlimited,
            n => Self::Limit(n),
        }
    }

    pub fn serialized() -> Self {
        Self::Limit(1)
    }

    fn gate(&self) -> Option<Arc<Semaphore>> {
        match self {
            Self::Unlimited => None,
            Self::Limit(n) => Some(Arc::new(Semaphore::new(*n))),
        }
    }
}

/// Manager for registered tools
pub struct ToolManager {
    /// Registered tools indexed by name
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Concurrency gates indexed by tool name
    gates: HashMap<String, Arc<Semaphore>>,
    /// Policy applied to tools registered without an explicit one
    default_concurrency: ToolConcurrency,
}

impl ToolManager {
    /// Create a new empty tool manager. Tools are serialized by default.
    pub fn new() -> Self {
        Self::with_default_concurrency(ToolConcurrency::serialized())
    }

    pub fn with_default_concurrency(default_concurrency: ToolConcurrency) -> Self {
        Self {
            tools: HashMap::new(),
            gates: HashMap::new(),
            default_concurrency,
        }
    }

    /// Register a tool under the default concurrency policy
    ///
    /// If a tool with the same name already exists, it will be replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let policy = self.default_concurrency;
        self.register_with(tool, policy);
    }

    pub fn register_with(&mut self, tool: Arc<dyn Tool>, concurrency: ToolConcurrency) {
        let name = tool.name().to_string();
        self.tools.insert(name.clone(), tool);
        self.set_concurrency(&name, concurrency);
    }

    /// Replace the concurrency policy of a tool
    pub fn set_concurrency(&mut self, name: &str, concurrency: ToolConcurrency) {
        match concurrency.gate() {
            Some(gate) => {
                self.gates.insert(name.to_string(), gate);
            }
            None => {
                self.gates.remove(name);
            }
        }
    }

    /// Current number of free slots for a gated tool (`None` when unlimited)
    pub fn available_permits(&self, name: &str) -> Option<usize> {
        self.gates.get(name).map(|g| g.available_permits())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Invoke a tool by implementation name
    ///
    /// Waits for the tool's gate first; if the call's cancellation token
    /// fires while waiting, the call fails with kind `cancelled` and the tool
    /// is never reached.
    pub async fn invoke(&self, name: &str, call: ToolCall) -> Result<JsonValue, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::new("unbound", format!("Unknown tool: {}", name)))?;

        let _permit = match self.gates.get(name) {
            Some(gate) => {
                let gate = gate.clone();
                let permit = tokio::select! {
                    permit = gate.acquire_owned() => permit
                        .map_err(|_| ToolError::new("closed", format!("Tool gate closed: {}", name)))?,
                    _ = call.cancel.cancelled() => {
                        return Err(ToolError::cancelled(format!("cancelled while waiting for {}", name)));
                    }
                };
                Some(permit)
            }
            None => None,
        };

        debug!(tool = %name, capability = %call.capability, "Invoking tool");
        tool.invoke(call).await
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ToolManager {
    fn default() -> Self {
        Self::new()
    }
}
