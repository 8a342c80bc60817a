//! Tool trait definition
//!
//! A tool is the external implementation behind a capability name. The core
//! never looks inside one; it hands over a payload and gets back JSON or a
//! [`ToolError`].

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;

/// One invocation of a tool
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Capability the agent is exercising
    pub capability: String,
    /// Task payload (`params` plus upstream `inputs`)
    pub payload: JsonValue,
    /// Cancelled when the surrounding run is cancelled
    pub cancel: CancellationToken,
}

impl ToolCall {
    pub fn new(capability: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            capability: capability.into(),
            payload,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// External tool capability
///
/// Implementations decide their own retry behavior; the workflow manager
/// never retries a failed call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Implementation name, referenced by `[capabilities.*].tool`
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn invoke(&self, call: ToolCall) -> Result<JsonValue, ToolError>;
}
