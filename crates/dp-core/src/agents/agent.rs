//! Worker agents
//!
//! An [`Agent`] wraps a descriptor, the tool implementations its
//! capabilities resolve to, and a role-specific [`Behavior`]. The behavior
//! is a closed enum; adding a role means adding a variant.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{Value as JsonValue, json};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::types::{AgentDescriptor, AgentId, Role, capability};
use crate::bus::MessageBus;
use crate::error::{Error, ErrorKind};
use crate::message::{ErrorPayload, Message, MessageKind, TaskPayload};
use crate::registry::Registry;
use crate::tool::{ToolCall, ToolManager};

/// Chart kinds a visualization task may ask for
pub const PLOT_TYPES: &[&str] = &["histogram", "boxplot", "bar", "scatter", "correlation"];

/// Role-specific payload rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Coordinator,
    Data,
    Analysis,
    Visualization,
}

impl Behavior {
    fn for_role(role: Role) -> Self {
        match role {
            Role::Coordinator => Self::Coordinator,
            Role::Data => Self::Data,
            Role::Analysis => Self::Analysis,
            Role::Visualization => Self::Visualization,
        }
    }

    /// Check the payload has what this role needs; returns a reason on failure
    fn check(&self, payload: &TaskPayload) -> std::result::Result<(), String> {
        let params = &payload.params;
        if !(params.is_object() || params.is_null()) {
            return Err("params must be an object".to_string());
        }
        let has_records = params.get("records").is_some_and(JsonValue::is_array);
        let has_inputs = !payload.inputs.is_empty();

        match self {
            Self::Coordinator => Err("the coordinator does not execute subtasks".to_string()),
            Self::Data => {
                // only collect reads files; the other data steps work on records
                let has_source = payload.capability == capability::COLLECT
                    && params.get("source").is_some_and(JsonValue::is_string);
                if has_records || has_source || has_inputs {
                    Ok(())
                } else if payload.capability == capability::COLLECT {
                    Err("collect tasks need params.records or params.source".to_string())
                } else {
                    Err(format!(
                        "{} tasks need params.records or upstream input",
                        payload.capability
                    ))
                }
            }
            Self::Analysis => {
                if has_records || has_inputs {
                    Ok(())
                } else {
                    Err("analysis tasks need params.records or upstream input".to_string())
                }
            }
            Self::Visualization => {
                if !(has_records || has_inputs) {
                    return Err("visualization tasks need params.records or upstream input".to_string());
                }
                match params.get("plot_type") {
                    None | Some(JsonValue::Null) => Ok(()),
                    Some(JsonValue::String(kind)) if PLOT_TYPES.contains(&kind.as_str()) => Ok(()),
                    Some(other) => Err(format!(
                        "unsupported plot_type {}; expected one of {}",
                        other,
                        PLOT_TYPES.join(", ")
                    )),
                }
            }
        }
    }
}

/// A worker agent bound to its tools
pub struct Agent {
    descriptor: AgentDescriptor,
    behavior: Behavior,
    /// capability name -> tool implementation name
    bindings: BTreeMap<String, String>,
    tools: Arc<ToolManager>,
}

impl Agent {
    /// Build an agent, failing fast if a capability it needs is not bound
    pub fn new(
        descriptor: AgentDescriptor,
        registry: &Registry,
        tools: Arc<ToolManager>,
    ) -> crate::Result<Self> {
        let unbound = |capability: &str| Error::UnboundCapability {
            agent: descriptor.id.to_string(),
            capability: capability.to_string(),
        };

        for required in descriptor.role.required_capabilities() {
            if !descriptor.holds(required) {
                return Err(unbound(required));
            }
        }

        let mut bindings = BTreeMap::new();
        for capability in &descriptor.capabilities {
            let binding = registry.binding(capability).ok_or_else(|| unbound(capability))?;
            if !tools.contains(&binding.tool) {
                return Err(unbound(capability));
            }
            bindings.insert(capability.clone(), binding.tool.clone());
        }

        debug!(agent = %descriptor.id, role = %descriptor.role, ?bindings, "Agent built");

        Ok(Self {
            behavior: Behavior::for_role(descriptor.role),
            descriptor,
            bindings,
            tools,
        })
    }

    pub fn id(&self) -> &AgentId {
        &self.descriptor.id
    }

    pub fn role(&self) -> Role {
        self.descriptor.role
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    /// Decode and check a task message
    pub fn validate(&self, message: &Message) -> crate::Result<TaskPayload> {
        let invalid = |reason: String| Error::InvalidTask {
            agent: self.id().to_string(),
            reason,
        };

        if message.kind() != MessageKind::Task {
            return Err(invalid(format!("expected a task message, got {:?}", message.kind())));
        }

        let payload: TaskPayload = serde_json::from_value(message.payload().clone())
            .map_err(|e| invalid(format!("malformed task payload: {}", e)))?;

        if !self.bindings.contains_key(&payload.capability) {
            return Err(invalid(format!("capability '{}' is not held", payload.capability)));
        }

        self.behavior.check(&payload).map_err(invalid)?;
        Ok(payload)
    }

    /// Run one task message and build the reply (`result` or `error`)
    pub async fn handle(&self, message: &Message, cancel: &CancellationToken) -> Message {
        match self.execute(message, cancel).await {
            Ok(output) => message.reply(self.id().clone(), MessageKind::Result, output),
            Err(e) => {
                warn!(agent = %self.id(), error = %e, "Task failed");
                let payload = ErrorPayload::from(&e);
                message.reply(self.id().clone(), MessageKind::Error, payload.to_value())
            }
        }
    }

    async fn execute(&self, message: &Message, cancel: &CancellationToken) -> crate::Result<JsonValue> {
        let payload = self.validate(message)?;
        let tool = self
            .bindings
            .get(&payload.capability)
            .ok_or_else(|| Error::UnboundCapability {
                agent: self.id().to_string(),
                capability: payload.capability.clone(),
            })?;

        debug!(
            agent = %self.id(),
            subtask = %payload.subtask,
            tool = %tool,
            inputs = payload.inputs.len(),
            "Invoking capability"
        );

        let call = ToolCall::new(
            payload.capability.clone(),
            json!({ "params": payload.params, "inputs": payload.inputs }),
        )
        .with_cancel(cancel.clone());

        Ok(self.tools.invoke(tool, call).await?)
    }

    /// Actor loop: take tasks from the inbox until the run stops this task
    ///
    /// Each task runs in its own child task, so one agent can work on
    /// several subtasks at once; tool gates decide what actually overlaps.
    pub async fn serve(self: Arc<Self>, bus: Arc<MessageBus>, cancel: CancellationToken) {
        info!(agent = %self.id(), "Agent actor started");
        let mut running = JoinSet::new();
        let mut handling: HashMap<tokio::task::Id, Message> = HashMap::new();

        loop {
            tokio::select! {
                message = bus.receive(self.id()) => {
                    let Some(message) = message else { break };
                    if message.kind() != MessageKind::Task {
                        debug!(agent = %self.id(), kind = ?message.kind(), payload = %message.payload(), "Non-task message");
                        continue;
                    }

                    let started = message.reply(self.id().clone(), MessageKind::Status, json!({ "state": "started" }));
                    if let Err(e) = bus.send(started) {
                        warn!(agent = %self.id(), error = %e, "Could not report start");
                    }

                    let agent = self.clone();
                    let cancel = cancel.clone();
                    let task = message.clone();
                    let handle = running.spawn(async move { agent.handle(&task, &cancel).await });
                    handling.insert(handle.id(), message);
                }
                Some(joined) = running.join_next_with_id() => {
                    let reply = match joined {
                        Ok((task_id, reply)) => {
                            handling.remove(&task_id);
                            reply
                        }
                        Err(e) => {
                            let Some(original) = handling.remove(&e.id()) else { continue };
                            error!(agent = %self.id(), task = %original.id(), "Task handler panicked");
                            let payload = ErrorPayload::new(ErrorKind::Internal, format!("{} panicked while handling the task", self.id()));
                            original.reply(self.id().clone(), MessageKind::Error, payload.to_value())
                        }
                    };
                    if let Err(e) = bus.send(reply) {
                        warn!(agent = %self.id(), error = %e, "Reply dropped");
                    }
                }
            }
        }
    }
}
