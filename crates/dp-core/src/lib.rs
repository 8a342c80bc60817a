//! dp-core: DataPip coordination core
//!
//! A coordinator turns a task into a delegation plan, and the workflow
//! manager runs that plan across role-specific agents that talk only
//! through a policy-checked message bus. Tools are external and plug in
//! through the [`Tool`] trait.

pub mod agents;
pub mod audit;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod message;
pub mod plan;
pub mod registry;
pub mod tool;
pub mod workflow;

pub use agents::{Agent, AgentDescriptor, AgentId, Role};
pub use audit::TranscriptLog;
pub use bus::MessageBus;
pub use config::{CapabilityBinding, Config, ToolSettings, WorkflowConfig};
pub use coordinator::Coordinator;
pub use error::{Error, ErrorKind, Result, ToolError};
pub use message::{ErrorPayload, Message, MessageId, MessageKind, Recipient, TaskPayload};
pub use plan::{DelegationPlan, PlanEdge, PlanShape, Subtask, SubtaskId, Task, TaskId};
pub use registry::Registry;
pub use tool::{Tool, ToolCall, ToolConcurrency, ToolManager};
pub use workflow::{
    MergedOutput, RunFailure, RunId, RunResult, RunStatus, SubtaskReport, SubtaskStatus,
    WorkflowManager,
};
