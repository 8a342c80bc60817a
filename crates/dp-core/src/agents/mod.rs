//! Agents
//!
//! ```text
//!                ┌──────────────┐
//!                │ Coordinator  │  plan(task) -> DelegationPlan
//!                └──────┬───────┘
//!          task / status│result / error
//!        ┌──────────────┼──────────────┐
//!        ▼              ▼              ▼
//!   ┌─────────┐   ┌──────────┐   ┌──────────┐
//!   │  data   │   │ analysis │   │   viz    │   Agent::handle
//!   └────┬────┘   └────┬─────┘   └────┬─────┘
//!        ▼             ▼              ▼
//!               ToolManager (gated tools)
//! ```
//!
//! Agents never call each other. Every exchange goes through the
//! [`MessageBus`](crate::bus::MessageBus).

pub mod agent;
pub mod types;

pub use agent::{Agent, Behavior, PLOT_TYPES};
pub use types::{AgentDescriptor, AgentId, Role, capability};
