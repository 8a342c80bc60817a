//! Workflow manager and run results
//!
//! Run state machine:
//!
//! ```text
//! Planning ──ok──> Executing ──> Aggregating ──> Success | PartialFailure
//!    │
//!    └──err──> Failed
//! ```

pub mod manager;
pub mod result;
mod state;

pub use manager::WorkflowManager;
pub use result::{
    MergedOutput, RunFailure, RunId, RunResult, RunStatus, SubtaskReport, SubtaskStatus,
};
