//! Tool capability system
//!
//! Agents reach external work (cleaning, analysis, charting) only through
//! the [`Tool`] contract. The [`ToolManager`] resolves implementation names
//! and applies the per-tool concurrency policy.

pub mod manager;
pub mod traits;

pub use manager::{ToolConcurrency, ToolManager};
pub use traits::{Tool, ToolCall};
