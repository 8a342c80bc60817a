//! dp-tools: Reference data tools for datapip
//!
//! Implementations behind the `collect`, `clean`, `save`, `analyze`,
//! and `visualize` capabilities. Each reads records from `params.records` or
//! the latest upstream output and returns JSON.

use dp_core::ToolManager;

pub mod analyze;
pub mod clean;
pub mod collect;
pub mod records;
pub mod save;
pub mod visualize;

pub use analyze::AnalyzeTool;
pub use clean::CleanTool;
pub use collect::CollectTool;
pub use save::SaveTool;
pub use visualize::VisualizeTool;

use std::sync::Arc;

/// Register all reference tools with the tool manager
pub fn register_default_tools(manager: &mut ToolManager) {
    manager.register(Arc::new(CollectTool));
    manager.register(Arc::new(CleanTool));
    manager.register(Arc::new(SaveTool));
    manager.register(Arc::new(AnalyzeTool));
    manager.register(Arc::new(VisualizeTool));
}
