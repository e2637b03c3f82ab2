//! Tools module - executable capabilities for the agent.
//!
//! The registry holds three tool origins side by side:
//!
//! - **built-ins**: `memory_search`, `memory_browse`, `subagent`, `spawn`,
//!   `cron`
//! - **MCP-backed**: one [`McpToolAdapter`] per ready, allowed catalog entry
//! - **skill-defined**: whatever the configuration injects
//!
//! Names are unique across origins; a registration clash is a config error.

pub mod cron;
pub mod mcp;
pub mod memory_browse;
pub mod memory_search;
pub mod registry;
pub mod spawn;
pub mod subagent;
pub mod types;

pub use cron::CronTool;
pub use mcp::{adapters_for_workspace, McpToolAdapter};
pub use memory_browse::MemoryBrowseTool;
pub use memory_search::MemorySearchTool;
pub use registry::ToolRegistry;
pub use spawn::SpawnTool;
pub use subagent::SubagentTool;
pub use types::{Tool, ToolContext, ToolOutput};
