//! 工具层：Tool / ToolRegistry、handler 分类路由器，以及内置分类（filesystem、jobs、consensus、plugin）

pub mod consensus;
pub mod filesystem;
pub mod jobs;
pub mod plugin;
pub mod registry;
pub mod router;
pub mod schema;

pub use consensus::{consensus_category, AskOtherModelsTool};
pub use filesystem::{filesystem_category, ListDirectoryTool, ReadFileTool, SafeFs};
pub use jobs::{jobs_category, CheckSecurityScanTool, StartSecurityScanTool};
pub use plugin::{plugin_category, PluginTool};
pub use registry::{Tool, ToolRegistry, ToolSchema};
pub use router::{AuditOutcome, HandlerCategory, Outcome, ToolExecutionRouter, ToolOutcome};
