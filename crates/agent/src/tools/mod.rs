//! The tool contract, registry and built-in tools.

pub mod builtins;
pub mod context;
pub mod registry;
pub mod restrictions;

pub use context::{Tool, ToolContext, ToolError};
pub use registry::ToolRegistry;
pub use restrictions::FileRestrictions;
