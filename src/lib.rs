pub mod config;
pub mod mcp;
pub mod prolog;
pub mod tools;

// Re-export commonly used types
pub use config::{Config, Mode};
pub use mcp::LogicServer;
pub use prolog::{CancelToken, QueryContext, QueryOutcome, SessionEngine};
pub use tools::{ToolRegistry, ToolResult};
