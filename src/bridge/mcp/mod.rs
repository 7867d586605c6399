//! MCP (Model-Context-Protocol) client integration. The MCP sub-protocol
//! itself is out of scope — only the client-side interface
//! (connect/disconnect, discover, call) is implemented here, over an HTTP
//! adapter and a STDIO transport variant.

pub mod client;
pub mod registry;

pub use client::{McpCall, McpClient, McpResult, ServerConfig};
pub use registry::McpToolRegistry;
