//! Tool Registry, Router, Execution Context, and builtin tools.
//!
//! The registry is a single `name -> (definition, async handler)` map
//! behind a lock; the router dispatches `ToolCall`s against it, sequentially
//! or in parallel per the request's `MultiTurnConfig`.

pub mod builtin;
pub mod context;
pub mod registry;
pub mod router;

pub use builtin::{EchoTool, EchoResult};
pub use context::ToolExecutionContext;
pub use registry::{ToolHandler, ToolRegistry};
pub use router::ToolRouter;
