//! Adapters: transports that feed requests into the [`ToolEngine`].
//!
//! [`ToolEngine`]: crate::agent::ToolEngine

pub mod stdio;
