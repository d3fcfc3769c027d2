//! Name-keyed registry of tools.
//!
//! Populated once at startup by the modules that own capabilities and read
//! concurrently afterwards. Re-registering a name replaces the previous
//! descriptor.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use tracing::{debug, info};

use crate::types::RiskLevel;

use super::{Capability, ToolDescriptor, ToolOptions, ToolSummary};

/// Registry mapping tool names to descriptors.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<ToolDescriptor>>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tool_count", &self.count())
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `capability` under `name`, replacing any previous entry.
    pub fn register(
        &self,
        name: impl Into<String>,
        capability: Arc<dyn Capability>,
        options: ToolOptions,
    ) {
        let name = name.into();
        let descriptor = Arc::new(ToolDescriptor {
            name: name.clone(),
            capability,
            options,
        });

        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        if tools.insert(name.clone(), descriptor).is_some() {
            info!(tool = %name, "tool re-registered, previous descriptor replaced");
        } else {
            debug!(tool = %name, "tool registered");
        }
    }

    /// Register a tool that edits the agent's persona.
    ///
    /// Owner-only, confirmation-gated and `critical` risk.
    pub fn register_personality_tool(
        &self,
        name: impl Into<String>,
        capability: Arc<dyn Capability>,
        description: impl Into<String>,
    ) {
        let options = ToolOptions::default()
            .owner_only()
            .confirmed()
            .risk(RiskLevel::Critical)
            .describe(description);
        self.register(name, capability, options);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<ToolDescriptor>> {
        self.read().get(name).cloned()
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Number of registered tools.
    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Listing of every tool, sorted by name.
    pub fn summaries(&self) -> Vec<ToolSummary> {
        let mut summaries: Vec<ToolSummary> = self
            .read()
            .values()
            .map(|d| ToolSummary::from(d.as_ref()))
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ToolDescriptor>>> {
        self.tools.read().unwrap_or_else(PoisonError::into_inner)
    }
}
