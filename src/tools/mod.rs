//! Capabilities and the policy metadata attached to them.
//!
//! A [`Capability`] is the side-effecting action behind a tool name. It
//! declares the argument names it accepts; anything else the model sends is
//! dropped before invocation. A [`ToolDescriptor`] pairs a capability with
//! the authorization policy the gate enforces for it.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::RiskLevel;

pub mod echo;
pub mod registry;

pub use registry::ToolRegistry;

/// Errors a capability may report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    /// The arguments were present but unusable.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The action itself failed.
    #[error("{0}")]
    Failed(String),
}

/// A registered action an agent may invoke.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Names of the arguments this capability accepts.
    fn parameters(&self) -> &[&'static str];

    /// Run the action with arguments already filtered to [`Self::parameters`].
    async fn invoke(&self, arguments: Map<String, Value>) -> Result<Value, CapabilityError>;
}

type CapabilityFn = dyn Fn(Map<String, Value>) -> Result<Value, CapabilityError> + Send + Sync;

/// Adapter turning a synchronous closure into a [`Capability`].
pub struct FnCapability {
    parameters: &'static [&'static str],
    func: Box<CapabilityFn>,
}

impl FnCapability {
    /// Wrap `func`, accepting only the listed argument names.
    pub fn new<F>(parameters: &'static [&'static str], func: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Result<Value, CapabilityError> + Send + Sync + 'static,
    {
        Self {
            parameters,
            func: Box::new(func),
        }
    }
}

impl fmt::Debug for FnCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCapability")
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Capability for FnCapability {
    fn parameters(&self) -> &[&'static str] {
        self.parameters
    }

    async fn invoke(&self, arguments: Map<String, Value>) -> Result<Value, CapabilityError> {
        (self.func)(arguments)
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Authorization policy attached to a tool at registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolOptions {
    /// Only the configured owner may call the tool.
    pub requires_owner: bool,
    /// The tool may only be called from a private chat.
    pub requires_private: bool,
    /// Calls are parked until the requester confirms them.
    pub requires_confirmation: bool,
    /// Roles allowed to call the tool; `None` allows any role.
    pub allowed_roles: Option<BTreeSet<String>>,
    /// Risk tier.
    pub risk_level: RiskLevel,
    /// Human-readable description, shown in confirmation prompts and tool lists.
    pub description: String,
}

impl ToolOptions {
    /// Mark the tool owner-only.
    #[must_use]
    pub fn owner_only(mut self) -> Self {
        self.requires_owner = true;
        self
    }

    /// Restrict the tool to private chats.
    #[must_use]
    pub fn private_only(mut self) -> Self {
        self.requires_private = true;
        self
    }

    /// Require a confirmation round-trip before execution.
    #[must_use]
    pub fn confirmed(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    /// Restrict the tool to the given roles.
    #[must_use]
    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_roles = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    /// Set the risk tier.
    #[must_use]
    pub fn risk(mut self, level: RiskLevel) -> Self {
        self.risk_level = level;
        self
    }

    /// Set the description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A registered tool: name, capability and policy.
#[derive(Clone)]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// The action behind the name.
    pub capability: Arc<dyn Capability>,
    /// Authorization policy.
    pub options: ToolOptions,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("parameters", &self.capability.parameters())
            .field("options", &self.options)
            .finish()
    }
}

impl ToolDescriptor {
    /// Tools that touch the agent's persona are audited like high-risk ones.
    pub fn is_personality_tool(&self) -> bool {
        self.name.to_lowercase().contains("personality")
    }

    /// Whether authorization and execution stages go to the audit trail.
    ///
    /// Covers high/critical risk, personality tools and every
    /// confirmation-gated tool.
    pub fn is_audited(&self) -> bool {
        self.options.risk_level.is_elevated()
            || self.is_personality_tool()
            || self.options.requires_confirmation
    }

    /// Whether `role` may call this tool.
    pub fn allows_role(&self, role: &str) -> bool {
        self.options
            .allowed_roles
            .as_ref()
            .map_or(true, |roles| roles.contains(role))
    }

    /// Keep only the arguments the capability declares.
    pub fn filter_arguments(&self, arguments: &Map<String, Value>) -> Map<String, Value> {
        let declared = self.capability.parameters();
        arguments
            .iter()
            .filter(|(key, _)| declared.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Invoke the capability with filtered arguments.
    ///
    /// # Errors
    ///
    /// Propagates the capability's own [`CapabilityError`].
    pub async fn invoke(&self, arguments: &Map<String, Value>) -> Result<Value, CapabilityError> {
        self.capability
            .invoke(self.filter_arguments(arguments))
            .await
    }
}

/// Listing entry for prompt assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSummary {
    /// Tool name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Risk tier.
    pub risk_level: RiskLevel,
    /// Whether the tool is owner-only.
    pub requires_owner: bool,
    /// Whether calls need a confirmation round-trip.
    pub requires_confirmation: bool,
}

impl From<&ToolDescriptor> for ToolSummary {
    fn from(descriptor: &ToolDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            description: descriptor.options.description.clone(),
            risk_level: descriptor.options.risk_level,
            requires_owner: descriptor.options.requires_owner,
            requires_confirmation: descriptor.options.requires_confirmation,
        }
    }
}
