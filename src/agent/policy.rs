//! Authorization gate for tool calls.
//!
//! Decides whether a call to a registered tool may run now, must wait for a
//! confirmation, or is rejected. Rules are checked in a fixed order so the
//! reported status is deterministic: malformed arguments, owner-only,
//! allowed roles, private-only, then confirmation.

use tracing::debug;

use crate::tools::ToolDescriptor;
use crate::types::{Caller, ToolCall};

use super::GateError;

/// Outcome of a successful policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Invoke the capability immediately.
    Allow,
    /// Park the call until its requester confirms it.
    RequireConfirmation,
}

/// Context the gate evaluates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyContext {
    /// The single principal allowed to call owner-only tools.
    pub owner_id: i64,
}

/// Evaluate the policy of `tool` for `call` made by `caller`.
///
/// # Errors
///
/// Returns the [`GateError`] for the first rule the call violates.
pub fn check_policy(
    tool: &ToolDescriptor,
    call: &ToolCall,
    caller: &Caller,
    ctx: &PolicyContext,
) -> Result<PolicyDecision, GateError> {
    let options = &tool.options;

    if call.argument_map().is_none() {
        return Err(GateError::MalformedArguments);
    }

    if options.requires_owner && caller.user_id != ctx.owner_id {
        return Err(GateError::OwnerOnlyViolation(tool.name.clone()));
    }

    if !tool.allows_role(&caller.role) {
        return Err(GateError::RoleViolation {
            tool: tool.name.clone(),
            role: caller.role.clone(),
        });
    }

    if options.requires_private && !caller.is_private {
        return Err(GateError::PrivacyViolation(tool.name.clone()));
    }

    let decision = if options.requires_confirmation {
        PolicyDecision::RequireConfirmation
    } else {
        PolicyDecision::Allow
    };
    debug!(tool = %tool.name, ?decision, "policy check passed");
    Ok(decision)
}
