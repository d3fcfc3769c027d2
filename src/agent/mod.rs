//! Tool execution engine.
//!
//! The [`ToolEngine`] is the single entry point for model-requested tool
//! calls. It resolves the tool, runs the policy gate, parks gated calls in
//! the confirmation workflow and records every invocation in the execution
//! log and, for audited tools, the audit trail. Sink failures are logged
//! and never change the outcome reported to the caller.

pub mod approval;
pub mod normalize;
pub mod outcome;
pub mod policy;

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::audit::{
    AuditEntry, AuditStage, AuditTrail, ExecutionLog, ExecutionLogEntry, AUDIT_FILE_NAME,
};
use crate::config::{Config, EngineConfig};
use crate::tools::{CapabilityError, ToolDescriptor, ToolRegistry};
use crate::types::{Caller, Requester, ToolCall, ToolResponse, ToolStatus};

pub use approval::{ConfirmationWorkflow, PendingConfirmation, CONFIRMATION_ID_LEN};
pub use outcome::{InteractionOutcome, LlmTurn, ToolCallOutcome, TurnOutcome, TurnStatus};
pub use policy::{check_policy, PolicyContext, PolicyDecision};

/// Message shown for every authorization rejection, whichever rule fired.
pub const PERMISSION_DENIED_MESSAGE: &str = "Insufficient permissions.";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a call is rejected or fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// No tool is registered under the requested name.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// The arguments are not a JSON object.
    #[error("tool arguments must be an object")]
    MalformedArguments,

    /// An owner-only tool was called by someone else.
    #[error("tool {0} is owner-only")]
    OwnerOnlyViolation(String),

    /// A private-only tool was called from a group chat.
    #[error("tool {0} is private-only")]
    PrivacyViolation(String),

    /// The caller's role is not in the tool's allowed roles.
    #[error("role {role} may not call tool {tool}")]
    RoleViolation {
        /// Tool name.
        tool: String,
        /// Offending role.
        role: String,
    },

    /// The confirmation token is unknown or already consumed.
    #[error("confirmation not found: {0}")]
    ConfirmationNotFound(String),

    /// The confirmation token's TTL elapsed.
    #[error("confirmation expired: {0}")]
    ConfirmationExpired(String),

    /// The token was presented by someone other than its requester.
    #[error("confirmation {0} belongs to another requester")]
    ConfirmationBindingMismatch(String),

    /// Cancel was attempted on a token that already ran.
    #[error("confirmation already executed: {0}")]
    ConfirmationSettled(String),

    /// The capability reported an error.
    #[error("capability failed: {0}")]
    CapabilityFailed(#[from] CapabilityError),
}

impl GateError {
    /// Status reported for this error.
    pub fn status(&self) -> ToolStatus {
        match self {
            Self::NotFound(_)
            | Self::MalformedArguments
            | Self::ConfirmationNotFound(_)
            | Self::ConfirmationExpired(_)
            | Self::ConfirmationSettled(_) => ToolStatus::ValidationError,
            Self::OwnerOnlyViolation(_)
            | Self::PrivacyViolation(_)
            | Self::ConfirmationBindingMismatch(_) => ToolStatus::Forbidden,
            Self::RoleViolation { .. } => ToolStatus::Denied,
            Self::CapabilityFailed(_) => ToolStatus::RuntimeError,
        }
    }

    /// End-user message. Authorization failures do not name the rule.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound(name) => format!("Tool {name} not found."),
            Self::MalformedArguments => "Tool arguments must be an object.".to_owned(),
            Self::OwnerOnlyViolation(_)
            | Self::PrivacyViolation(_)
            | Self::RoleViolation { .. }
            | Self::ConfirmationBindingMismatch(_) => PERMISSION_DENIED_MESSAGE.to_owned(),
            Self::ConfirmationNotFound(_) => "Confirmation not found.".to_owned(),
            Self::ConfirmationExpired(_) => "Confirmation expired.".to_owned(),
            Self::ConfirmationSettled(_) => "Confirmation already executed.".to_owned(),
            Self::CapabilityFailed(err) => format!("Tool error: {err}"),
        }
    }
}

impl From<&GateError> for ToolResponse {
    fn from(err: &GateError) -> Self {
        ToolResponse::new(err.status(), err.user_message())
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Audit trail and execution log shared by the engine and the workflow.
#[derive(Debug, Clone)]
pub(crate) struct Sinks {
    audit: Arc<AuditTrail>,
    log: Arc<ExecutionLog>,
}

impl Sinks {
    pub(crate) fn audit(&self, entry: AuditEntry) {
        let stage = entry.stage;
        if let Err(e) = self.audit.append(entry) {
            warn!(error = %e, ?stage, "failed to write audit entry");
        }
    }

    fn record(&self, entry: ExecutionLogEntry) {
        if let Err(e) = self.log.append(entry) {
            warn!(error = %e, "failed to write execution log entry");
        }
    }

    /// Invoke `tool` and record the outcome.
    ///
    /// `confirmation_id` is set when the call runs through a redeemed
    /// confirmation; it selects the confirmed audit stages.
    pub(crate) async fn run_capability(
        &self,
        tool: &ToolDescriptor,
        call: &ToolCall,
        requester: Requester,
        confirmation_id: Option<&str>,
    ) -> ToolResponse {
        let Some(arguments) = call.argument_map() else {
            return ToolResponse::from(&GateError::MalformedArguments);
        };
        let audit = |stage: AuditStage, error: Option<&str>| {
            if !tool.is_audited() {
                return;
            }
            let mut entry = AuditEntry::new(stage, tool, requester, &call.arguments);
            if let Some(id) = confirmation_id {
                entry = entry.with_confirmation(id);
            }
            if let Some(error) = error {
                entry = entry.with_error(error);
            }
            self.audit(entry);
        };

        match tool.invoke(arguments).await {
            Ok(result) => {
                self.record(ExecutionLogEntry::success(
                    &tool.name,
                    requester,
                    &call.arguments,
                    &result,
                    confirmation_id,
                ));
                let (stage, message) = match confirmation_id {
                    Some(_) => (
                        AuditStage::ConfirmedAndExecuted,
                        format!("Confirmed and executed: {}", tool.name),
                    ),
                    None => (
                        AuditStage::ExecutedWithoutConfirmation,
                        format!("Executed: {}", tool.name),
                    ),
                };
                audit(stage, None);
                info!(tool = %tool.name, confirmation_id, "tool executed");
                ToolResponse::success(result, message)
            }
            Err(err) => {
                let detail = err.to_string();
                self.record(ExecutionLogEntry::failure(
                    &tool.name,
                    requester,
                    &call.arguments,
                    &detail,
                    confirmation_id,
                ));
                let stage = match confirmation_id {
                    Some(_) => AuditStage::ConfirmedExecutionError,
                    None => AuditStage::ExecutionError,
                };
                audit(stage, Some(&detail));
                warn!(tool = %tool.name, confirmation_id, error = %detail, "tool failed");
                ToolResponse::from(&GateError::CapabilityFailed(err))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Default capacity of the in-memory audit and execution tails.
const DEFAULT_RECENT_CAPACITY: usize = 1024;

/// Authorizes, confirms and executes tool calls.
#[derive(Debug)]
pub struct ToolEngine {
    policy: PolicyContext,
    registry: Arc<ToolRegistry>,
    confirmations: ConfirmationWorkflow,
    sinks: Sinks,
}

impl ToolEngine {
    /// Build an engine over explicit sinks.
    pub fn new(
        settings: &EngineConfig,
        registry: Arc<ToolRegistry>,
        audit: Arc<AuditTrail>,
        log: Arc<ExecutionLog>,
    ) -> Self {
        let sinks = Sinks { audit, log };
        let confirmations = ConfirmationWorkflow::new(
            settings.confirmation_ttl(),
            settings.result_retention(),
            Arc::clone(&registry),
            sinks.clone(),
        );
        Self {
            policy: PolicyContext {
                owner_id: settings.owner_id,
            },
            registry,
            confirmations,
            sinks,
        }
    }

    /// Build an engine whose sinks live under the configured actions
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the audit file or the actions directory cannot
    /// be created.
    pub fn from_config(config: &Config, registry: Arc<ToolRegistry>) -> anyhow::Result<Self> {
        let actions_dir = config.paths.actions_dir();
        let capacity = config.logging.recent_capacity;
        let audit = AuditTrail::open(actions_dir.join(AUDIT_FILE_NAME), capacity)?;
        let log = ExecutionLog::open_daily(&actions_dir, capacity)?;
        info!(
            actions_dir = %actions_dir.display(),
            owner_id = config.engine.owner_id,
            "tool engine ready"
        );
        Ok(Self::new(
            &config.engine,
            registry,
            Arc::new(audit),
            Arc::new(log),
        ))
    }

    /// Engine with memory-only sinks and default settings.
    pub fn in_memory(owner_id: i64, registry: Arc<ToolRegistry>) -> Self {
        let settings = EngineConfig {
            owner_id,
            ..EngineConfig::default()
        };
        Self::new(
            &settings,
            registry,
            Arc::new(AuditTrail::in_memory(DEFAULT_RECENT_CAPACITY)),
            Arc::new(ExecutionLog::in_memory(DEFAULT_RECENT_CAPACITY)),
        )
    }

    /// Authorize and run (or park) one call.
    #[instrument(
        skip(self, call, caller),
        fields(tool = %call.name, user_id = caller.user_id, chat_id = caller.chat_id)
    )]
    pub async fn execute(&self, call: &ToolCall, caller: &Caller) -> ToolResponse {
        let Some(tool) = self.registry.get(&call.name) else {
            debug!("unknown tool");
            return ToolResponse::from(&GateError::NotFound(call.name.clone()));
        };

        match check_policy(&tool, call, caller, &self.policy) {
            Ok(PolicyDecision::Allow) => {
                self.sinks
                    .run_capability(&tool, call, caller.requester(), None)
                    .await
            }
            Ok(PolicyDecision::RequireConfirmation) => {
                self.confirmations.issue(&tool, call, caller.requester())
            }
            Err(err) => {
                if matches!(err, GateError::OwnerOnlyViolation(_)) && tool.is_audited() {
                    self.sinks.audit(
                        AuditEntry::new(
                            AuditStage::AccessDenied,
                            &tool,
                            caller.requester(),
                            &call.arguments,
                        )
                        .with_error("owner_only"),
                    );
                }
                warn!(error = %err, role = %caller.role, "tool call rejected");
                ToolResponse::from(&err)
            }
        }
    }

    /// Redeem a confirmation token.
    #[instrument(skip(self))]
    pub async fn confirm(&self, confirmation_id: &str, user_id: i64, chat_id: i64) -> ToolResponse {
        self.confirmations
            .redeem(confirmation_id, Requester { user_id, chat_id })
            .await
    }

    /// Withdraw a pending confirmation token.
    #[instrument(skip(self))]
    pub async fn cancel(&self, confirmation_id: &str, user_id: i64, chat_id: i64) -> ToolResponse {
        self.confirmations
            .cancel(confirmation_id, Requester { user_id, chat_id })
            .await
    }

    /// Drop expired tokens and stale cached results.
    pub fn purge_expired(&self) -> usize {
        self.confirmations.purge_expired()
    }

    /// Purge expired tokens every `interval` until the engine is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let engine: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(strong) = engine.upgrade() else {
                    debug!("engine dropped, sweeper exiting");
                    break;
                };
                strong.purge_expired();
            }
        })
    }

    /// The tool registry.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// The confirmation workflow.
    pub fn confirmations(&self) -> &ConfirmationWorkflow {
        &self.confirmations
    }

    /// The audit trail.
    pub fn audit_trail(&self) -> &Arc<AuditTrail> {
        &self.sinks.audit
    }

    /// The execution log.
    pub fn execution_log(&self) -> &Arc<ExecutionLog> {
        &self.sinks.log
    }

    /// Configured owner.
    pub fn owner_id(&self) -> i64 {
        self.policy.owner_id
    }
}
