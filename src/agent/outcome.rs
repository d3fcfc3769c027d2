//! Per-turn aggregation of tool results.
//!
//! One model turn may request several tools. Each raw call is normalized and
//! executed in order; the results are then folded into a single status and
//! the text shown to the user.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

use crate::types::{Caller, ToolResponse, ToolStatus};

use super::normalize::{normalize, NormalizedCall, UNKNOWN_TOOL_NAME};
use super::ToolEngine;

/// Message recorded for a call whose tool name could not be resolved.
const MISSING_NAME_MESSAGE: &str = "Malformed tool call: missing tool name.";

/// A model response: free text plus the tool calls it requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmTurn {
    /// Free-text content.
    #[serde(default)]
    pub content: Option<String>,
    /// Raw tool-call payloads in request order.
    #[serde(default)]
    pub tool_calls: Vec<Value>,
}

/// Aggregate status of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// No tools were requested; the model just replied.
    Responded,
    /// Every call succeeded.
    Success,
    /// At least one call is waiting for confirmation.
    AwaitingConfirmation,
    /// At least one call was forbidden.
    Forbidden,
    /// At least one call was denied by role.
    Denied,
    /// At least one call failed validation.
    ValidationError,
    /// At least one capability failed.
    RuntimeError,
}

impl From<ToolStatus> for TurnStatus {
    fn from(status: ToolStatus) -> Self {
        match status {
            ToolStatus::Success => Self::Success,
            ToolStatus::AwaitingConfirmation => Self::AwaitingConfirmation,
            ToolStatus::Forbidden => Self::Forbidden,
            ToolStatus::Denied => Self::Denied,
            ToolStatus::ValidationError => Self::ValidationError,
            ToolStatus::RuntimeError => Self::RuntimeError,
        }
    }
}

/// Coarse classification for downstream learning signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionOutcome {
    /// The turn went as intended.
    Success,
    /// The turn was refused or rejected for a benign reason.
    Neutral,
    /// Something failed or a forbidden action was attempted.
    Negative,
}

impl From<TurnStatus> for InteractionOutcome {
    fn from(status: TurnStatus) -> Self {
        match status {
            TurnStatus::Responded | TurnStatus::Success | TurnStatus::AwaitingConfirmation => {
                Self::Success
            }
            TurnStatus::Denied | TurnStatus::ValidationError => Self::Neutral,
            TurnStatus::Forbidden | TurnStatus::RuntimeError => Self::Negative,
        }
    }
}

/// Result of one call within a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallOutcome {
    /// Tool name, or `unknown` when unresolved.
    pub name: String,
    /// Call status.
    pub status: ToolStatus,
    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Capability result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Token for calls awaiting confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_id: Option<String>,
}

impl ToolCallOutcome {
    fn from_response(name: String, response: ToolResponse) -> Self {
        Self {
            name,
            status: response.status,
            message: Some(response.message).filter(|m| !m.is_empty()),
            result: response.result,
            confirmation_id: response.confirmation_id,
        }
    }

    fn unresolved() -> Self {
        Self {
            name: UNKNOWN_TOOL_NAME.to_owned(),
            status: ToolStatus::ValidationError,
            message: Some(MISSING_NAME_MESSAGE.to_owned()),
            result: None,
            confirmation_id: None,
        }
    }
}

/// Everything the caller needs to reply to the user for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    /// Aggregate status.
    pub status: TurnStatus,
    /// Text to show the user.
    pub text: String,
    /// Names of resolved tools, in call order.
    pub tools_used: Vec<String>,
    /// Per-call results, in call order.
    pub tool_results: Vec<ToolCallOutcome>,
    /// Downstream classification of the turn.
    pub outcome: InteractionOutcome,
}

/// Fold per-call statuses into one; the highest precedence wins.
///
/// An empty slice is [`TurnStatus::Responded`].
pub fn aggregate_status(results: &[ToolCallOutcome]) -> TurnStatus {
    results
        .iter()
        .map(|r| r.status)
        .max_by_key(|s| s.precedence())
        .map_or(TurnStatus::Responded, TurnStatus::from)
}

/// Model content followed by any per-call messages after a blank line.
pub fn build_user_text(content: &str, results: &[ToolCallOutcome]) -> String {
    let messages: Vec<&str> = results
        .iter()
        .filter_map(|r| r.message.as_deref())
        .filter(|m| !m.is_empty())
        .collect();
    match (content.is_empty(), messages.is_empty()) {
        (_, true) => content.to_owned(),
        (true, false) => messages.join("\n"),
        (false, false) => format!("{content}\n\n{}", messages.join("\n")),
    }
}

impl ToolEngine {
    /// Run every tool call of a model turn in order and aggregate the
    /// results.
    #[instrument(
        skip(self, turn, caller),
        fields(calls = turn.tool_calls.len(), user_id = caller.user_id, chat_id = caller.chat_id)
    )]
    pub async fn process_turn(&self, turn: &LlmTurn, caller: &Caller) -> TurnOutcome {
        let content = turn.content.as_deref().unwrap_or_default();
        let mut tool_results = Vec::with_capacity(turn.tool_calls.len());
        let mut tools_used = Vec::new();

        for raw in &turn.tool_calls {
            match normalize(raw) {
                NormalizedCall::Resolved(call) => {
                    let response = self.execute(&call, caller).await;
                    tools_used.push(call.name.clone());
                    tool_results.push(ToolCallOutcome::from_response(call.name, response));
                }
                NormalizedCall::Unresolved => tool_results.push(ToolCallOutcome::unresolved()),
            }
        }

        let status = aggregate_status(&tool_results);
        let text = build_user_text(content, &tool_results);
        let outcome = InteractionOutcome::from(status);
        info!(?status, ?outcome, tools = tools_used.len(), "turn processed");

        TurnOutcome {
            status,
            text,
            tools_used,
            tool_results,
            outcome,
        }
    }
}
