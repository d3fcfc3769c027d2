//! Shared vocabulary for tool authorization: callers, calls, risk tiers
//! and the standardized per-call response.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role assumed when a caller does not state one.
pub const DEFAULT_ROLE: &str = "user";

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The (user, chat) pair a confirmation is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requester {
    /// Platform user identifier.
    pub user_id: i64,
    /// Chat the request originated from.
    pub chat_id: i64,
}

/// Identity and context of whoever triggered a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    /// Platform user identifier.
    pub user_id: i64,
    /// Chat the message arrived in.
    pub chat_id: i64,
    /// Whether the chat is a private (direct) conversation.
    #[serde(default)]
    pub is_private: bool,
    /// Caller role within the chat (e.g. "owner", "moderator", "user").
    #[serde(default = "default_role")]
    pub role: String,
}

impl Caller {
    /// Build a caller with the default role.
    pub fn new(user_id: i64, chat_id: i64, is_private: bool) -> Self {
        Self {
            user_id,
            chat_id,
            is_private,
            role: DEFAULT_ROLE.to_owned(),
        }
    }

    /// Replace the caller role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// The binding used for confirmation redeem checks.
    pub fn requester(&self) -> Requester {
        Requester {
            user_id: self.user_id,
            chat_id: self.chat_id,
        }
    }
}

fn default_role() -> String {
    DEFAULT_ROLE.to_owned()
}

// ---------------------------------------------------------------------------
// Tool call
// ---------------------------------------------------------------------------

/// A tool invocation requested by the model.
///
/// `arguments` is kept as a raw JSON value at the engine boundary so a
/// non-object payload can be rejected as a validation error rather than
/// failing deserialization. The normalizer always produces an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Registered tool name.
    pub name: String,
    /// Tool arguments; expected to be a JSON object.
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

impl ToolCall {
    /// Build a call from a name and an argument map.
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments: Value::Object(arguments),
        }
    }

    /// Argument map, if the arguments are an object.
    pub fn argument_map(&self) -> Option<&Map<String, Value>> {
        self.arguments.as_object()
    }
}

fn empty_arguments() -> Value {
    Value::Object(Map::new())
}

// ---------------------------------------------------------------------------
// Risk
// ---------------------------------------------------------------------------

/// Coarse risk classification driving audit and confirmation policy.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Harmless reads and notes.
    #[default]
    Low,
    /// Reversible side effects.
    Medium,
    /// Side effects on other users (moderation).
    High,
    /// Changes to the agent itself (persona, prompts).
    Critical,
}

impl RiskLevel {
    /// `true` for `high` and `critical`.
    pub fn is_elevated(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Status and response
// ---------------------------------------------------------------------------

/// Standardized outcome of a single tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// The capability ran and returned a result.
    Success,
    /// The call is parked until the requester redeems its token.
    AwaitingConfirmation,
    /// Owner-only or private-only rule violated, or confirmation binding mismatch.
    Forbidden,
    /// Caller role is not in the tool's allowed roles.
    Denied,
    /// Unknown tool, malformed arguments, unknown or expired confirmation.
    ValidationError,
    /// The capability itself failed.
    RuntimeError,
}

impl ToolStatus {
    /// Aggregation precedence; the highest value wins across a turn.
    pub fn precedence(self) -> u8 {
        match self {
            Self::Denied => 5,
            Self::AwaitingConfirmation => 4,
            Self::Forbidden => 3,
            Self::ValidationError => 2,
            Self::RuntimeError => 1,
            Self::Success => 0,
        }
    }

    /// Snake-case wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Forbidden => "forbidden",
            Self::Denied => "denied",
            Self::ValidationError => "validation_error",
            Self::RuntimeError => "runtime_error",
        }
    }
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response returned by `execute`, `confirm` and `cancel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Standardized status.
    pub status: ToolStatus,
    /// Human-readable message suitable for the end user.
    pub message: String,
    /// Capability result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Token to redeem when `status` is `awaiting_confirmation`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_id: Option<String>,
    /// Set when a confirm call replays a cached result.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub idempotent: bool,
}

impl ToolResponse {
    /// Response with no result payload.
    pub fn new(status: ToolStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            result: None,
            confirmation_id: None,
            idempotent: false,
        }
    }

    /// Successful execution carrying the capability result.
    pub fn success(result: Value, message: impl Into<String>) -> Self {
        Self {
            result: Some(result),
            ..Self::new(ToolStatus::Success, message)
        }
    }

    /// Pending confirmation carrying its token.
    pub fn awaiting(confirmation_id: String, message: impl Into<String>) -> Self {
        Self {
            confirmation_id: Some(confirmation_id),
            ..Self::new(ToolStatus::AwaitingConfirmation, message)
        }
    }

    /// Copy of this response marked as an idempotent replay.
    #[must_use]
    pub fn replayed(&self) -> Self {
        Self {
            idempotent: true,
            ..self.clone()
        }
    }

    /// `true` when the capability ran successfully.
    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}
