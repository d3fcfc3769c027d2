//! Normalization of raw model tool-call payloads.
//!
//! Providers disagree on the shape of a tool call. Three are accepted:
//!
//! - canonical `{"name": ..., "arguments": {...}}`
//! - provider objects `{"function": {"name": ..., "arguments": "<json>"}}`
//! - Anthropic-style `{"name": ..., "input": {...}}`
//!
//! Anything else is reported as [`NormalizedCall::Unresolved`] rather than
//! guessed at.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::types::ToolCall;

/// Name reported for calls whose tool name cannot be resolved.
pub const UNKNOWN_TOOL_NAME: &str = "unknown";

#[derive(Debug, Deserialize)]
struct FunctionPayload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawToolCall {
    Provider {
        function: FunctionPayload,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        arguments: Option<Value>,
    },
    Canonical {
        name: Option<String>,
        #[serde(default, alias = "input")]
        arguments: Option<Value>,
    },
}

/// Result of normalizing one payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedCall {
    /// A call with a tool name and object arguments.
    Resolved(ToolCall),
    /// No tool name could be found.
    Unresolved,
}

/// Convert a raw payload into a canonical [`ToolCall`].
pub fn normalize(raw: &Value) -> NormalizedCall {
    let (name, arguments) = match RawToolCall::deserialize(raw) {
        Ok(RawToolCall::Provider {
            function,
            name,
            arguments,
        }) => (
            function.name.or(name),
            function.arguments.filter(|a| !a.is_null()).or(arguments),
        ),
        Ok(RawToolCall::Canonical { name, arguments }) => (name, arguments),
        Err(_) => {
            debug!("unrecognized tool call shape");
            return NormalizedCall::Unresolved;
        }
    };

    match name.filter(|n| !n.trim().is_empty()) {
        Some(name) => NormalizedCall::Resolved(ToolCall::new(name, parse_arguments(arguments))),
        None => NormalizedCall::Unresolved,
    }
}

/// Coerce raw arguments into an object.
///
/// JSON strings are decoded; empty or undecodable strings and any
/// non-object value become an empty map.
pub fn parse_arguments(arguments: Option<Value>) -> Map<String, Value> {
    let value = match arguments {
        Some(Value::String(text)) if text.trim().is_empty() => return Map::new(),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(&text) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(error = %e, "tool arguments are not valid JSON");
                return Map::new();
            }
        },
        Some(other) => other,
        None => return Map::new(),
    };
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
