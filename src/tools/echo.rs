//! Built-in `echo` capability.
//!
//! Returns its `value` argument unchanged. The binary registers it so the
//! authorization and confirmation flow can be exercised end to end without
//! any side-effecting integration.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{Capability, CapabilityError};

/// Name the binary registers [`EchoTool`] under.
pub const ECHO_TOOL_NAME: &str = "echo";

/// Capability that echoes its `value` argument.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoTool;

#[async_trait]
impl Capability for EchoTool {
    fn parameters(&self) -> &[&'static str] {
        &["value"]
    }

    async fn invoke(&self, arguments: Map<String, Value>) -> Result<Value, CapabilityError> {
        match arguments.get("value") {
            Some(Value::String(s)) => Ok(Value::String(format!("echo:{s}"))),
            Some(other) => Ok(other.clone()),
            None => Err(CapabilityError::InvalidArguments(
                "missing required field: value".to_owned(),
            )),
        }
    }
}
