//! JSON-Lines adapter over stdin/stdout.
//!
//! Each input line is one request tagged by `op`; each produces exactly
//! one output line. A line that fails to parse yields a
//! `validation_error` response and the loop keeps going.
//!
//! ```text
//! {"op":"execute","tool_call":{"name":"echo","arguments":{"value":"hi"}},"caller":{"user_id":1,"chat_id":1,"is_private":true}}
//! {"op":"confirm","confirmation_id":"Ab3…","user_id":1,"chat_id":1}
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::agent::{LlmTurn, ToolEngine, TurnOutcome};
use crate::tools::ToolSummary;
use crate::types::{Caller, ToolCall, ToolResponse, ToolStatus};

/// One protocol request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Authorize and run one canonical call.
    Execute {
        /// The call.
        tool_call: ToolCall,
        /// Who made it.
        caller: Caller,
    },
    /// Redeem a confirmation token.
    Confirm {
        /// Token.
        confirmation_id: String,
        /// Redeeming user.
        user_id: i64,
        /// Chat the redeem came from.
        chat_id: i64,
    },
    /// Withdraw a pending confirmation.
    Cancel {
        /// Token.
        confirmation_id: String,
        /// Cancelling user.
        user_id: i64,
        /// Chat the cancel came from.
        chat_id: i64,
    },
    /// Run a whole model turn.
    Process {
        /// Model free text.
        #[serde(default)]
        content: Option<String>,
        /// Raw tool-call payloads.
        #[serde(default)]
        tool_calls: Vec<Value>,
        /// Who the turn is for.
        caller: Caller,
    },
    /// List registered tools.
    Tools,
}

/// One protocol reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    /// Reply to `execute`, `confirm`, `cancel` and malformed lines.
    Tool(ToolResponse),
    /// Reply to `process`.
    Turn(TurnOutcome),
    /// Reply to `tools`.
    Tools {
        /// Registered tools, sorted by name.
        tools: Vec<ToolSummary>,
    },
}

/// Dispatch one request to the engine.
pub async fn handle(engine: &ToolEngine, request: Request) -> Reply {
    match request {
        Request::Execute { tool_call, caller } => {
            Reply::Tool(engine.execute(&tool_call, &caller).await)
        }
        Request::Confirm {
            confirmation_id,
            user_id,
            chat_id,
        } => Reply::Tool(engine.confirm(&confirmation_id, user_id, chat_id).await),
        Request::Cancel {
            confirmation_id,
            user_id,
            chat_id,
        } => Reply::Tool(engine.cancel(&confirmation_id, user_id, chat_id).await),
        Request::Process {
            content,
            tool_calls,
            caller,
        } => {
            let turn = LlmTurn {
                content,
                tool_calls,
            };
            Reply::Turn(engine.process_turn(&turn, &caller).await)
        }
        Request::Tools => Reply::Tools {
            tools: engine.registry().summaries(),
        },
    }
}

/// Parse one input line into a reply.
pub async fn handle_line(engine: &ToolEngine, line: &str) -> Reply {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => handle(engine, request).await,
        Err(e) => malformed(e),
    }
}

fn malformed(error: impl std::fmt::Display) -> Reply {
    warn!(error = %error, "malformed request line");
    Reply::Tool(ToolResponse::new(
        ToolStatus::ValidationError,
        format!("Malformed request: {error}"),
    ))
}

/// Serve requests from `reader` until EOF, writing one reply per line.
///
/// Blank lines are skipped and non-UTF-8 lines get a malformed-request
/// reply. Returns the number of requests answered.
///
/// # Errors
///
/// Returns an error if reading input or writing a reply fails.
pub async fn serve<R, W>(
    engine: &ToolEngine,
    mut reader: R,
    mut writer: W,
) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    let mut answered = 0usize;

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .context("failed to read request")?;
        if read == 0 {
            break;
        }
        let reply = match std::str::from_utf8(&buf) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                handle_line(engine, line).await
            }
            Err(e) => malformed(e),
        };
        let mut out = serde_json::to_string(&reply).context("failed to encode reply")?;
        out.push('\n');
        writer
            .write_all(out.as_bytes())
            .await
            .context("failed to write reply")?;
        writer.flush().await.context("failed to flush reply")?;
        answered = answered.saturating_add(1);
        debug!(answered, "request answered");
    }

    info!(answered, "input closed, stdio loop finished");
    Ok(answered)
}
