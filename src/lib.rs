//! Toolgate: the safety layer between an LLM agent and its tools.
//!
//! Every model-requested tool call goes through one [`agent::ToolEngine`]:
//! the policy gate decides whether it runs now, waits for the requester's
//! confirmation, or is rejected. Executions are recorded in a daily
//! execution log; dangerous tools also leave an append-only audit trail.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod types;

pub mod agent;
pub mod audit;
pub mod tools;

pub mod adapters;
