//! Execution log: one JSON line per attempted capability invocation.
//!
//! In production entries go to a daily file `{actions_dir}/YYYY-MM-DD.jsonl`.
//! Unlike the audit trail this covers every tool, successful or not.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::types::Requester;

use super::push_bounded;

/// Outcome recorded for an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Direct execution succeeded.
    Success,
    /// Execution after a redeemed confirmation succeeded.
    SuccessConfirmed,
    /// The capability failed.
    RuntimeError,
}

/// One invocation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// When the invocation finished.
    pub timestamp: DateTime<Utc>,
    /// Tool name.
    pub tool: String,
    /// Who triggered the invocation.
    #[serde(flatten)]
    pub requester: Requester,
    /// Arguments as sent by the model.
    pub arguments: Value,
    /// Capability result, if it succeeded.
    pub result: Option<Value>,
    /// Invocation outcome.
    pub status: ExecutionStatus,
    /// Error text, if it failed.
    pub error: Option<String>,
    /// Confirmation token when the call ran through a confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_id: Option<String>,
}

impl ExecutionLogEntry {
    /// Record a successful invocation.
    pub fn success(
        tool: &str,
        requester: Requester,
        arguments: &Value,
        result: &Value,
        confirmation_id: Option<&str>,
    ) -> Self {
        let status = if confirmation_id.is_some() {
            ExecutionStatus::SuccessConfirmed
        } else {
            ExecutionStatus::Success
        };
        Self {
            timestamp: Utc::now(),
            tool: tool.to_owned(),
            requester,
            arguments: arguments.clone(),
            result: Some(result.clone()),
            status,
            error: None,
            confirmation_id: confirmation_id.map(str::to_owned),
        }
    }

    /// Record a failed invocation.
    pub fn failure(
        tool: &str,
        requester: Requester,
        arguments: &Value,
        error: &str,
        confirmation_id: Option<&str>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            tool: tool.to_owned(),
            requester,
            arguments: arguments.clone(),
            result: None,
            status: ExecutionStatus::RuntimeError,
            error: Some(error.to_owned()),
            confirmation_id: confirmation_id.map(str::to_owned),
        }
    }
}

enum Destination {
    /// One file per UTC day inside a directory.
    Daily { dir: PathBuf, lock: Mutex<()> },
    /// A single arbitrary writer.
    Writer(Mutex<Box<dyn Write + Send>>),
    /// Memory only.
    None,
}

/// Append-only execution log.
pub struct ExecutionLog {
    destination: Destination,
    recent: Mutex<VecDeque<ExecutionLogEntry>>,
    capacity: usize,
}

impl std::fmt::Debug for ExecutionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let destination = match &self.destination {
            Destination::Daily { dir, .. } => dir.display().to_string(),
            Destination::Writer(_) => "<writer>".to_owned(),
            Destination::None => "<memory>".to_owned(),
        };
        f.debug_struct("ExecutionLog")
            .field("destination", &destination)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl ExecutionLog {
    /// Log into daily files under `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open_daily(dir: impl AsRef<Path>, capacity: usize) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| {
            anyhow::anyhow!("failed to create actions directory {}: {e}", dir.display())
        })?;
        Ok(Self::with_destination(
            Destination::Daily {
                dir: dir.to_path_buf(),
                lock: Mutex::new(()),
            },
            capacity,
        ))
    }

    /// Log into an arbitrary writer (for testing).
    pub fn from_writer(writer: Box<dyn Write + Send>, capacity: usize) -> Self {
        Self::with_destination(Destination::Writer(Mutex::new(writer)), capacity)
    }

    /// Keep only the in-memory tail.
    pub fn in_memory(capacity: usize) -> Self {
        Self::with_destination(Destination::None, capacity)
    }

    fn with_destination(destination: Destination, capacity: usize) -> Self {
        Self {
            destination,
            recent: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Path of the daily file an entry stamped at `timestamp` goes to.
    pub fn daily_path(dir: &Path, timestamp: DateTime<Utc>) -> PathBuf {
        dir.join(format!("{}.jsonl", timestamp.format("%Y-%m-%d")))
    }

    /// Append one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be serialized or written. The
    /// in-memory tail is updated either way.
    pub fn append(&self, entry: ExecutionLogEntry) -> anyhow::Result<()> {
        let line = serde_json::to_string(&entry)?;
        let timestamp = entry.timestamp;
        trace!(tool = %entry.tool, status = ?entry.status, "execution logged");
        push_bounded(&self.recent, self.capacity, entry);

        match &self.destination {
            Destination::Daily { dir, lock } => {
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                let path = Self::daily_path(dir, timestamp);
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(|e| anyhow::anyhow!("failed to open {}: {e}", path.display()))?;
                writeln!(file, "{line}")?;
            }
            Destination::Writer(writer) => {
                let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
                writeln!(writer, "{line}")?;
                writer.flush()?;
            }
            Destination::None => {}
        }
        Ok(())
    }

    /// Recent entries, oldest first.
    pub fn entries(&self) -> Vec<ExecutionLogEntry> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
