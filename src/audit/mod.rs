//! Audit trail for dangerous and confirmation-gated tools.
//!
//! Every authorization and execution stage of an audited tool becomes one
//! JSON line in an append-only sink (usually
//! `{actions_dir}/dangerous_audit.jsonl`). Entries are never rewritten.
//! A bounded tail of recent entries is also kept in memory for inspection.

use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolDescriptor;
use crate::types::{Requester, RiskLevel};

pub mod execution_log;

pub use execution_log::{ExecutionLog, ExecutionLogEntry, ExecutionStatus};

/// File name of the audit trail inside the actions directory.
pub const AUDIT_FILE_NAME: &str = "dangerous_audit.jsonl";

/// Stage of the authorization/execution lifecycle an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStage {
    /// Owner-only rule rejected the caller.
    AccessDenied,
    /// A confirmation token was issued.
    ConfirmationRequested,
    /// The tool ran directly, without a confirmation round-trip.
    ExecutedWithoutConfirmation,
    /// A redeemed confirmation ran the tool successfully.
    ConfirmedAndExecuted,
    /// A redeem attempt came from someone other than the requester.
    ConfirmedAccessDenied,
    /// A redeemed confirmation ran the tool and it failed.
    ConfirmedExecutionError,
    /// A direct execution failed.
    ExecutionError,
    /// The requester withdrew a pending confirmation.
    ConfirmationCancelled,
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the stage happened.
    pub timestamp: DateTime<Utc>,
    /// Tool name.
    pub tool: String,
    /// Who triggered the stage.
    #[serde(flatten)]
    pub requester: Requester,
    /// Arguments as sent by the model.
    pub arguments: Value,
    /// Risk tier of the tool at the time.
    pub risk_level: RiskLevel,
    /// Lifecycle stage.
    pub stage: AuditStage,
    /// Error detail for failed or denied stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Confirmation token, for stages inside a confirmation flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_id: Option<String>,
}

impl AuditEntry {
    /// Record `stage` for `tool` triggered by `requester`.
    pub fn new(
        stage: AuditStage,
        tool: &ToolDescriptor,
        requester: Requester,
        arguments: &Value,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            tool: tool.name.clone(),
            requester,
            arguments: arguments.clone(),
            risk_level: tool.options.risk_level,
            stage,
            error: None,
            confirmation_id: None,
        }
    }

    /// Attach an error description.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach the confirmation token.
    #[must_use]
    pub fn with_confirmation(mut self, confirmation_id: &str) -> Self {
        self.confirmation_id = Some(confirmation_id.to_owned());
        self
    }
}

/// Append-only audit sink.
pub struct AuditTrail {
    writer: Option<Mutex<Box<dyn Write + Send>>>,
    recent: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail")
            .field("persistent", &self.writer.is_some())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl AuditTrail {
    /// Open (or create) an audit file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory or the file cannot be created.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!("failed to create audit directory {}: {e}", parent.display())
            })?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("failed to open audit file {}: {e}", path.display()))?;
        Ok(Self::from_writer(Box::new(file), capacity))
    }

    /// Audit trail writing to an arbitrary writer (for testing).
    pub fn from_writer(writer: Box<dyn Write + Send>, capacity: usize) -> Self {
        Self {
            writer: Some(Mutex::new(writer)),
            recent: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Audit trail that only keeps the in-memory tail.
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            writer: None,
            recent: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Append one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be serialized or written. The
    /// in-memory tail is updated either way.
    pub fn append(&self, entry: AuditEntry) -> anyhow::Result<()> {
        let line = serde_json::to_string(&entry)?;
        push_bounded(&self.recent, self.capacity, entry);

        if let Some(writer) = &self.writer {
            let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
            writeln!(writer, "{line}")?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Recent entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Recent entries belonging to one confirmation token, oldest first.
    pub fn entries_for(&self, confirmation_id: &str) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.confirmation_id.as_deref() == Some(confirmation_id))
            .collect()
    }
}

/// Push onto a bounded in-memory tail, evicting the oldest item.
pub(crate) fn push_bounded<T>(buffer: &Mutex<VecDeque<T>>, capacity: usize, item: T) {
    if capacity == 0 {
        return;
    }
    let mut buffer = buffer.lock().unwrap_or_else(PoisonError::into_inner);
    while buffer.len() >= capacity {
        buffer.pop_front();
    }
    buffer.push_back(item);
}
