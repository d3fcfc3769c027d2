//! Tests for the audit trail and execution log sinks.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use toolgate::audit::{
    AuditEntry, AuditStage, AuditTrail, ExecutionLog, ExecutionLogEntry, AUDIT_FILE_NAME,
};
use toolgate::tools::{FnCapability, ToolDescriptor, ToolOptions};
use toolgate::types::{Requester, RiskLevel};

fn tool() -> ToolDescriptor {
    ToolDescriptor {
        name: "update_personality".to_owned(),
        capability: Arc::new(FnCapability::new(&[], |_| Ok(Value::Null))),
        options: ToolOptions::default().risk(RiskLevel::Critical),
    }
}

fn requester() -> Requester {
    Requester {
        user_id: 5,
        chat_id: 6,
    }
}

#[test]
fn audit_file_is_appended_across_reopen() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let path = tmp.path().join(AUDIT_FILE_NAME);

    for stage in [AuditStage::ConfirmationRequested, AuditStage::ConfirmedAndExecuted] {
        let trail = AuditTrail::open(&path, 4).expect("open");
        let entry = AuditEntry::new(stage, &tool(), requester(), &json!({"tone": "dry"}))
            .with_confirmation("tok");
        trail.append(entry).expect("append");
    }

    let content = std::fs::read_to_string(&path).expect("read");
    let entries: Vec<AuditEntry> = content
        .lines()
        .map(|l| serde_json::from_str(l).expect("entry"))
        .collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].stage, AuditStage::ConfirmationRequested);
    assert_eq!(entries[1].stage, AuditStage::ConfirmedAndExecuted);
    assert_eq!(entries[1].risk_level, RiskLevel::Critical);
    assert_eq!(entries[1].arguments, json!({"tone": "dry"}));
}

#[test]
fn daily_path_uses_utc_date() {
    let dir = std::path::Path::new("/var/actions");
    let stamp = Utc
        .with_ymd_and_hms(2026, 3, 9, 23, 59, 0)
        .single()
        .expect("valid time");
    assert_eq!(
        ExecutionLog::daily_path(dir, stamp),
        dir.join("2026-03-09.jsonl")
    );
}

#[test]
fn execution_log_tail_is_bounded() {
    let log = ExecutionLog::in_memory(2);
    for n in 0..3 {
        log.append(ExecutionLogEntry::success(
            "echo",
            requester(),
            &json!({}),
            &json!(n),
            None,
        ))
        .expect("append");
    }
    let entries = log.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].result, Some(json!(1)));
}
