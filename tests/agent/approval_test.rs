//! Confirmation workflow tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use toolgate::agent::{ToolEngine, CONFIRMATION_ID_LEN};
use toolgate::audit::{AuditStage, ExecutionStatus};
use toolgate::tools::{CapabilityError, FnCapability, ToolOptions, ToolRegistry};
use toolgate::types::{Caller, RiskLevel, ToolCall, ToolStatus};

const OWNER: i64 = 1;
const CHAT: i64 = 100;

fn gated_engine(counter: Arc<AtomicUsize>, fail: bool) -> ToolEngine {
    let registry = ToolRegistry::new();
    registry.register(
        "ban_user",
        Arc::new(FnCapability::new(&["user_id"], move |args| {
            counter.fetch_add(1, Ordering::SeqCst);
            if fail {
                return Err(CapabilityError::Failed("platform refused".to_owned()));
            }
            Ok(json!({"banned": args.get("user_id").cloned().unwrap_or(Value::Null)}))
        })),
        ToolOptions::default()
            .confirmed()
            .risk(RiskLevel::High)
            .describe("Ban a user from the chat"),
    );
    ToolEngine::in_memory(OWNER, Arc::new(registry))
}

fn ban_call() -> ToolCall {
    ToolCall {
        name: "ban_user".to_owned(),
        arguments: json!({"user_id": 99}),
    }
}

fn owner() -> Caller {
    Caller::new(OWNER, CHAT, false)
}

async fn issue(engine: &ToolEngine) -> String {
    let response = engine.execute(&ban_call(), &owner()).await;
    assert_eq!(response.status, ToolStatus::AwaitingConfirmation);
    match response.confirmation_id {
        Some(id) => id,
        None => panic!("awaiting response should carry a token: {response:?}"),
    }
}

#[tokio::test]
async fn gated_call_returns_fixed_length_unique_tokens() {
    let counter = Arc::new(AtomicUsize::new(0));
    let engine = gated_engine(Arc::clone(&counter), false);

    let mut seen = HashSet::new();
    for _ in 0..200 {
        let id = issue(&engine).await;
        assert_eq!(id.len(), CONFIRMATION_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(seen.insert(id), "token repeated");
    }
    assert_eq!(engine.confirmations().pending_count(), 200);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn awaiting_message_mentions_token_and_description() {
    let engine = gated_engine(Arc::new(AtomicUsize::new(0)), false);
    let response = engine.execute(&ban_call(), &owner()).await;
    let id = response.confirmation_id.clone().unwrap_or_default();
    assert!(response.message.contains("Ban a user from the chat"));
    assert!(response.message.contains(&format!("/confirm {id}")));
    assert!(response.result.is_none());
}

#[tokio::test]
async fn confirm_runs_once_then_replays() {
    let counter = Arc::new(AtomicUsize::new(0));
    let engine = gated_engine(Arc::clone(&counter), false);
    let id = issue(&engine).await;

    let first = engine.confirm(&id, OWNER, CHAT).await;
    assert_eq!(first.status, ToolStatus::Success);
    assert!(!first.idempotent);
    assert_eq!(first.result, Some(json!({"banned": 99})));
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let second = engine.confirm(&id, OWNER, CHAT).await;
    assert!(second.idempotent);
    assert_eq!(second.status, first.status);
    assert_eq!(second.message, first.message);
    assert_eq!(second.result, first.result);
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let log = engine.execution_log().entries();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, ExecutionStatus::SuccessConfirmed);
    assert_eq!(log[0].confirmation_id.as_deref(), Some(id.as_str()));
}

#[tokio::test]
async fn failed_confirmation_is_cached_too() {
    let counter = Arc::new(AtomicUsize::new(0));
    let engine = gated_engine(Arc::clone(&counter), true);
    let id = issue(&engine).await;

    let first = engine.confirm(&id, OWNER, CHAT).await;
    assert_eq!(first.status, ToolStatus::RuntimeError);
    assert!(first.message.contains("platform refused"));

    let second = engine.confirm(&id, OWNER, CHAT).await;
    assert_eq!(second.status, ToolStatus::RuntimeError);
    assert!(second.idempotent);
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let stages: Vec<AuditStage> = engine
        .audit_trail()
        .entries_for(&id)
        .into_iter()
        .map(|e| e.stage)
        .collect();
    assert_eq!(
        stages,
        vec![
            AuditStage::ConfirmationRequested,
            AuditStage::ConfirmedExecutionError
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn expired_token_is_rejected_then_forgotten() {
    let counter = Arc::new(AtomicUsize::new(0));
    let engine = gated_engine(Arc::clone(&counter), false);
    let id = issue(&engine).await;

    tokio::time::advance(engine.confirmations().ttl() + Duration::from_secs(1)).await;

    let expired = engine.confirm(&id, OWNER, CHAT).await;
    assert_eq!(expired.status, ToolStatus::ValidationError);
    assert_eq!(expired.message, "Confirmation expired.");

    let again = engine.confirm(&id, OWNER, CHAT).await;
    assert_eq!(again.status, ToolStatus::ValidationError);
    assert_eq!(again.message, "Confirmation not found.");
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn token_is_valid_until_ttl_elapses() {
    let engine = gated_engine(Arc::new(AtomicUsize::new(0)), false);
    let id = issue(&engine).await;

    tokio::time::advance(engine.confirmations().ttl() - Duration::from_secs(1)).await;
    let response = engine.confirm(&id, OWNER, CHAT).await;
    assert_eq!(response.status, ToolStatus::Success);
}

#[tokio::test]
async fn binding_mismatch_is_forbidden_and_consumes_token() {
    let counter = Arc::new(AtomicUsize::new(0));
    let engine = gated_engine(Arc::clone(&counter), false);
    let id = issue(&engine).await;

    let stranger = engine.confirm(&id, 2, CHAT).await;
    assert_eq!(stranger.status, ToolStatus::Forbidden);
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    // Same user, different chat is a mismatch too.
    let id2 = issue(&engine).await;
    let other_chat = engine.confirm(&id2, OWNER, CHAT + 1).await;
    assert_eq!(other_chat.status, ToolStatus::Forbidden);

    let owner_retry = engine.confirm(&id, OWNER, CHAT).await;
    assert_eq!(owner_retry.status, ToolStatus::ValidationError);
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    let denied = engine.audit_trail().entries_for(&id);
    assert_eq!(
        denied.last().map(|e| e.stage),
        Some(AuditStage::ConfirmedAccessDenied)
    );
    assert_eq!(denied.last().map(|e| e.requester.user_id), Some(2));
}

#[tokio::test]
async fn unknown_token_is_not_found() {
    let engine = gated_engine(Arc::new(AtomicUsize::new(0)), false);
    let response = engine.confirm("doesnotexist", OWNER, CHAT).await;
    assert_eq!(response.status, ToolStatus::ValidationError);
    assert_eq!(response.message, "Confirmation not found.");
}

#[tokio::test]
async fn cancel_withdraws_pending_call() {
    let counter = Arc::new(AtomicUsize::new(0));
    let engine = gated_engine(Arc::clone(&counter), false);
    let id = issue(&engine).await;

    let response = engine.cancel(&id, OWNER, CHAT).await;
    assert_eq!(response.status, ToolStatus::Denied);

    let confirm = engine.confirm(&id, OWNER, CHAT).await;
    assert_eq!(confirm.status, ToolStatus::ValidationError);
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    let stages: Vec<AuditStage> = engine
        .audit_trail()
        .entries_for(&id)
        .into_iter()
        .map(|e| e.stage)
        .collect();
    assert_eq!(
        stages,
        vec![
            AuditStage::ConfirmationRequested,
            AuditStage::ConfirmationCancelled
        ]
    );
}

#[tokio::test]
async fn cancel_by_stranger_keeps_token() {
    let counter = Arc::new(AtomicUsize::new(0));
    let engine = gated_engine(Arc::clone(&counter), false);
    let id = issue(&engine).await;

    let response = engine.cancel(&id, 2, CHAT).await;
    assert_eq!(response.status, ToolStatus::Forbidden);
    assert!(engine.confirmations().pending(&id).is_some());

    let confirm = engine.confirm(&id, OWNER, CHAT).await;
    assert_eq!(confirm.status, ToolStatus::Success);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancel_after_execution_keeps_cached_result() {
    let engine = gated_engine(Arc::new(AtomicUsize::new(0)), false);
    let id = issue(&engine).await;
    let first = engine.confirm(&id, OWNER, CHAT).await;

    let cancel = engine.cancel(&id, OWNER, CHAT).await;
    assert_eq!(cancel.status, ToolStatus::ValidationError);

    let replay = engine.confirm(&id, OWNER, CHAT).await;
    assert!(replay.idempotent);
    assert_eq!(replay.result, first.result);
}

#[tokio::test(start_paused = true)]
async fn purge_drops_only_expired_tokens() {
    let engine = gated_engine(Arc::new(AtomicUsize::new(0)), false);
    let old = issue(&engine).await;

    tokio::time::advance(Duration::from_secs(40)).await;
    let fresh = issue(&engine).await;

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(engine.purge_expired(), 1);

    assert!(engine.confirmations().pending(&old).is_none());
    assert!(engine.confirmations().pending(&fresh).is_some());
    assert_eq!(engine.confirmations().pending_count(), 1);
}

#[tokio::test]
async fn pending_entry_records_binding_and_call() {
    let engine = gated_engine(Arc::new(AtomicUsize::new(0)), false);
    let id = issue(&engine).await;

    let pending = match engine.confirmations().pending(&id) {
        Some(p) => p,
        None => panic!("token {id} should be pending"),
    };
    assert_eq!(pending.confirmation_id, id);
    assert_eq!(pending.requester, owner().requester());
    assert_eq!(pending.call, ban_call());
}
