//! Turn processing: normalization, execution order and aggregation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use toolgate::agent::{InteractionOutcome, LlmTurn, ToolEngine, TurnStatus};
use toolgate::tools::{FnCapability, ToolOptions, ToolRegistry};
use toolgate::types::{Caller, RiskLevel, ToolStatus};

const OWNER: i64 = 1;

fn engine(counter: &Arc<AtomicUsize>) -> ToolEngine {
    let registry = ToolRegistry::new();
    let c = Arc::clone(counter);
    registry.register(
        "notebook_add",
        Arc::new(FnCapability::new(&["text"], move |args| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(args.get("text").cloned().unwrap_or(Value::Null))
        })),
        ToolOptions::default(),
    );
    registry.register(
        "ban_user",
        Arc::new(FnCapability::new(&["user_id"], |_| Ok(json!("banned")))),
        ToolOptions::default().confirmed().risk(RiskLevel::High),
    );
    registry.register(
        "mute_user",
        Arc::new(FnCapability::new(&[], |_| Ok(json!("muted")))),
        ToolOptions::default().roles(["owner", "moderator"]),
    );
    ToolEngine::in_memory(OWNER, Arc::new(registry))
}

fn turn(content: &str, tool_calls: Vec<Value>) -> LlmTurn {
    LlmTurn {
        content: Some(content.to_owned()),
        tool_calls,
    }
}

#[tokio::test]
async fn turn_without_calls_is_responded() {
    let counter = Arc::new(AtomicUsize::new(0));
    let outcome = engine(&counter)
        .process_turn(&turn("Hello!", vec![]), &Caller::new(2, 5, false))
        .await;
    assert_eq!(outcome.status, TurnStatus::Responded);
    assert_eq!(outcome.text, "Hello!");
    assert!(outcome.tools_used.is_empty());
    assert_eq!(outcome.outcome, InteractionOutcome::Success);
}

#[tokio::test]
async fn all_success_turn_appends_messages() {
    let counter = Arc::new(AtomicUsize::new(0));
    let outcome = engine(&counter)
        .process_turn(
            &turn(
                "Noted.",
                vec![
                    json!({"name": "notebook_add", "arguments": {"text": "a"}}),
                    json!({"function": {"name": "notebook_add", "arguments": "{\"text\":\"b\"}"}}),
                ],
            ),
            &Caller::new(2, 5, false),
        )
        .await;

    assert_eq!(outcome.status, TurnStatus::Success);
    assert_eq!(outcome.tools_used, vec!["notebook_add", "notebook_add"]);
    assert_eq!(
        outcome.text,
        "Noted.\n\nExecuted: notebook_add\nExecuted: notebook_add"
    );
    assert_eq!(outcome.tool_results[1].result, Some(json!("b")));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn denied_call_dominates_turn() {
    let counter = Arc::new(AtomicUsize::new(0));
    let outcome = engine(&counter)
        .process_turn(
            &turn(
                "",
                vec![
                    json!({"name": "notebook_add", "arguments": {"text": "a"}}),
                    json!({"name": "ban_user", "arguments": {"user_id": 9}}),
                    json!({"name": "mute_user", "arguments": {}}),
                ],
            ),
            &Caller::new(OWNER, 5, false).with_role("user"),
        )
        .await;

    let statuses: Vec<ToolStatus> = outcome.tool_results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            ToolStatus::Success,
            ToolStatus::AwaitingConfirmation,
            ToolStatus::Denied
        ]
    );
    assert_eq!(outcome.status, TurnStatus::Denied);
    assert_eq!(outcome.outcome, InteractionOutcome::Neutral);
    assert!(outcome.tool_results[1].confirmation_id.is_some());
}

#[tokio::test]
async fn awaiting_confirmation_dominates_without_denied() {
    let counter = Arc::new(AtomicUsize::new(0));
    let outcome = engine(&counter)
        .process_turn(
            &turn(
                "One moment.",
                vec![
                    json!({"name": "ban_user", "arguments": {"user_id": 9}}),
                    json!({"name": "notebook_add", "arguments": "not json"}),
                ],
            ),
            &Caller::new(OWNER, 5, false),
        )
        .await;

    assert_eq!(outcome.status, TurnStatus::AwaitingConfirmation);
    assert_eq!(outcome.outcome, InteractionOutcome::Success);
    assert!(outcome.text.starts_with("One moment.\n\n"));
    assert!(outcome.text.contains("/confirm "));
}

#[tokio::test]
async fn unresolved_call_is_reported_as_unknown() {
    let counter = Arc::new(AtomicUsize::new(0));
    let outcome = engine(&counter)
        .process_turn(
            &turn("", vec![json!({"arguments": {"text": "x"}})]),
            &Caller::new(OWNER, 5, false),
        )
        .await;

    assert_eq!(outcome.status, TurnStatus::ValidationError);
    assert_eq!(outcome.tool_results[0].name, "unknown");
    assert!(outcome.tools_used.is_empty());
    assert_eq!(outcome.outcome, InteractionOutcome::Neutral);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_tool_name_is_validation_error() {
    let counter = Arc::new(AtomicUsize::new(0));
    let outcome = engine(&counter)
        .process_turn(
            &turn("", vec![json!({"name": "launch_rockets"})]),
            &Caller::new(OWNER, 5, false),
        )
        .await;

    assert_eq!(outcome.status, TurnStatus::ValidationError);
    assert_eq!(outcome.tools_used, vec!["launch_rockets"]);
    assert_eq!(outcome.text, "Tool launch_rockets not found.");
}
