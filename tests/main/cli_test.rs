//! CLI contract tests.

use assert_cmd::Command;

fn write_config(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("toolgate.toml");
    let contents = format!(
        r#"
[engine]
owner_id = 42
confirmation_ttl_secs = 120
sweep_interval_secs = 0

[paths]
actions_dir = "{actions}"
logs_dir = "{logs}"

[[tools]]
name = "echo"
requires_confirmation = true
risk_level = "high"
"#,
        actions = dir.join("actions").display(),
        logs = dir.join("logs").display(),
    );
    std::fs::write(&path, contents).expect("write config");
    path
}

#[test]
fn check_prints_resolved_settings() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let config = write_config(tmp.path());

    let output = Command::cargo_bin("toolgate")
        .expect("binary")
        .env_remove("TOOLGATE_OWNER_ID")
        .args(["check", "--config"])
        .arg(&config)
        .output()
        .expect("run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("owner_id = 42"));
    assert!(stdout.contains("confirmation_ttl_secs = 120"));
    assert!(stdout.contains("tool echo owner=false private=false confirm=true risk=high"));
}

#[test]
fn serve_answers_each_line_and_exits_on_eof() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let config = write_config(tmp.path());

    let input = concat!(
        r#"{"op":"execute","tool_call":{"name":"echo","arguments":{"value":"hi"}},"caller":{"user_id":42,"chat_id":1,"is_private":true}}"#,
        "\n",
        "garbage\n",
    );
    let output = Command::cargo_bin("toolgate")
        .expect("binary")
        .env_remove("TOOLGATE_OWNER_ID")
        .env_remove("TOOLGATE_ACTIONS_DIR")
        .env_remove("TOOLGATE_LOGS_DIR")
        .args(["serve", "--config"])
        .arg(&config)
        .write_stdin(input)
        .output()
        .expect("run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).expect("reply is JSON"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["status"], "awaiting_confirmation");
    assert_eq!(lines[1]["status"], "validation_error");

    let audit = tmp.path().join("actions").join("dangerous_audit.jsonl");
    let audit = std::fs::read_to_string(audit).expect("audit file");
    assert!(audit.contains("confirmation_requested"));
}

#[test]
fn unknown_subcommand_fails() {
    Command::cargo_bin("toolgate")
        .expect("binary")
        .arg("launch")
        .assert()
        .failure();
}
