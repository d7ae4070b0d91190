//! The stdio adapter against a fake CLI: a shell script that speaks just
//! enough stream-json to exercise framing, routing, and failure handling.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;
use tempfile::TempDir;

use claude_session::combinators;
use claude_session::message::Message;
use claude_session::options::{QueryOverrides, SessionOptions};
use claude_session::{Session, SessionError};

const INIT: &str = r#"{"type":"system","subtype":"init","session_id":"S","cwd":"/","model":"fake-model","permission_mode":"default","tools":[],"mcp_servers":[]}"#;
const ASSISTANT: &str = r#"{"type":"assistant","session_id":"S","message":{"id":"m1","model":"fake-model","content":[{"type":"text","text":"Hi"}]}}"#;
const RESULT: &str = r#"{"type":"result","subtype":"success","is_error":false,"duration_ms":5,"duration_api_ms":4,"num_turns":1,"result":"Hi","total_cost_usd":0.001,"session_id":"S"}"#;

fn fake_cli(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("fake-claude");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

fn options(binary: PathBuf) -> SessionOptions {
    SessionOptions {
        binary,
        timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

#[tokio::test]
async fn hello_through_a_real_subprocess() {
    let dir = TempDir::new().unwrap();
    let binary = fake_cli(
        &dir,
        &format!("read -r line\nprintf '%s\\n' '{INIT}' '{ASSISTANT}' '{RESULT}'"),
    );
    let session = Session::open(options(binary)).unwrap();

    let stream = session.stream("hello", QueryOverrides::default()).await.unwrap();
    let collected = combinators::collect(stream).await.unwrap();

    assert_eq!(collected.text, "Hi");
    assert_eq!(collected.result.unwrap().result_text(), Some("Hi"));
    assert_eq!(session.session_id().await.as_deref(), Some("S"));
    session.stop().await.unwrap();
}

#[tokio::test]
async fn two_queries_share_one_subprocess() {
    let dir = TempDir::new().unwrap();
    let binary = fake_cli(
        &dir,
        &format!(
            "while read -r line; do\nprintf '%s\\n' '{INIT}' '{ASSISTANT}' '{RESULT}'\ndone"
        ),
    );
    let session = Session::open(options(binary)).unwrap();

    assert_eq!(session.send("one", QueryOverrides::default()).await.unwrap(), "Hi");
    assert_eq!(session.send("two", QueryOverrides::default()).await.unwrap(), "Hi");
    session.stop().await.unwrap();
}

#[tokio::test]
async fn undecodable_lines_are_dropped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let binary = fake_cli(
        &dir,
        &format!(
            "read -r line\nprintf '%s\\n' '{INIT}' '{{this is not json' '{ASSISTANT}' '{RESULT}'"
        ),
    );
    let session = Session::open(options(binary)).unwrap();

    let stream = session.stream("hello", QueryOverrides::default()).await.unwrap();
    let items: Vec<_> = stream.collect().await;

    // The garbage line produced a diagnostic, not a stream error.
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|item| item.is_ok()));
    assert!(matches!(
        items.last().unwrap().as_ref().unwrap(),
        Message::Result(_)
    ));
    session.stop().await.unwrap();
}

#[tokio::test]
async fn outbound_frame_shape_and_env_passthrough() {
    let dir = TempDir::new().unwrap();
    let frame_out = dir.path().join("frame.json");
    let binary = fake_cli(
        &dir,
        &format!(
            "read -r line\nprintf '%s\\n' \"$line\" > \"$FRAME_OUT\"\nprintf '%s\\n' '{INIT}' '{RESULT}'"
        ),
    );
    let mut opts = options(binary);
    opts.env
        .insert("FRAME_OUT".into(), frame_out.display().to_string());
    let session = Session::open(opts).unwrap();

    session.send("what is 2+2?", QueryOverrides::default()).await.unwrap();

    let written = fs::read_to_string(&frame_out).unwrap();
    let frame: serde_json::Value = serde_json::from_str(written.trim()).unwrap();
    assert_eq!(frame["type"], "user");
    assert_eq!(frame["message"]["role"], "user");
    assert_eq!(frame["message"]["content"], "what is 2+2?");
    // No resume id cached yet on the first query.
    assert_eq!(frame["session_id"], "default");
    assert!(frame["parent_tool_use_id"].is_null());
    session.stop().await.unwrap();
}

#[tokio::test]
async fn per_query_session_id_override_wins_on_the_frame() {
    let dir = TempDir::new().unwrap();
    let frame_out = dir.path().join("frame.json");
    let binary = fake_cli(
        &dir,
        &format!(
            "read -r line\nprintf '%s\\n' \"$line\" > \"$FRAME_OUT\"\nprintf '%s\\n' '{INIT}' '{RESULT}'"
        ),
    );
    let mut opts = options(binary);
    opts.env
        .insert("FRAME_OUT".into(), frame_out.display().to_string());
    let session = Session::open(opts).unwrap();

    let overrides = QueryOverrides {
        session_id: Some("forced-id".into()),
        ..Default::default()
    };
    session.send("hello", overrides).await.unwrap();

    let written = fs::read_to_string(&frame_out).unwrap();
    let frame: serde_json::Value = serde_json::from_str(written.trim()).unwrap();
    assert_eq!(frame["session_id"], "forced-id");
    session.stop().await.unwrap();
}

#[tokio::test]
async fn missing_binary_fails_provisioning() {
    let session = Session::open(options(PathBuf::from("/nonexistent/claude-xyz"))).unwrap();
    let err = session.send("hello", QueryOverrides::default()).await.unwrap_err();
    let SessionError::ProvisioningFailed(reason) = err else {
        panic!("expected ProvisioningFailed, got {err:?}");
    };
    assert!(reason.contains("not found"), "unexpected reason: {reason}");
}

#[tokio::test]
async fn silent_subprocess_times_out() {
    let dir = TempDir::new().unwrap();
    let binary = fake_cli(&dir, "read -r line\nsleep 30");
    let mut opts = options(binary);
    opts.interrupt_grace = Some(Duration::from_millis(100));
    let session = Session::open(opts).unwrap();

    let overrides = QueryOverrides {
        timeout: Some(Duration::from_millis(300)),
        ..Default::default()
    };
    let stream = session.stream("hello", overrides).await.unwrap();
    let items: Vec<_> = stream.collect().await;
    assert!(matches!(items.last(), Some(Err(SessionError::Timeout))));
    session.stop().await.unwrap();
}

#[tokio::test]
async fn subprocess_death_mid_request_fails_the_request() {
    let dir = TempDir::new().unwrap();
    let binary = fake_cli(&dir, &format!("read -r line\nprintf '%s\\n' '{INIT}'\nexit 3"));
    let session = Session::open(options(binary)).unwrap();

    let stream = session.stream("hello", QueryOverrides::default()).await.unwrap();
    let items: Vec<_> = stream.collect().await;

    assert_eq!(items.len(), 2);
    assert!(matches!(items[0], Ok(Message::System(_))));
    assert!(matches!(items[1], Err(SessionError::SubprocessExit(_))));
    session.stop().await.unwrap();
}
