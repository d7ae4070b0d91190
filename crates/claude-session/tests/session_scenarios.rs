//! End-to-end session behavior over programmable adapters.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use claude_session::adapter::{
    Adapter, AdapterEvent, AdapterEventSender, AdapterStatus, DoneReason, Health,
    QuerySubmission,
};
use claude_session::combinators;
use claude_session::content::{ContentBlock, ToolResultContent};
use claude_session::message::{
    AssistantInner, AssistantMessage, CompactBoundary, CompactMetadata, CompactTrigger, Message,
    PermissionMode, ResultMessage, ResultSubtype, SystemInit, SystemMessage, SystemPayload,
    UnknownMessage, Usage, UserContent, UserInner, UserMessage,
};
use claude_session::options::{QueryOverrides, SessionOptions};
use claude_session::{ScriptedAdapter, Session, SessionError};

// ─── Message helpers ──────────────────────────────────────────────────────

fn init_msg(session_id: &str) -> Message {
    Message::System(SystemMessage {
        session_id: session_id.into(),
        uuid: None,
        payload: SystemPayload::Init(SystemInit {
            cwd: "/".into(),
            model: "claude-sonnet-4-6".into(),
            permission_mode: PermissionMode::Default,
            api_key_source: None,
            tools: vec![],
            mcp_servers: vec![],
            slash_commands: None,
            output_style: None,
            agents: None,
            skills: None,
            plugins: None,
            claude_code_version: None,
        }),
    })
}

fn compact_msg(session_id: &str) -> Message {
    Message::System(SystemMessage {
        session_id: session_id.into(),
        uuid: None,
        payload: SystemPayload::CompactBoundary(CompactBoundary {
            compact_metadata: CompactMetadata {
                trigger: CompactTrigger::Auto,
                pre_tokens: 120_000,
            },
        }),
    })
}

fn assistant_text(session_id: &str, text: &str) -> Message {
    assistant_blocks(session_id, vec![ContentBlock::Text { text: text.into() }])
}

fn assistant_blocks(session_id: &str, content: Vec<ContentBlock>) -> Message {
    Message::Assistant(AssistantMessage {
        message: AssistantInner {
            id: "msg".into(),
            model: "claude-sonnet-4-6".into(),
            content,
            stop_reason: None,
            stop_sequence: None,
            usage: Usage::default(),
        },
        parent_tool_use_id: None,
        error: None,
        session_id: session_id.into(),
        uuid: None,
    })
}

fn user_tool_result(session_id: &str, tool_use_id: &str, text: &str) -> Message {
    Message::User(UserMessage {
        message: UserInner {
            content: UserContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: Some(ToolResultContent::Text(text.into())),
                is_error: false,
            }]),
        },
        parent_tool_use_id: None,
        tool_use_result: None,
        session_id: session_id.into(),
        uuid: None,
    })
}

fn result_msg(session_id: &str, text: &str, is_error: bool) -> Message {
    Message::Result(ResultMessage {
        subtype: if is_error {
            ResultSubtype::ErrorDuringExecution
        } else {
            ResultSubtype::Success
        },
        is_error,
        duration_ms: 5.0,
        duration_api_ms: 4.0,
        num_turns: 1,
        result: (!is_error).then(|| text.to_owned()),
        total_cost_usd: 0.001,
        usage: Usage::default(),
        model_usage: None,
        permission_denials: None,
        errors: is_error.then(|| vec![text.to_owned()]),
        structured_output: None,
        session_id: session_id.into(),
        uuid: None,
    })
}

// ─── A verbatim adapter (no smart fill) for session-internals tests ───────

struct RawAdapter {
    scripts: Arc<Mutex<VecDeque<Vec<Message>>>>,
    starts: Arc<Mutex<Vec<Option<String>>>>,
    fail_after_done: Arc<AtomicBool>,
    events: Option<AdapterEventSender>,
}

impl RawAdapter {
    fn new(scripts: Vec<Vec<Message>>) -> Self {
        RawAdapter {
            scripts: Arc::new(Mutex::new(scripts.into())),
            starts: Arc::new(Mutex::new(Vec::new())),
            fail_after_done: Arc::new(AtomicBool::new(false)),
            events: None,
        }
    }

    /// Emit a post-ready failure after each completed query, simulating a
    /// subprocess that dies between requests.
    fn failing_between_queries(self) -> Self {
        self.fail_after_done.store(true, Ordering::SeqCst);
        self
    }

    fn starts_handle(&self) -> Arc<Mutex<Vec<Option<String>>>> {
        Arc::clone(&self.starts)
    }
}

#[async_trait]
impl Adapter for RawAdapter {
    async fn start(
        &mut self,
        events: AdapterEventSender,
        _options: &SessionOptions,
        resume: Option<String>,
    ) -> Result<(), SessionError> {
        self.starts.lock().unwrap().push(resume);
        self.events = Some(events.clone());
        let _ = events.send(AdapterEvent::Status(AdapterStatus::Provisioning));
        let _ = events.send(AdapterEvent::Status(AdapterStatus::Ready));
        Ok(())
    }

    async fn send_query(&mut self, submission: QuerySubmission) -> Result<(), SessionError> {
        let events = self.events.clone().expect("adapter not started");
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        let fail = self.fail_after_done.load(Ordering::SeqCst);
        tokio::spawn(async move {
            for message in script {
                let _ = events.send(AdapterEvent::Message {
                    request: submission.request,
                    message,
                });
            }
            let _ = events.send(AdapterEvent::Done {
                request: submission.request,
                reason: DoneReason::Completed,
            });
            if fail {
                let _ = events.send(AdapterEvent::Status(AdapterStatus::Failed(
                    "subprocess exited (signal)".into(),
                )));
            }
        });
        Ok(())
    }

    async fn cancel(&mut self, _request: claude_session::RequestId) -> Result<(), SessionError> {
        Ok(())
    }

    async fn interrupt(&mut self) -> Result<(), SessionError> {
        Ok(())
    }

    fn health(&self) -> Health {
        Health::Healthy
    }

    async fn stop(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Provisioning fails before ever reaching ready.
struct BrokenAdapter;

#[async_trait]
impl Adapter for BrokenAdapter {
    async fn start(
        &mut self,
        events: AdapterEventSender,
        _options: &SessionOptions,
        _resume: Option<String>,
    ) -> Result<(), SessionError> {
        let _ = events.send(AdapterEvent::Status(AdapterStatus::Provisioning));
        let _ = events.send(AdapterEvent::Status(AdapterStatus::Failed(
            "claude: command not found".into(),
        )));
        Ok(())
    }

    async fn send_query(&mut self, _submission: QuerySubmission) -> Result<(), SessionError> {
        panic!("send_query must not be reached when provisioning failed");
    }

    async fn cancel(&mut self, _request: claude_session::RequestId) -> Result<(), SessionError> {
        Ok(())
    }

    async fn interrupt(&mut self) -> Result<(), SessionError> {
        Ok(())
    }

    fn health(&self) -> Health {
        Health::Unhealthy("claude: command not found".into())
    }

    async fn stop(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

// ─── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn hello_final_text_and_cached_session_id() {
    let adapter = ScriptedAdapter::with_messages(vec![assistant_text("S", "Hi")])
        .with_session_id("S");
    let session =
        Session::open_with_adapter(SessionOptions::default(), Box::new(adapter)).unwrap();

    let stream = session.stream("hello", QueryOverrides::default()).await.unwrap();
    let collected = combinators::collect(stream).await.unwrap();

    assert_eq!(collected.text, "Hi");
    assert_eq!(collected.result.as_ref().unwrap().result_text(), Some("Hi"));
    assert!(!collected.is_error);
    assert_eq!(session.session_id().await.as_deref(), Some("S"));
}

#[tokio::test]
async fn tool_call_round_trip_collects_paired_calls() {
    let adapter = ScriptedAdapter::with_messages(vec![
        assistant_blocks(
            "S",
            vec![
                ContentBlock::Text {
                    text: "I'll read it.".into(),
                },
                ContentBlock::ToolUse {
                    id: "t1".into(),
                    name: "Read".into(),
                    input: json!({"path": "/a"}),
                    caller: None,
                },
            ],
        ),
        user_tool_result("S", "t1", "file contents"),
        assistant_text("S", "Here it is"),
        result_msg("S", "Here it is", false),
    ])
    .with_session_id("S");
    let session =
        Session::open_with_adapter(SessionOptions::default(), Box::new(adapter)).unwrap();

    let stream = session.stream("read /a", QueryOverrides::default()).await.unwrap();
    let collected = combinators::collect(stream).await.unwrap();

    assert_eq!(collected.text, "I'll read it.Here it is");
    assert_eq!(collected.tool_calls.len(), 1);
    let call = &collected.tool_calls[0];
    assert_eq!(call.tool_use.name, "Read");
    assert_eq!(
        call.result.as_ref().unwrap().content,
        Some(ToolResultContent::Text("file contents".into()))
    );
}

#[tokio::test]
async fn send_returns_final_text() {
    let adapter = ScriptedAdapter::with_messages(vec![assistant_text("S", "Hi")]);
    let session =
        Session::open_with_adapter(SessionOptions::default(), Box::new(adapter)).unwrap();
    assert_eq!(
        session.send("hello", QueryOverrides::default()).await.unwrap(),
        "Hi"
    );
}

#[tokio::test]
async fn send_surfaces_cli_reported_errors() {
    let adapter = ScriptedAdapter::with_messages(vec![
        assistant_text("S", "working on it"),
        result_msg("S", "tool crashed", true),
    ]);
    let session =
        Session::open_with_adapter(SessionOptions::default(), Box::new(adapter)).unwrap();
    let err = session
        .send("do something", QueryOverrides::default())
        .await
        .unwrap_err();
    let SessionError::Claude { subtype, message, .. } = err else {
        panic!("expected Claude error, got {err:?}");
    };
    assert_eq!(subtype, "error_during_execution");
    assert_eq!(message, "tool crashed");
}

#[tokio::test]
async fn interrupt_ends_the_stream_without_a_result() {
    let script: Vec<Message> = (0..50)
        .map(|i| assistant_text("S", &format!("chunk {i}")))
        .collect();
    let adapter = ScriptedAdapter::with_messages(script).with_delay(Duration::from_millis(5));
    let session =
        Session::open_with_adapter(SessionOptions::default(), Box::new(adapter)).unwrap();

    let mut stream = session.stream("go", QueryOverrides::default()).await.unwrap();
    // Let a couple of messages through, then interrupt.
    let first = stream.next().await.expect("first message").unwrap();
    assert!(matches!(first, Message::System(_)));
    let _ = stream.next().await.expect("second message").unwrap();
    session.interrupt().await.unwrap();

    let rest: Vec<_> = stream.collect().await;
    assert!(
        !rest
            .iter()
            .any(|item| matches!(item, Ok(Message::Result(_)))),
        "interrupted stream must not produce a terminal result"
    );
}

#[tokio::test]
async fn interrupt_request_targets_one_query_only() {
    let script: Vec<Message> = (0..50)
        .map(|i| assistant_text("S", &format!("chunk {i}")))
        .collect();
    let adapter = ScriptedAdapter::with_messages(script).with_delay(Duration::from_millis(5));
    let session =
        Session::open_with_adapter(SessionOptions::default(), Box::new(adapter)).unwrap();

    let mut first = session.stream("one", QueryOverrides::default()).await.unwrap();
    let _ = first.next().await.expect("first message").unwrap();

    session.interrupt_request(first.request_id()).await.unwrap();
    let rest: Vec<_> = first.collect().await;
    assert!(
        !rest
            .iter()
            .any(|item| matches!(item, Ok(Message::Result(_)))),
        "interrupted request must not complete"
    );

    // A later query on the same session is untouched.
    let stream = session.stream("two", QueryOverrides::default()).await.unwrap();
    let collected = combinators::collect(stream).await.unwrap();
    assert!(collected.result.is_some());
}

#[tokio::test]
async fn dropping_the_stream_cancels_and_the_session_survives() {
    let script: Vec<Message> = (0..50)
        .map(|i| assistant_text("S", &format!("chunk {i}")))
        .collect();
    let adapter = ScriptedAdapter::with_messages(script).with_delay(Duration::from_millis(2));
    let session =
        Session::open_with_adapter(SessionOptions::default(), Box::new(adapter)).unwrap();

    {
        let mut stream = session.stream("one", QueryOverrides::default()).await.unwrap();
        let _ = stream.next().await;
        // Dropping here cancels the in-flight request.
    }

    // The next query runs to completion on the same session.
    let stream = session.stream("two", QueryOverrides::default()).await.unwrap();
    let collected = combinators::collect(stream).await.unwrap();
    assert!(collected.result.is_some());
}

#[tokio::test]
async fn per_query_timeout_errors_and_closes_the_channel() {
    let script: Vec<Message> = (0..100)
        .map(|i| assistant_text("S", &format!("slow {i}")))
        .collect();
    let adapter = ScriptedAdapter::with_messages(script).with_delay(Duration::from_millis(20));
    let session =
        Session::open_with_adapter(SessionOptions::default(), Box::new(adapter)).unwrap();

    let overrides = QueryOverrides {
        timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let stream = session.stream("slow", overrides).await.unwrap();
    let items: Vec<_> = stream.collect().await;

    let last = items.last().expect("stream should not be empty");
    assert!(
        matches!(last, Err(SessionError::Timeout)),
        "expected trailing timeout, got {last:?}"
    );
}

#[tokio::test]
async fn concurrent_queries_interleave_without_cross_talk() {
    let adapter = ScriptedAdapter::with_script(|prompt, _overrides| {
        let claude_session::Prompt::Text(text) = prompt else {
            panic!("expected text prompt");
        };
        vec![assistant_text("S", &format!("echo:{text}"))]
    });
    let session = Arc::new(
        Session::open_with_adapter(SessionOptions::default(), Box::new(adapter)).unwrap(),
    );

    let a = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.send("alpha", QueryOverrides::default()).await })
    };
    let b = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.send("beta", QueryOverrides::default()).await })
    };

    assert_eq!(a.await.unwrap().unwrap(), "echo:alpha");
    assert_eq!(b.await.unwrap().unwrap(), "echo:beta");
}

#[tokio::test]
async fn compact_boundary_passes_through_and_updates_resume_id() {
    let adapter = RawAdapter::new(vec![vec![
        init_msg("A"),
        assistant_text("A", "first"),
        compact_msg("B"),
        assistant_text("B", "second"),
        result_msg("B", "second", false),
    ]]);
    let session =
        Session::open_with_adapter(SessionOptions::default(), Box::new(adapter)).unwrap();

    let stream = session.stream("go", QueryOverrides::default()).await.unwrap();
    let items: Vec<_> = stream.map(|item| item.unwrap()).collect().await;

    // Exact arrival order, boundary included.
    assert_eq!(items.len(), 5);
    assert!(matches!(&items[0], Message::System(m) if matches!(m.payload, SystemPayload::Init(_))));
    assert!(matches!(&items[1], Message::Assistant(_)));
    assert!(
        matches!(&items[2], Message::System(m) if matches!(m.payload, SystemPayload::CompactBoundary(_)))
    );
    assert!(matches!(&items[3], Message::Assistant(_)));
    assert!(matches!(&items[4], Message::Result(_)));

    // Last-observed id wins.
    assert_eq!(session.session_id().await.as_deref(), Some("B"));
}

#[tokio::test]
async fn restart_after_adapter_failure_passes_cached_resume_id() {
    let adapter = RawAdapter::new(vec![
        vec![init_msg("B"), result_msg("B", "ok", false)],
        vec![init_msg("B"), result_msg("B", "ok again", false)],
    ])
    .failing_between_queries();
    let starts = adapter.starts_handle();
    let session =
        Session::open_with_adapter(SessionOptions::default(), Box::new(adapter)).unwrap();

    assert_eq!(session.send("one", QueryOverrides::default()).await.unwrap(), "ok");
    // Let the post-query failure status reach the session before resubmitting.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        session.send("two", QueryOverrides::default()).await.unwrap(),
        "ok again"
    );

    let starts = starts.lock().unwrap();
    assert_eq!(starts.len(), 2, "adapter should have been restarted once");
    assert_eq!(starts[0], None);
    assert_eq!(starts[1].as_deref(), Some("B"));
}

#[tokio::test]
async fn clear_session_drops_the_cached_resume_id() {
    let adapter = RawAdapter::new(vec![
        vec![init_msg("S"), result_msg("S", "ok", false)],
        vec![init_msg("fresh"), result_msg("fresh", "ok", false)],
    ])
    .failing_between_queries();
    let starts = adapter.starts_handle();
    let session =
        Session::open_with_adapter(SessionOptions::default(), Box::new(adapter)).unwrap();

    session.send("one", QueryOverrides::default()).await.unwrap();
    assert_eq!(session.session_id().await.as_deref(), Some("S"));

    // Let the post-query failure status reach the session first.
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.clear_session().await.unwrap();
    assert_eq!(session.session_id().await, None);

    // The restarted adapter must not see a resume id.
    session.send("two", QueryOverrides::default()).await.unwrap();
    let starts = starts.lock().unwrap();
    assert_eq!(starts[1], None);
}

#[tokio::test]
async fn unknown_messages_are_forwarded_verbatim() {
    let raw = json!({"type": "galaxy_event", "session_id": "S", "payload": {"n": 1}});
    let adapter = RawAdapter::new(vec![vec![
        init_msg("S"),
        Message::Unknown(UnknownMessage {
            message_type: "galaxy_event".into(),
            raw: raw.clone(),
        }),
        result_msg("S", "done", false),
    ]]);
    let session =
        Session::open_with_adapter(SessionOptions::default(), Box::new(adapter)).unwrap();

    let stream = session.stream("go", QueryOverrides::default()).await.unwrap();
    let items: Vec<_> = stream.map(|item| item.unwrap()).collect().await;
    let Message::Unknown(unknown) = &items[1] else {
        panic!("expected Unknown at index 1");
    };
    assert_eq!(unknown.raw, raw);
}

#[tokio::test]
async fn provisioning_failure_is_sticky_until_restart() {
    let session =
        Session::open_with_adapter(SessionOptions::default(), Box::new(BrokenAdapter)).unwrap();

    let first = session.send("one", QueryOverrides::default()).await.unwrap_err();
    assert!(matches!(first, SessionError::ProvisioningFailed(_)));

    // Subsequent queries fail immediately with the same reason.
    let second = session.send("two", QueryOverrides::default()).await.unwrap_err();
    assert!(matches!(second, SessionError::ProvisioningFailed(_)));
}

#[tokio::test]
async fn stop_closes_open_streams() {
    let script: Vec<Message> = (0..100)
        .map(|i| assistant_text("S", &format!("chunk {i}")))
        .collect();
    let adapter = ScriptedAdapter::with_messages(script).with_delay(Duration::from_millis(10));
    let session =
        Session::open_with_adapter(SessionOptions::default(), Box::new(adapter)).unwrap();

    let mut stream = session.stream("go", QueryOverrides::default()).await.unwrap();
    let _ = stream.next().await;
    session.stop().await.unwrap();

    // The stream drains whatever was buffered and then ends.
    let rest: Vec<_> = stream.collect().await;
    assert!(
        !rest
            .iter()
            .any(|item| matches!(item, Ok(Message::Result(_)))),
        "stopped stream should not reach a terminal result"
    );

    // New submissions fail: the session actor has exited.
    let err = session.send("after", QueryOverrides::default()).await.unwrap_err();
    assert_eq!(err, SessionError::Closed);
}

#[tokio::test]
async fn intra_request_order_is_preserved_exactly() {
    let script: Vec<Message> = (0..20)
        .map(|i| assistant_text("S", &format!("{i}")))
        .collect();
    let adapter = ScriptedAdapter::with_messages(script);
    let session =
        Session::open_with_adapter(SessionOptions::default(), Box::new(adapter)).unwrap();

    let stream = session.stream("count", QueryOverrides::default()).await.unwrap();
    let texts: Vec<String> = combinators::text_content(stream)
        .map(|t| t.unwrap())
        .collect()
        .await;
    let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
    assert_eq!(texts, expected);
}
