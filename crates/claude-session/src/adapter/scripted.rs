//! Programmable adapter for tests.
//!
//! A [`ScriptedAdapter`] replays a fixed message list, or calls a function
//! `(prompt, overrides) -> Vec<Message>` per query, instead of spawning the
//! CLI. Scripts are "smart-filled" so tests can state only what they care
//! about: a missing leading init and a missing trailing result are
//! synthesized, unmatched `tool_result` ids are rewired to the most recent
//! preceding `tool_use`, and every message gets one uniform session id.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::adapter::{
    Adapter, AdapterEvent, AdapterEventSender, AdapterStatus, DoneReason, Health,
    QuerySubmission, RequestId,
};
use crate::content::ContentBlock;
use crate::error::SessionError;
use crate::message::{
    Message, PermissionMode, ResultMessage, ResultSubtype, SystemInit, SystemMessage,
    SystemPayload, Usage,
};
use crate::options::{Prompt, QueryOverrides, SessionOptions};

/// Script body: a static list replayed for every query, or a function of the
/// submitted prompt and overrides.
pub enum Script {
    Static(Vec<Message>),
    Dynamic(Box<dyn FnMut(&Prompt, &QueryOverrides) -> Vec<Message> + Send>),
}

enum Command {
    Run {
        request: RequestId,
        messages: VecDeque<Message>,
    },
    Cancel(RequestId),
    Interrupt,
    Stop(oneshot::Sender<()>),
}

pub struct ScriptedAdapter {
    script: Script,
    session_id: String,
    delay: Duration,
    cmd_tx: Option<mpsc::UnboundedSender<Command>>,
    started: Arc<Mutex<bool>>,
}

impl ScriptedAdapter {
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self::new(Script::Static(messages))
    }

    pub fn with_script<F>(script: F) -> Self
    where
        F: FnMut(&Prompt, &QueryOverrides) -> Vec<Message> + Send + 'static,
    {
        Self::new(Script::Dynamic(Box::new(script)))
    }

    fn new(script: Script) -> Self {
        ScriptedAdapter {
            script,
            session_id: "scripted-session".into(),
            delay: Duration::from_millis(1),
            cmd_tx: None,
            started: Arc::new(Mutex::new(false)),
        }
    }

    /// Session id stamped on every emitted message (unless the query's
    /// overrides carry one).
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    async fn start(
        &mut self,
        events: AdapterEventSender,
        _options: &SessionOptions,
        _resume: Option<String>,
    ) -> Result<(), SessionError> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        self.cmd_tx = Some(cmd_tx);
        *self.started.lock().unwrap_or_else(|e| e.into_inner()) = true;
        let _ = events.send(AdapterEvent::Status(AdapterStatus::Provisioning));
        let _ = events.send(AdapterEvent::Status(AdapterStatus::Ready));
        tokio::spawn(worker(events, cmd_rx, self.delay));
        Ok(())
    }

    async fn send_query(&mut self, submission: QuerySubmission) -> Result<(), SessionError> {
        let tx = self
            .cmd_tx
            .as_ref()
            .ok_or(SessionError::NotReady)?
            .clone();
        let messages = match &mut self.script {
            Script::Static(messages) => messages.clone(),
            Script::Dynamic(f) => f(&submission.prompt, &submission.overrides),
        };
        let session_id = submission
            .overrides
            .session_id
            .clone()
            .unwrap_or_else(|| self.session_id.clone());
        let messages = smart_fill(messages, &session_id);
        tx.send(Command::Run {
            request: submission.request,
            messages: messages.into(),
        })
        .map_err(|_| SessionError::AdapterExit("scripted worker is gone".into()))
    }

    async fn cancel(&mut self, request: RequestId) -> Result<(), SessionError> {
        if let Some(tx) = &self.cmd_tx {
            let _ = tx.send(Command::Cancel(request));
        }
        Ok(())
    }

    async fn interrupt(&mut self) -> Result<(), SessionError> {
        if let Some(tx) = &self.cmd_tx {
            let _ = tx.send(Command::Interrupt);
        }
        Ok(())
    }

    fn health(&self) -> Health {
        if *self.started.lock().unwrap_or_else(|e| e.into_inner()) {
            Health::Healthy
        } else {
            Health::Degraded
        }
    }

    async fn stop(&mut self) -> Result<(), SessionError> {
        if let Some(tx) = self.cmd_tx.take() {
            let (ack_tx, ack_rx) = oneshot::channel();
            if tx.send(Command::Stop(ack_tx)).is_ok() {
                let _ = ack_rx.await;
            }
        }
        Ok(())
    }
}

/// One query at a time, one message per tick, terminal `done(completed)`.
async fn worker(
    events: AdapterEventSender,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    delay: Duration,
) {
    let mut queue: VecDeque<(RequestId, VecDeque<Message>)> = VecDeque::new();
    let mut current: Option<(RequestId, VecDeque<Message>)> = None;

    loop {
        if current.is_none() {
            current = queue.pop_front();
        }
        let emitting = current.is_some();
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Run { request, messages }) => {
                    queue.push_back((request, messages));
                }
                Some(Command::Cancel(request)) => {
                    if current.as_ref().map(|(r, _)| *r) == Some(request) {
                        current = None;
                        let _ = events.send(AdapterEvent::Done {
                            request,
                            reason: DoneReason::Cancelled,
                        });
                    } else if let Some(pos) = queue.iter().position(|(r, _)| *r == request) {
                        queue.remove(pos);
                        let _ = events.send(AdapterEvent::Done {
                            request,
                            reason: DoneReason::Cancelled,
                        });
                    }
                }
                Some(Command::Interrupt) => {
                    if let Some((request, _)) = current.take() {
                        let _ = events.send(AdapterEvent::Done {
                            request,
                            reason: DoneReason::Cancelled,
                        });
                    }
                }
                Some(Command::Stop(ack)) => {
                    if let Some((request, _)) = current.take() {
                        let _ = events.send(AdapterEvent::Done {
                            request,
                            reason: DoneReason::Cancelled,
                        });
                    }
                    while let Some((request, _)) = queue.pop_front() {
                        let _ = events.send(AdapterEvent::Done {
                            request,
                            reason: DoneReason::Cancelled,
                        });
                    }
                    let _ = ack.send(());
                    return;
                }
                None => return,
            },
            _ = tokio::time::sleep(delay), if emitting => {
                let finished = match current.as_mut() {
                    Some((request, messages)) => {
                        let request = *request;
                        if let Some(message) = messages.pop_front() {
                            let _ = events.send(AdapterEvent::Message { request, message });
                        }
                        messages.is_empty().then_some(request)
                    }
                    None => None,
                };
                if let Some(request) = finished {
                    current = None;
                    let _ = events.send(AdapterEvent::Done {
                        request,
                        reason: DoneReason::Completed,
                    });
                }
            }
        }
    }
}

// ─── Smart fill ───────────────────────────────────────────────────────────

/// Normalize a scripted message list into a plausible conversation.
pub fn smart_fill(mut messages: Vec<Message>, session_id: &str) -> Vec<Message> {
    rewrite_orphan_tool_results(&mut messages);

    let starts_with_init = matches!(
        messages.first(),
        Some(Message::System(SystemMessage {
            payload: SystemPayload::Init(_),
            ..
        }))
    );
    if !starts_with_init {
        messages.insert(0, default_init(session_id));
    }

    if !matches!(messages.last(), Some(Message::Result(_))) {
        messages.push(default_result(&messages, session_id));
    }

    for message in &mut messages {
        set_session_id(message, session_id);
    }
    messages
}

fn rewrite_orphan_tool_results(messages: &mut [Message]) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut latest: Option<String> = None;
    for message in messages.iter_mut() {
        match message {
            Message::Assistant(a) => {
                for block in &a.message.content {
                    if let ContentBlock::ToolUse { id, .. } = block {
                        seen.insert(id.clone());
                        latest = Some(id.clone());
                    }
                }
            }
            Message::User(u) => {
                if let crate::message::UserContent::Blocks(blocks) = &mut u.message.content {
                    for block in blocks {
                        if let ContentBlock::ToolResult { tool_use_id, .. } = block {
                            if !seen.contains(tool_use_id) {
                                if let Some(latest) = &latest {
                                    *tool_use_id = latest.clone();
                                }
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

fn default_init(session_id: &str) -> Message {
    Message::System(SystemMessage {
        session_id: session_id.to_owned(),
        uuid: None,
        payload: SystemPayload::Init(SystemInit {
            cwd: "/".into(),
            model: "scripted-model".into(),
            permission_mode: PermissionMode::Default,
            api_key_source: None,
            tools: Vec::new(),
            mcp_servers: Vec::new(),
            slash_commands: None,
            output_style: None,
            agents: None,
            skills: None,
            plugins: None,
            claude_code_version: None,
        }),
    })
}

fn default_result(messages: &[Message], session_id: &str) -> Message {
    let mut text = String::new();
    let mut num_turns = 0;
    for message in messages {
        if let Message::Assistant(a) = message {
            num_turns += 1;
            for block in &a.message.content {
                if let Some(t) = block.as_text() {
                    text.push_str(t);
                }
            }
        }
    }
    Message::Result(ResultMessage {
        subtype: ResultSubtype::Success,
        is_error: false,
        duration_ms: 1.0,
        duration_api_ms: 1.0,
        num_turns: num_turns.max(1),
        result: Some(text),
        total_cost_usd: 0.0,
        usage: Usage::default(),
        model_usage: None,
        permission_denials: None,
        errors: None,
        structured_output: None,
        session_id: session_id.to_owned(),
        uuid: None,
    })
}

fn set_session_id(message: &mut Message, session_id: &str) {
    match message {
        Message::System(m) => m.session_id = session_id.to_owned(),
        Message::Assistant(m) => m.session_id = session_id.to_owned(),
        Message::User(m) => m.session_id = session_id.to_owned(),
        Message::Result(m) => m.session_id = session_id.to_owned(),
        Message::StreamEvent(m) => m.session_id = session_id.to_owned(),
        Message::RateLimit(m) => m.session_id = session_id.to_owned(),
        Message::ToolProgress(m) => m.session_id = session_id.to_owned(),
        Message::ToolUseSummary(m) => m.session_id = session_id.to_owned(),
        Message::AuthStatus(m) => m.session_id = session_id.to_owned(),
        Message::PromptSuggestion(m) => m.session_id = session_id.to_owned(),
        Message::Unknown(m) => {
            if let Some(obj) = m.raw.as_object_mut() {
                obj.insert("session_id".into(), session_id.into());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ToolResultContent;
    use crate::message::{AssistantInner, AssistantMessage, UserContent, UserInner, UserMessage};

    fn assistant(content: Vec<ContentBlock>) -> Message {
        Message::Assistant(AssistantMessage {
            message: AssistantInner {
                id: "msg".into(),
                model: "m".into(),
                content,
                stop_reason: None,
                stop_sequence: None,
                usage: Usage::default(),
            },
            parent_tool_use_id: None,
            error: None,
            session_id: "old".into(),
            uuid: None,
        })
    }

    fn user_tool_result(tool_use_id: &str) -> Message {
        Message::User(UserMessage {
            message: UserInner {
                content: UserContent::Blocks(vec![ContentBlock::ToolResult {
                    tool_use_id: tool_use_id.into(),
                    content: Some(ToolResultContent::Text("out".into())),
                    is_error: false,
                }]),
            },
            parent_tool_use_id: None,
            tool_use_result: None,
            session_id: "old".into(),
            uuid: None,
        })
    }

    #[test]
    fn prepends_init_and_appends_result() {
        let filled = smart_fill(
            vec![assistant(vec![ContentBlock::Text { text: "Hi".into() }])],
            "S",
        );
        assert_eq!(filled.len(), 3);
        assert!(matches!(
            &filled[0],
            Message::System(SystemMessage {
                payload: SystemPayload::Init(_),
                ..
            })
        ));
        let Message::Result(r) = filled.last().unwrap() else {
            panic!("expected trailing Result");
        };
        assert_eq!(r.result_text(), Some("Hi"));
        assert!(!r.is_error);
    }

    #[test]
    fn synthesized_result_concatenates_assistant_text() {
        let filled = smart_fill(
            vec![
                assistant(vec![ContentBlock::Text { text: "one ".into() }]),
                assistant(vec![ContentBlock::Text { text: "two".into() }]),
            ],
            "S",
        );
        let Message::Result(r) = filled.last().unwrap() else {
            panic!("expected Result");
        };
        assert_eq!(r.result_text(), Some("one two"));
        assert_eq!(r.num_turns, 2);
    }

    #[test]
    fn rewires_unmatched_tool_result_to_latest_tool_use() {
        let filled = smart_fill(
            vec![
                assistant(vec![ContentBlock::ToolUse {
                    id: "real-id".into(),
                    name: "Read".into(),
                    input: serde_json::json!({}),
                    caller: None,
                }]),
                user_tool_result("made-up-id"),
            ],
            "S",
        );
        let Message::User(u) = &filled[2] else {
            panic!("expected User at index 2");
        };
        let UserContent::Blocks(blocks) = &u.message.content else {
            panic!("expected blocks");
        };
        let ContentBlock::ToolResult { tool_use_id, .. } = &blocks[0] else {
            panic!("expected ToolResult");
        };
        assert_eq!(tool_use_id, "real-id");
    }

    #[test]
    fn matched_tool_result_ids_are_left_alone() {
        let filled = smart_fill(
            vec![
                assistant(vec![
                    ContentBlock::ToolUse {
                        id: "a".into(),
                        name: "Read".into(),
                        input: serde_json::json!({}),
                        caller: None,
                    },
                    ContentBlock::ToolUse {
                        id: "b".into(),
                        name: "Bash".into(),
                        input: serde_json::json!({}),
                        caller: None,
                    },
                ]),
                user_tool_result("a"),
            ],
            "S",
        );
        let Message::User(u) = &filled[2] else {
            panic!("expected User");
        };
        let ContentBlock::ToolResult { tool_use_id, .. } = &u.message.content.blocks()[0] else {
            panic!("expected ToolResult");
        };
        assert_eq!(tool_use_id, "a");
    }

    #[test]
    fn session_ids_are_overwritten_uniformly() {
        let filled = smart_fill(
            vec![assistant(vec![ContentBlock::Text { text: "x".into() }])],
            "uniform",
        );
        for message in &filled {
            assert_eq!(message.session_id(), Some("uniform"));
        }
    }

    #[test]
    fn script_already_complete_is_untouched_in_shape() {
        let script = vec![
            default_init("S"),
            assistant(vec![ContentBlock::Text { text: "x".into() }]),
            default_result(&[], "S"),
        ];
        let filled = smart_fill(script, "S");
        assert_eq!(filled.len(), 3);
    }
}
