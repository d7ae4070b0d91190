//! Pairs `tool_use` blocks with their later `tool_result`s.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::content::{ContentBlock, ToolResultContent};
use crate::message::{Message, UserContent};

/// A completed tool invocation: the request, its outcome, and timing.
#[derive(Debug, Clone)]
pub struct ToolEvent {
    pub tool_use_id: String,
    pub name: String,
    pub input: Value,
    pub result: Option<ToolResultContent>,
    pub is_error: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct PendingTool {
    name: String,
    input: Value,
    started_at: DateTime<Utc>,
}

/// Per-request correlation state.
///
/// Feed it every message of a request in arrival order. The pending map is
/// bounded by the number of in-flight tool uses within the request and is
/// purged on the terminal `Result`. Correlation is per-request: share one
/// correlator across requests only if you want session-wide pairing.
pub struct ToolCorrelator {
    pending: HashMap<String, PendingTool>,
    callback: Option<Box<dyn FnMut(&ToolEvent) + Send>>,
}

impl Default for ToolCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCorrelator {
    pub fn new() -> Self {
        ToolCorrelator {
            pending: HashMap::new(),
            callback: None,
        }
    }

    /// Invoke `callback` for every correlated event, in addition to
    /// returning it from [`observe`](Self::observe).
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&ToolEvent) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Number of tool uses still awaiting their result.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Observe one message; returns the tool events it completed.
    pub fn observe(&mut self, message: &Message) -> Vec<ToolEvent> {
        let mut events = Vec::new();
        match message {
            Message::Assistant(a) => {
                for block in &a.message.content {
                    if let ContentBlock::ToolUse {
                        id, name, input, ..
                    } = block
                    {
                        self.pending.insert(
                            id.clone(),
                            PendingTool {
                                name: name.clone(),
                                input: input.clone(),
                                started_at: Utc::now(),
                            },
                        );
                    }
                }
            }
            Message::User(u) => {
                if let UserContent::Blocks(blocks) = &u.message.content {
                    for block in blocks {
                        if let ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } = block
                        {
                            match self.pending.remove(tool_use_id) {
                                Some(pending) => events.push(ToolEvent {
                                    tool_use_id: tool_use_id.clone(),
                                    name: pending.name,
                                    input: pending.input,
                                    result: content.clone(),
                                    is_error: *is_error,
                                    started_at: pending.started_at,
                                    completed_at: Utc::now(),
                                }),
                                // Orphan result: dropped here, though the
                                // message itself still reaches the consumer.
                                None => tracing::debug!(
                                    tool_use_id = %tool_use_id,
                                    "tool result without a pending tool use"
                                ),
                            }
                        }
                    }
                }
            }
            Message::Result(_) => {
                self.pending.clear();
            }
            _ => {}
        }
        if let Some(callback) = &mut self.callback {
            for event in &events {
                callback(event);
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{
        AssistantInner, AssistantMessage, ResultMessage, ResultSubtype, Usage, UserInner,
        UserMessage,
    };
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn tool_use_msg(id: &str, name: &str) -> Message {
        Message::Assistant(AssistantMessage {
            message: AssistantInner {
                id: "m".into(),
                model: "m".into(),
                content: vec![ContentBlock::ToolUse {
                    id: id.into(),
                    name: name.into(),
                    input: json!({"path": "/a"}),
                    caller: None,
                }],
                stop_reason: None,
                stop_sequence: None,
                usage: Usage::default(),
            },
            parent_tool_use_id: None,
            error: None,
            session_id: "s".into(),
            uuid: None,
        })
    }

    fn tool_result_msg(id: &str, text: &str, is_error: bool) -> Message {
        Message::User(UserMessage {
            message: UserInner {
                content: UserContent::Blocks(vec![ContentBlock::ToolResult {
                    tool_use_id: id.into(),
                    content: Some(ToolResultContent::Text(text.into())),
                    is_error,
                }]),
            },
            parent_tool_use_id: None,
            tool_use_result: None,
            session_id: "s".into(),
            uuid: None,
        })
    }

    fn result_msg() -> Message {
        Message::Result(ResultMessage {
            subtype: ResultSubtype::Success,
            is_error: false,
            duration_ms: 1.0,
            duration_api_ms: 1.0,
            num_turns: 1,
            result: None,
            total_cost_usd: 0.0,
            usage: Usage::default(),
            model_usage: None,
            permission_denials: None,
            errors: None,
            structured_output: None,
            session_id: "s".into(),
            uuid: None,
        })
    }

    #[test]
    fn pairs_tool_use_with_result_exactly_once() {
        let mut correlator = ToolCorrelator::new();
        assert!(correlator.observe(&tool_use_msg("t1", "Read")).is_empty());
        assert_eq!(correlator.pending(), 1);

        let events = correlator.observe(&tool_result_msg("t1", "contents", false));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "Read");
        assert_eq!(events[0].tool_use_id, "t1");
        assert_eq!(
            events[0].result,
            Some(ToolResultContent::Text("contents".into()))
        );
        assert!(events[0].completed_at >= events[0].started_at);
        assert_eq!(correlator.pending(), 0);

        // A duplicate result for the same id is now an orphan.
        assert!(correlator
            .observe(&tool_result_msg("t1", "again", false))
            .is_empty());
    }

    #[test]
    fn orphan_results_are_dropped() {
        let mut correlator = ToolCorrelator::new();
        assert!(correlator
            .observe(&tool_result_msg("nobody", "x", false))
            .is_empty());
    }

    #[test]
    fn error_results_carry_the_flag() {
        let mut correlator = ToolCorrelator::new();
        correlator.observe(&tool_use_msg("t1", "Bash"));
        let events = correlator.observe(&tool_result_msg("t1", "boom", true));
        assert!(events[0].is_error);
    }

    #[test]
    fn pending_map_is_purged_on_terminal_result() {
        let mut correlator = ToolCorrelator::new();
        correlator.observe(&tool_use_msg("t1", "Read"));
        correlator.observe(&tool_use_msg("t2", "Bash"));
        assert_eq!(correlator.pending(), 2);
        correlator.observe(&result_msg());
        assert_eq!(correlator.pending(), 0);
    }

    #[test]
    fn callback_sees_every_correlated_event() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut correlator = ToolCorrelator::new().with_callback(move |event| {
            sink.lock().unwrap().push(event.name.clone());
        });
        correlator.observe(&tool_use_msg("t1", "Read"));
        correlator.observe(&tool_result_msg("t1", "ok", false));
        assert_eq!(*seen.lock().unwrap(), vec!["Read"]);
    }
}
