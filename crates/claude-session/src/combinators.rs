//! Pure transformations over a lazy message sequence.
//!
//! Everything here works on any `Stream<Item = Result<Message, SessionError>>`
//! — a live [`MessageStream`](crate::MessageStream) or an in-memory replay.
//! Errors pass through rather than being swallowed, so a terminal failure
//! still reaches the consumer no matter which combinator is stacked on top.
//! No combinator holds a buffer beyond one lookahead element, except where
//! the semantics require draining ([`collect`]).

use std::collections::HashSet;

use futures::{future, stream, Stream, StreamExt};
use serde_json::Value;

use crate::content::{ContentBlock, ToolResultContent};
use crate::error::SessionError;
use crate::message::{Delta, Message, ResultMessage};

type Item = Result<Message, SessionError>;

/// A `tool_use` block lifted out of its assistant message.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: Value,
    pub caller: Option<String>,
}

/// A `tool_result` block lifted out of its user message.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: Option<ToolResultContent>,
    pub is_error: bool,
}

/// One tool invocation as seen by [`collect`]: the use, and its result if
/// one arrived before the terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub tool_use: ToolUse,
    pub result: Option<ToolResult>,
}

/// Message-variant tags for [`filter_type`], plus two pseudo-tags:
/// `ToolUse` matches any assistant message containing at least one
/// `tool_use` block, and `TextDelta` matches stream events carrying a text
/// delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTag {
    System,
    Assistant,
    User,
    Result,
    StreamEvent,
    RateLimit,
    ToolProgress,
    ToolUseSummary,
    AuthStatus,
    PromptSuggestion,
    Unknown,
    ToolUse,
    TextDelta,
}

fn matches_tag(message: &Message, tag: MessageTag) -> bool {
    match tag {
        MessageTag::System => matches!(message, Message::System(_)),
        MessageTag::Assistant => matches!(message, Message::Assistant(_)),
        MessageTag::User => matches!(message, Message::User(_)),
        MessageTag::Result => matches!(message, Message::Result(_)),
        MessageTag::StreamEvent => matches!(message, Message::StreamEvent(_)),
        MessageTag::RateLimit => matches!(message, Message::RateLimit(_)),
        MessageTag::ToolProgress => matches!(message, Message::ToolProgress(_)),
        MessageTag::ToolUseSummary => matches!(message, Message::ToolUseSummary(_)),
        MessageTag::AuthStatus => matches!(message, Message::AuthStatus(_)),
        MessageTag::PromptSuggestion => matches!(message, Message::PromptSuggestion(_)),
        MessageTag::Unknown => matches!(message, Message::Unknown(_)),
        MessageTag::ToolUse => {
            matches!(message, Message::Assistant(a) if a.has_tool_use())
        }
        MessageTag::TextDelta => matches!(
            message,
            Message::StreamEvent(ev)
                if matches!(ev.event.delta, Some(Delta::TextDelta { .. }))
        ),
    }
}

/// Keep only messages matching `tag`; errors pass through.
pub fn filter_type<S>(stream: S, tag: MessageTag) -> impl Stream<Item = Item>
where
    S: Stream<Item = Item>,
{
    stream.filter(move |item| {
        future::ready(match item {
            Ok(message) => matches_tag(message, tag),
            Err(_) => true,
        })
    })
}

/// The text of every `Text` block, one element per block, in order.
pub fn text_content<S>(stream: S) -> impl Stream<Item = Result<String, SessionError>>
where
    S: Stream<Item = Item>,
{
    stream.flat_map(|item| {
        stream::iter(match item {
            Ok(Message::Assistant(a)) => a
                .message
                .content
                .iter()
                .filter_map(|b| b.as_text().map(|t| Ok(t.to_owned())))
                .collect::<Vec<_>>(),
            Ok(_) => Vec::new(),
            Err(e) => vec![Err(e)],
        })
    })
}

/// The text of every `Thinking` block, one element per block, in order.
pub fn thinking_content<S>(stream: S) -> impl Stream<Item = Result<String, SessionError>>
where
    S: Stream<Item = Item>,
{
    stream.flat_map(|item| {
        stream::iter(match item {
            Ok(Message::Assistant(a)) => a
                .message
                .content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Thinking { thinking, .. } => Some(Ok(thinking.clone())),
                    _ => None,
                })
                .collect::<Vec<_>>(),
            Ok(_) => Vec::new(),
            Err(e) => vec![Err(e)],
        })
    })
}

/// Every `tool_use` block, in order.
pub fn tool_uses<S>(stream: S) -> impl Stream<Item = Result<ToolUse, SessionError>>
where
    S: Stream<Item = Item>,
{
    stream.flat_map(|item| {
        stream::iter(match item {
            Ok(Message::Assistant(a)) => a
                .message
                .content
                .iter()
                .filter_map(tool_use_from_block)
                .map(Ok)
                .collect::<Vec<_>>(),
            Ok(_) => Vec::new(),
            Err(e) => vec![Err(e)],
        })
    })
}

/// Tool results whose corresponding `tool_use` had `name`, in result-arrival
/// order. Correlation is by id, tracked internally.
pub fn tool_results_by_name<S>(
    stream: S,
    name: impl Into<String>,
) -> impl Stream<Item = Result<ToolResult, SessionError>>
where
    S: Stream<Item = Item>,
{
    let name = name.into();
    stream
        .scan(HashSet::<String>::new(), move |ids, item| {
            let out: Vec<Result<ToolResult, SessionError>> = match item {
                Ok(Message::Assistant(a)) => {
                    for block in &a.message.content {
                        if let ContentBlock::ToolUse {
                            id, name: n, ..
                        } = block
                        {
                            if *n == name {
                                ids.insert(id.clone());
                            }
                        }
                    }
                    Vec::new()
                }
                Ok(Message::User(u)) => u
                    .message
                    .content
                    .blocks()
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } if ids.contains(tool_use_id) => Some(Ok(ToolResult {
                            tool_use_id: tool_use_id.clone(),
                            content: content.clone(),
                            is_error: *is_error,
                        })),
                        _ => None,
                    })
                    .collect(),
                Ok(_) => Vec::new(),
                Err(e) => vec![Err(e)],
            };
            future::ready(Some(out))
        })
        .flat_map(stream::iter)
}

/// Text fragments from partial-streaming events.
pub fn text_deltas<S>(stream: S) -> impl Stream<Item = Result<String, SessionError>>
where
    S: Stream<Item = Item>,
{
    stream.filter_map(|item| {
        future::ready(match item {
            Ok(Message::StreamEvent(ev)) => match ev.event.delta {
                Some(Delta::TextDelta { text }) => Some(Ok(text)),
                _ => None,
            },
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
    })
}

/// Thinking fragments from partial-streaming events.
pub fn thinking_deltas<S>(stream: S) -> impl Stream<Item = Result<String, SessionError>>
where
    S: Stream<Item = Item>,
{
    stream.filter_map(|item| {
        future::ready(match item {
            Ok(Message::StreamEvent(ev)) => match ev.event.delta {
                Some(Delta::ThinkingDelta { thinking }) => Some(Ok(thinking)),
                _ => None,
            },
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
    })
}

/// Every delta carried by a stream event, whatever its kind.
pub fn content_deltas<S>(stream: S) -> impl Stream<Item = Result<Delta, SessionError>>
where
    S: Stream<Item = Item>,
{
    stream.filter_map(|item| {
        future::ready(match item {
            Ok(Message::StreamEvent(ev)) => ev.event.delta.map(Ok),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
    })
}

/// Truncate inclusively at the first `Result` message.
pub fn until_result<S>(stream: S) -> impl Stream<Item = Item>
where
    S: Stream<Item = Item>,
{
    stream.scan(false, |done, item| {
        if *done {
            return future::ready(None);
        }
        if matches!(item, Ok(Message::Result(_))) {
            *done = true;
        }
        future::ready(Some(item))
    })
}

/// Consume until the first `Result` and return its `result` field.
pub async fn final_text<S>(stream: S) -> Result<Option<String>, SessionError>
where
    S: Stream<Item = Item>,
{
    futures::pin_mut!(stream);
    while let Some(item) = stream.next().await {
        if let Message::Result(result) = item? {
            return Ok(result.result);
        }
    }
    Ok(None)
}

/// Side-effecting passthrough over every item.
pub fn tap<S, F>(stream: S, mut side_effect: F) -> impl Stream<Item = Item>
where
    S: Stream<Item = Item>,
    F: FnMut(&Item),
{
    stream.map(move |item| {
        side_effect(&item);
        item
    })
}

/// Side-effecting passthrough invoked once per `tool_use` block.
pub fn on_tool_use<S, F>(stream: S, mut side_effect: F) -> impl Stream<Item = Item>
where
    S: Stream<Item = Item>,
    F: FnMut(&ToolUse),
{
    stream.map(move |item| {
        if let Ok(Message::Assistant(a)) = &item {
            for block in &a.message.content {
                if let Some(tool_use) = tool_use_from_block(block) {
                    side_effect(&tool_use);
                }
            }
        }
        item
    })
}

/// Everything [`collect`] gathers from a drained stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collected {
    /// Concatenated assistant text, in block order.
    pub text: String,
    /// Concatenated thinking text, in block order.
    pub thinking: String,
    /// Tool invocations in tool-use order; `result` is `None` when no
    /// matching result arrived before the terminal.
    pub tool_calls: Vec<ToolCall>,
    pub result: Option<ResultMessage>,
    pub is_error: bool,
}

/// Drain the stream fully and summarize it.
pub async fn collect<S>(stream: S) -> Result<Collected, SessionError>
where
    S: Stream<Item = Item>,
{
    futures::pin_mut!(stream);
    let mut collected = Collected::default();
    while let Some(item) = stream.next().await {
        match item? {
            Message::Assistant(a) => {
                for block in &a.message.content {
                    match block {
                        ContentBlock::Text { text } => collected.text.push_str(text),
                        ContentBlock::Thinking { thinking, .. } => {
                            collected.thinking.push_str(thinking)
                        }
                        _ => {}
                    }
                    if let Some(tool_use) = tool_use_from_block(block) {
                        collected.tool_calls.push(ToolCall {
                            tool_use,
                            result: None,
                        });
                    }
                }
            }
            Message::User(u) => {
                for block in u.message.content.blocks() {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } = block
                    {
                        if let Some(call) = collected
                            .tool_calls
                            .iter_mut()
                            .find(|c| c.tool_use.id == *tool_use_id && c.result.is_none())
                        {
                            call.result = Some(ToolResult {
                                tool_use_id: tool_use_id.clone(),
                                content: content.clone(),
                                is_error: *is_error,
                            });
                        }
                    }
                }
            }
            Message::Result(result) => {
                collected.is_error = result.is_error;
                collected.result = Some(result);
            }
            _ => {}
        }
    }
    Ok(collected)
}

fn tool_use_from_block(block: &ContentBlock) -> Option<ToolUse> {
    match block {
        ContentBlock::ToolUse {
            id,
            name,
            input,
            caller,
        } => Some(ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
            caller: caller.clone(),
        }),
        _ => None,
    }
}
