//! The delivery-channel seam.
//!
//! An [`Adapter`] owns the CLI subprocess (or a substitute) and speaks the
//! NDJSON protocol with it. The session talks to the adapter only through
//! this trait plus one-way [`AdapterEvent`]s addressed by [`RequestId`],
//! which is what lets [`ScriptedAdapter`](scripted::ScriptedAdapter) stand
//! in for the real CLI in tests.

use std::fmt;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::SessionError;
use crate::message::Message;
use crate::options::{Prompt, QueryOverrides, SessionOptions};

pub mod scripted;
pub mod stdio;

/// Opaque id minted per query. Unique within one session process; never
/// leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub(crate) fn mint() -> Self {
        RequestId(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One query handed to the adapter.
#[derive(Debug, Clone)]
pub struct QuerySubmission {
    pub request: RequestId,
    pub prompt: Prompt,
    /// The session's cached resume id at submission time; stamped on the
    /// outbound frame and used for `--resume` if the adapter (re)spawns.
    pub session_id: Option<String>,
    pub overrides: QueryOverrides,
}

/// Events the adapter sends to the session. All but `Status` are addressed
/// to a request.
#[derive(Debug)]
pub enum AdapterEvent {
    /// One decoded message belonging to `request`.
    Message {
        request: RequestId,
        message: Message,
    },
    /// Terminal marker; nothing further will arrive for `request`.
    Done {
        request: RequestId,
        reason: DoneReason,
    },
    /// A recoverable, non-terminal error on `request`.
    Error {
        request: RequestId,
        error: SessionError,
    },
    Status(AdapterStatus),
}

#[derive(Debug)]
pub enum DoneReason {
    Completed,
    Cancelled,
    Error(SessionError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdapterStatus {
    Provisioning,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Health {
    Healthy,
    Degraded,
    Unhealthy(String),
}

pub type AdapterEventSender = mpsc::UnboundedSender<AdapterEvent>;

/// The transport abstraction owning the CLI (or substitute) channel.
#[async_trait]
pub trait Adapter: Send + 'static {
    /// Begin provisioning. May return before the channel is usable;
    /// readiness is signalled with [`AdapterStatus::Ready`] on `events`.
    /// `resume` is the session's cached resume id at start time.
    async fn start(
        &mut self,
        events: AdapterEventSender,
        options: &SessionOptions,
        resume: Option<String>,
    ) -> Result<(), SessionError>;

    /// Submit a query. Fails fast with [`SessionError::NotReady`] while
    /// provisioning and [`SessionError::Busy`] when the internal FIFO is
    /// full; the session holds the query and retries on the next `Ready`.
    async fn send_query(&mut self, submission: QuerySubmission) -> Result<(), SessionError>;

    /// Drop `request` if it is still queued; interrupt it if it is the one
    /// in flight. Unknown ids are ignored.
    async fn cancel(&mut self, request: RequestId) -> Result<(), SessionError>;

    /// Interrupt whatever is currently in flight (platform interrupt signal
    /// to the subprocess). Queued queries are unaffected.
    async fn interrupt(&mut self) -> Result<(), SessionError>;

    fn health(&self) -> Health;

    /// Graceful shutdown; releases the subprocess and workspace resources.
    async fn stop(&mut self) -> Result<(), SessionError>;
}

/// Build the single NDJSON input frame for a query.
///
/// `parent_tool_use_id` is emitted explicitly (as `null` when absent): the
/// CLI's input parser expects the key to be present.
pub fn input_frame(
    prompt: &Prompt,
    session_id: Option<&str>,
    parent_tool_use_id: Option<&str>,
) -> Value {
    let content = match prompt {
        Prompt::Text(text) => Value::String(text.clone()),
        Prompt::Blocks(blocks) => {
            Value::Array(blocks.iter().map(|b| b.to_value()).collect())
        }
    };
    json!({
        "type": "user",
        "message": {"role": "user", "content": content},
        "session_id": session_id.unwrap_or("default"),
        "parent_tool_use_id": parent_tool_use_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentBlock, ToolResultContent};

    #[test]
    fn request_ids_are_unique() {
        let a = RequestId::mint();
        let b = RequestId::mint();
        assert_ne!(a, b);
    }

    #[test]
    fn text_input_frame_shape() {
        let frame = input_frame(&Prompt::Text("hello".into()), Some("sess-1"), None);
        assert_eq!(
            frame,
            serde_json::json!({
                "type": "user",
                "message": {"role": "user", "content": "hello"},
                "session_id": "sess-1",
                "parent_tool_use_id": null,
            })
        );
    }

    #[test]
    fn missing_session_id_falls_back_to_default() {
        let frame = input_frame(&Prompt::Text("hi".into()), None, None);
        assert_eq!(frame["session_id"], "default");
    }

    #[test]
    fn tool_response_frame_carries_tool_result_blocks() {
        let prompt = Prompt::Blocks(vec![ContentBlock::ToolResult {
            tool_use_id: "t1".into(),
            content: Some(ToolResultContent::Text("42".into())),
            is_error: false,
        }]);
        let frame = input_frame(&prompt, Some("s"), Some("parent-1"));
        assert_eq!(frame["parent_tool_use_id"], "parent-1");
        assert_eq!(
            frame["message"]["content"][0],
            serde_json::json!({
                "type": "tool_result",
                "tool_use_id": "t1",
                "content": "42"
            })
        );
    }
}
