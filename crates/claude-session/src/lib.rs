//! `claude-session` — supervised session driver for the Claude CLI
//! stream-json protocol.
//!
//! This crate embeds the CLI as a long-running subsystem: it owns the
//! subprocess, multiplexes concurrent queries over its single stdio channel,
//! and hands each query back as a typed, lazily-consumed message stream.
//!
//! # Architecture
//!
//! ```text
//! Session (actor task)
//!     │  owns request table, cached resume id, pending FIFO
//!     ▼
//! Adapter (trait; StdioAdapter by default)
//!     │  owns `claude --print --input-format stream-json …`,
//!     │  serializes queries, attributes output to the owning request
//!     ▼
//! LineFramer → MessageDecoder
//!     │  NDJSON lines → typed Message values
//!     ▼
//! MessageStream  ← per-request channel, futures::Stream
//!     │
//! combinators / ToolCorrelator  ← shape the stream, pair tool calls
//! ```
//!
//! # Quick start
//!
//! ```rust,ignore
//! use claude_session::{Session, SessionOptions, QueryOverrides};
//! use futures::StreamExt;
//!
//! let session = Session::open(SessionOptions::default())?;
//! let mut stream = session
//!     .stream("Summarize src/main.rs", QueryOverrides::default())
//!     .await?;
//! while let Some(message) = stream.next().await {
//!     println!("{}", message?.to_json_line());
//! }
//! ```
//!
//! Or collapse a query to its final text:
//!
//! ```rust,ignore
//! let answer = session.send("say hello", QueryOverrides::default()).await?;
//! ```

pub mod adapter;
pub mod combinators;
pub mod content;
pub mod correlator;
pub mod decode;
pub mod encode;
pub mod error;
pub mod framer;
pub mod message;
pub mod options;
pub mod session;

pub use adapter::scripted::ScriptedAdapter;
pub use adapter::stdio::StdioAdapter;
pub use adapter::{Adapter, AdapterEvent, AdapterStatus, DoneReason, Health, RequestId};
pub use combinators::{Collected, MessageTag, ToolCall};
pub use content::{ContentBlock, ToolResultContent};
pub use correlator::{ToolCorrelator, ToolEvent};
pub use error::SessionError;
pub use framer::LineFramer;
pub use message::{
    AssistantMessage, Message, PermissionMode, ResultMessage, ResultSubtype, StopReason,
    SystemInit, SystemMessage, SystemPayload, UserMessage,
};
pub use options::{Prompt, QueryOverrides, SessionOptions};
pub use session::{MessageStream, Session};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, SessionError>;
