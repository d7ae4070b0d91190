use thiserror::Error;

use crate::decode::DecodeError;
use crate::framer::FramerError;

/// Everything that can go wrong between a caller and the CLI.
///
/// Parse errors are local (the bad line is dropped with a diagnostic);
/// request-lifecycle errors close one request's channel; transport errors
/// abort every in-flight request and take the adapter down with them.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    // ── Parse ─────────────────────────────────────────────────────────────
    #[error(transparent)]
    Framer(#[from] FramerError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    // ── Transport ─────────────────────────────────────────────────────────
    #[error("CLI binary not found: {0}")]
    CliNotFound(String),

    #[error("CLI binary is not executable: {0}")]
    InvalidBinary(String),

    #[error("adapter failed to provision: {0}")]
    ProvisioningFailed(String),

    #[error("CLI subprocess exited unexpectedly ({0})")]
    SubprocessExit(String),

    #[error("failed to write to CLI stdin: {0}")]
    WriteFailed(String),

    // ── Request lifecycle ─────────────────────────────────────────────────
    #[error("query timed out")]
    Timeout,

    #[error("query was interrupted")]
    Interrupted,

    #[error("adapter exited: {0}")]
    AdapterExit(String),

    #[error("adapter cannot accept another query right now")]
    Busy,

    #[error("adapter is still provisioning")]
    NotReady,

    #[error("session is stopped")]
    Closed,

    // ── CLI-reported ──────────────────────────────────────────────────────
    #[error("claude reported {subtype}: {message}")]
    Claude {
        subtype: String,
        message: String,
        details: Option<serde_json::Value>,
    },

    // ── Configuration ─────────────────────────────────────────────────────
    #[error("invalid option: {0}")]
    InvalidOption(String),
}

impl SessionError {
    /// True for errors that abort the adapter and every in-flight request,
    /// as opposed to failing a single request or a single line.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SessionError::CliNotFound(_)
                | SessionError::InvalidBinary(_)
                | SessionError::ProvisioningFailed(_)
                | SessionError::SubprocessExit(_)
                | SessionError::WriteFailed(_)
                | SessionError::Framer(FramerError::LineTooLong { .. })
        )
    }
}
