use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::content::ContentBlock;
use crate::error::SessionError;
use crate::framer::DEFAULT_MAX_LINE_SIZE;
use crate::message::PermissionMode;

/// Default per-query timeout, measured from submission.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(300);

/// Options for opening a [`Session`](crate::Session).
///
/// The session treats this as an already-merged, already-layered
/// configuration; anything that needs schema validation or config-file
/// layering happens before it gets here. [`SessionOptions::validate`] only
/// guards the handful of values the core itself depends on.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Path to the CLI binary. Injected rather than discovered; callers that
    /// want `$PATH` lookup or an env override resolve it themselves.
    pub binary: PathBuf,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    /// Tool names passed through as `--allowedTools` (comma-separated).
    pub allowed_tools: Vec<String>,
    /// Extra directories passed through as repeated `--add-dir`.
    pub add_dirs: Vec<PathBuf>,
    pub permission_mode: PermissionMode,
    /// Opaque MCP descriptor forwarded as `--mcp-config`; wiring the servers
    /// up is the CLI's business.
    pub mcp_config: Option<String>,
    /// Enables `StreamEvent` traffic via `--include-partial-messages`.
    pub include_partial_messages: bool,
    /// Working directory for the subprocess. When unset the adapter runs the
    /// CLI in its scratch workspace.
    pub cwd: Option<PathBuf>,
    /// Additional environment variables for the subprocess.
    pub env: HashMap<String, String>,
    /// Feature flags passed through to the CLI unchanged.
    pub extra_args: Vec<String>,
    /// Per-query timeout, measured from submission.
    pub timeout: Duration,
    /// How long to wait after an interrupt before killing the subprocess.
    /// Defaults to the query timeout.
    pub interrupt_grace: Option<Duration>,
    /// Cap on a single NDJSON line from the CLI.
    pub max_line_size: usize,
    /// How many submitted-but-not-finished queries the adapter will hold.
    pub queue_limit: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            binary: PathBuf::from("claude"),
            model: None,
            system_prompt: None,
            allowed_tools: Vec::new(),
            add_dirs: Vec::new(),
            permission_mode: PermissionMode::Default,
            mcp_config: None,
            include_partial_messages: false,
            cwd: None,
            env: HashMap::new(),
            extra_args: Vec::new(),
            timeout: DEFAULT_QUERY_TIMEOUT,
            interrupt_grace: None,
            max_line_size: DEFAULT_MAX_LINE_SIZE,
            queue_limit: 64,
        }
    }
}

impl SessionOptions {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.binary.as_os_str().is_empty() {
            return Err(SessionError::InvalidOption("binary path is empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(SessionError::InvalidOption("timeout must be non-zero".into()));
        }
        if self.max_line_size == 0 {
            return Err(SessionError::InvalidOption(
                "max_line_size must be non-zero".into(),
            ));
        }
        if self.queue_limit == 0 {
            return Err(SessionError::InvalidOption(
                "queue_limit must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// The grace period granted after an interrupt before the subprocess is
    /// killed outright.
    pub fn grace_period(&self) -> Duration {
        self.interrupt_grace.unwrap_or(self.timeout)
    }
}

/// Per-query overrides layered over [`SessionOptions`] at submission.
#[derive(Debug, Clone, Default)]
pub struct QueryOverrides {
    /// Replaces the session-level per-query timeout.
    pub timeout: Option<Duration>,
    /// Attributes the query to a parent tool invocation.
    pub parent_tool_use_id: Option<String>,
    /// Forces the session id written on the outbound frame, overriding the
    /// cached resume id.
    pub session_id: Option<String>,
}

/// What gets written on the outbound user frame: a plain prompt, or a list
/// of content blocks (e.g. `tool_result` answers to an earlier `tool_use`).
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl From<&str> for Prompt {
    fn from(s: &str) -> Self {
        Prompt::Text(s.to_owned())
    }
}

impl From<String> for Prompt {
    fn from(s: String) -> Self {
        Prompt::Text(s)
    }
}

impl From<Vec<ContentBlock>> for Prompt {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        Prompt::Blocks(blocks)
    }
}
