use serde_json::{Map, Value};

use crate::content::ContentBlock;

// ─── Outer Message enum ───────────────────────────────────────────────────

/// Every message emitted by the CLI's stream-json output, discriminated by
/// the JSON `"type"` field.
///
/// The set is closed over the known protocol plus [`Message::Unknown`], the
/// forward-compatibility fallback: a frame with an unrecognized `type` is
/// carried through with its raw payload instead of failing the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    System(SystemMessage),
    Assistant(AssistantMessage),
    User(UserMessage),
    /// Terminal for the request; closes the per-request channel.
    Result(ResultMessage),
    /// Partial-streaming envelope (only with `--include-partial-messages`).
    StreamEvent(StreamEventMessage),
    /// `rate_limit_event` on the wire.
    RateLimit(RateLimitMessage),
    ToolProgress(ToolProgressMessage),
    ToolUseSummary(ToolUseSummaryMessage),
    AuthStatus(AuthStatusMessage),
    PromptSuggestion(PromptSuggestionMessage),
    /// Any future message type, payload preserved verbatim.
    Unknown(UnknownMessage),
}

impl Message {
    /// The session id carried by this message, if any. Known variants always
    /// carry one; `Unknown` payloads may not.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Message::System(m) => Some(&m.session_id),
            Message::Assistant(m) => Some(&m.session_id),
            Message::User(m) => Some(&m.session_id),
            Message::Result(m) => Some(&m.session_id),
            Message::StreamEvent(m) => Some(&m.session_id),
            Message::RateLimit(m) => Some(&m.session_id),
            Message::ToolProgress(m) => Some(&m.session_id),
            Message::ToolUseSummary(m) => Some(&m.session_id),
            Message::AuthStatus(m) => Some(&m.session_id),
            Message::PromptSuggestion(m) => Some(&m.session_id),
            Message::Unknown(m) => m.raw.get("session_id").and_then(Value::as_str),
        }
    }

    pub fn uuid(&self) -> Option<&str> {
        let uuid = match self {
            Message::System(m) => &m.uuid,
            Message::Assistant(m) => &m.uuid,
            Message::User(m) => &m.uuid,
            Message::Result(m) => &m.uuid,
            Message::StreamEvent(m) => &m.uuid,
            Message::RateLimit(m) => &m.uuid,
            Message::ToolProgress(m) => &m.uuid,
            Message::ToolUseSummary(m) => &m.uuid,
            Message::AuthStatus(m) => &m.uuid,
            Message::PromptSuggestion(m) => &m.uuid,
            Message::Unknown(m) => return m.raw.get("uuid").and_then(Value::as_str),
        };
        uuid.as_deref()
    }

    /// `Some` when this is the terminal result message.
    pub fn as_result(&self) -> Option<&ResultMessage> {
        match self {
            Message::Result(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Message::Result(_))
    }

    /// Wire name of the message type.
    pub fn type_name(&self) -> &str {
        match self {
            Message::System(_) => "system",
            Message::Assistant(_) => "assistant",
            Message::User(_) => "user",
            Message::Result(_) => "result",
            Message::StreamEvent(_) => "stream_event",
            Message::RateLimit(_) => "rate_limit_event",
            Message::ToolProgress(_) => "tool_progress",
            Message::ToolUseSummary(_) => "tool_use_summary",
            Message::AuthStatus(_) => "auth_status",
            Message::PromptSuggestion(_) => "prompt_suggestion",
            Message::Unknown(m) => &m.message_type,
        }
    }
}

// ─── System messages ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SystemMessage {
    pub session_id: String,
    pub uuid: Option<String>,
    pub payload: SystemPayload,
}

/// `type = "system"`, further distinguished by `subtype`. Unknown subtypes
/// fall through to [`SystemPayload::Generic`] with the payload preserved.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemPayload {
    Init(SystemInit),
    CompactBoundary(CompactBoundary),
    Generic {
        subtype: String,
        data: Map<String, Value>,
    },
}

impl SystemPayload {
    pub fn subtype(&self) -> &str {
        match self {
            SystemPayload::Init(_) => "init",
            SystemPayload::CompactBoundary(_) => "compact_boundary",
            SystemPayload::Generic { subtype, .. } => subtype,
        }
    }
}

/// The session-initialization envelope, first message of every conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemInit {
    pub cwd: String,
    pub model: String,
    pub permission_mode: PermissionMode,
    pub api_key_source: Option<String>,
    pub tools: Vec<String>,
    pub mcp_servers: Vec<McpServerStatus>,
    pub slash_commands: Option<Vec<String>>,
    pub output_style: Option<String>,
    pub agents: Option<Vec<String>>,
    pub skills: Option<Vec<String>>,
    pub plugins: Option<Vec<Value>>,
    pub claude_code_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct McpServerStatus {
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompactBoundary {
    pub compact_metadata: CompactMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompactMetadata {
    pub trigger: CompactTrigger,
    pub pre_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompactTrigger {
    Auto,
    Manual,
    Other(String),
}

impl CompactTrigger {
    pub fn parse(s: &str) -> Self {
        match s {
            "auto" => CompactTrigger::Auto,
            "manual" => CompactTrigger::Manual,
            other => CompactTrigger::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CompactTrigger::Auto => "auto",
            CompactTrigger::Manual => "manual",
            CompactTrigger::Other(s) => s,
        }
    }
}

/// Permission mode for tool execution. The CLI spells these camelCase on the
/// wire and in its flag values.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
    DontAsk,
    Delegate,
    Other(String),
}

impl PermissionMode {
    /// Accepts both the camelCase wire spelling and the snake_case spelling.
    pub fn parse(s: &str) -> Self {
        match s {
            "default" => PermissionMode::Default,
            "acceptEdits" | "accept_edits" => PermissionMode::AcceptEdits,
            "bypassPermissions" | "bypass_permissions" => PermissionMode::BypassPermissions,
            "plan" => PermissionMode::Plan,
            "dontAsk" | "dont_ask" => PermissionMode::DontAsk,
            "delegate" => PermissionMode::Delegate,
            other => PermissionMode::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
            PermissionMode::Plan => "plan",
            PermissionMode::DontAsk => "dontAsk",
            PermissionMode::Delegate => "delegate",
            PermissionMode::Other(s) => s,
        }
    }
}

// ─── Assistant messages ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct AssistantMessage {
    pub message: AssistantInner,
    pub parent_tool_use_id: Option<String>,
    pub error: Option<AssistantError>,
    pub session_id: String,
    pub uuid: Option<String>,
}

impl AssistantMessage {
    /// Iterate the `tool_use` blocks of this message.
    pub fn tool_uses(&self) -> impl Iterator<Item = &ContentBlock> {
        self.message.content.iter().filter(|b| b.is_tool_use())
    }

    pub fn has_tool_use(&self) -> bool {
        self.message.content.iter().any(ContentBlock::is_tool_use)
    }
}

/// The nested API message as it appears under `"message"`.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantInner {
    pub id: String,
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    /// Unknown stop reasons carry the raw string.
    Other(String),
}

impl StopReason {
    pub fn parse(s: &str) -> Self {
        match s {
            "end_turn" => StopReason::EndTurn,
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            "tool_use" => StopReason::ToolUse,
            other => StopReason::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::MaxTokens => "max_tokens",
            StopReason::StopSequence => "stop_sequence",
            StopReason::ToolUse => "tool_use",
            StopReason::Other(s) => s,
        }
    }
}

/// API-level error classification attached to an assistant message.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantError {
    AuthenticationFailed,
    BillingError,
    RateLimit,
    InvalidRequest,
    ServerError,
    Unknown,
    Other(String),
}

impl AssistantError {
    pub fn parse(s: &str) -> Self {
        match s {
            "authentication_failed" => AssistantError::AuthenticationFailed,
            "billing_error" => AssistantError::BillingError,
            "rate_limit" => AssistantError::RateLimit,
            "invalid_request" => AssistantError::InvalidRequest,
            "server_error" => AssistantError::ServerError,
            "unknown" => AssistantError::Unknown,
            other => AssistantError::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AssistantError::AuthenticationFailed => "authentication_failed",
            AssistantError::BillingError => "billing_error",
            AssistantError::RateLimit => "rate_limit",
            AssistantError::InvalidRequest => "invalid_request",
            AssistantError::ServerError => "server_error",
            AssistantError::Unknown => "unknown",
            AssistantError::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
}

// ─── User messages ────────────────────────────────────────────────────────

/// `type = "user"` — typically tool results fed back to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct UserMessage {
    pub message: UserInner,
    pub parent_tool_use_id: Option<String>,
    /// Opaque per-tool metadata the CLI attaches alongside the result.
    pub tool_use_result: Option<Value>,
    pub session_id: String,
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserInner {
    pub content: UserContent,
}

/// User content is either a plain string or a content-block list.
#[derive(Debug, Clone, PartialEq)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl UserContent {
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            UserContent::Text(_) => &[],
            UserContent::Blocks(blocks) => blocks,
        }
    }
}

// ─── Result messages ──────────────────────────────────────────────────────

/// `type = "result"` — the terminal message of every request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultMessage {
    pub subtype: ResultSubtype,
    pub is_error: bool,
    pub duration_ms: f64,
    pub duration_api_ms: f64,
    pub num_turns: u64,
    pub result: Option<String>,
    pub total_cost_usd: f64,
    pub usage: Usage,
    pub model_usage: Option<Map<String, Value>>,
    pub permission_denials: Option<Vec<Value>>,
    pub errors: Option<Vec<String>>,
    pub structured_output: Option<Value>,
    pub session_id: String,
    pub uuid: Option<String>,
}

impl ResultMessage {
    pub fn result_text(&self) -> Option<&str> {
        self.result.as_deref()
    }

    /// Joined error detail for error subtypes, falling back to the subtype
    /// name when the CLI gave no detail.
    pub fn error_detail(&self) -> String {
        match &self.errors {
            Some(errors) if !errors.is_empty() => errors.join("; "),
            _ => self.subtype.as_str().to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultSubtype {
    Success,
    ErrorMaxTurns,
    ErrorDuringExecution,
    ErrorMaxBudgetUsd,
    ErrorMaxStructuredOutputRetries,
    Other(String),
}

impl ResultSubtype {
    pub fn parse(s: &str) -> Self {
        match s {
            "success" => ResultSubtype::Success,
            "error_max_turns" => ResultSubtype::ErrorMaxTurns,
            "error_during_execution" => ResultSubtype::ErrorDuringExecution,
            "error_max_budget_usd" => ResultSubtype::ErrorMaxBudgetUsd,
            "error_max_structured_output_retries" => ResultSubtype::ErrorMaxStructuredOutputRetries,
            other => ResultSubtype::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ResultSubtype::Success => "success",
            ResultSubtype::ErrorMaxTurns => "error_max_turns",
            ResultSubtype::ErrorDuringExecution => "error_during_execution",
            ResultSubtype::ErrorMaxBudgetUsd => "error_max_budget_usd",
            ResultSubtype::ErrorMaxStructuredOutputRetries => {
                "error_max_structured_output_retries"
            }
            ResultSubtype::Other(s) => s,
        }
    }
}

// ─── Stream events ────────────────────────────────────────────────────────

/// `type = "stream_event"` — character-level streaming chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEventMessage {
    pub event: StreamEvent,
    pub parent_tool_use_id: Option<String>,
    pub session_id: String,
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub event_type: StreamEventType,
    pub index: Option<u64>,
    pub delta: Option<Delta>,
    pub content_block: Option<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEventType {
    MessageStart,
    ContentBlockStart,
    ContentBlockDelta,
    ContentBlockStop,
    MessageDelta,
    MessageStop,
    Other(String),
}

impl StreamEventType {
    pub fn parse(s: &str) -> Self {
        match s {
            "message_start" => StreamEventType::MessageStart,
            "content_block_start" => StreamEventType::ContentBlockStart,
            "content_block_delta" => StreamEventType::ContentBlockDelta,
            "content_block_stop" => StreamEventType::ContentBlockStop,
            "message_delta" => StreamEventType::MessageDelta,
            "message_stop" => StreamEventType::MessageStop,
            other => StreamEventType::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StreamEventType::MessageStart => "message_start",
            StreamEventType::ContentBlockStart => "content_block_start",
            StreamEventType::ContentBlockDelta => "content_block_delta",
            StreamEventType::ContentBlockStop => "content_block_stop",
            StreamEventType::MessageDelta => "message_delta",
            StreamEventType::MessageStop => "message_stop",
            StreamEventType::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
    Other { delta_type: String, raw: Value },
}

// ─── Auxiliary message types ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitMessage {
    pub status: RateLimitStatus,
    pub resets_at: Option<u64>,
    pub utilization: Option<f64>,
    pub session_id: String,
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitStatus {
    Allowed,
    AllowedWarning,
    Rejected,
    Other(String),
}

impl RateLimitStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "allowed" => RateLimitStatus::Allowed,
            "allowed_warning" => RateLimitStatus::AllowedWarning,
            "rejected" => RateLimitStatus::Rejected,
            other => RateLimitStatus::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RateLimitStatus::Allowed => "allowed",
            RateLimitStatus::AllowedWarning => "allowed_warning",
            RateLimitStatus::Rejected => "rejected",
            RateLimitStatus::Other(s) => s,
        }
    }
}

/// `type = "tool_progress"` — emitted periodically while a tool runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolProgressMessage {
    pub tool_use_id: String,
    pub tool_name: String,
    pub elapsed_time_seconds: Option<f64>,
    pub parent_tool_use_id: Option<String>,
    pub session_id: String,
    pub uuid: Option<String>,
}

/// `type = "tool_use_summary"` — emitted after a batch of tool calls.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUseSummaryMessage {
    pub summary: String,
    pub preceding_tool_use_ids: Vec<String>,
    pub session_id: String,
    pub uuid: Option<String>,
}

/// `type = "auth_status"` — authentication progress during session init.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthStatusMessage {
    pub is_authenticating: bool,
    pub output: Vec<String>,
    pub error: Option<String>,
    pub session_id: String,
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptSuggestionMessage {
    pub suggestion: String,
    pub session_id: String,
    pub uuid: Option<String>,
}

/// Forward-compatibility fallback: an unrecognized message type with the raw
/// frame preserved.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownMessage {
    pub message_type: String,
    pub raw: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_mode_accepts_both_spellings() {
        assert_eq!(
            PermissionMode::parse("acceptEdits"),
            PermissionMode::AcceptEdits
        );
        assert_eq!(
            PermissionMode::parse("accept_edits"),
            PermissionMode::AcceptEdits
        );
        assert_eq!(PermissionMode::parse("dontAsk"), PermissionMode::DontAsk);
        assert_eq!(PermissionMode::parse("delegate"), PermissionMode::Delegate);
    }

    #[test]
    fn unknown_enum_strings_are_preserved() {
        assert_eq!(
            StopReason::parse("pause_turn"),
            StopReason::Other("pause_turn".into())
        );
        assert_eq!(StopReason::parse("pause_turn").as_str(), "pause_turn");
        assert_eq!(
            ResultSubtype::parse("error_new_kind"),
            ResultSubtype::Other("error_new_kind".into())
        );
        assert_eq!(
            PermissionMode::parse("supervised"),
            PermissionMode::Other("supervised".into())
        );
    }

    #[test]
    fn result_error_detail_prefers_errors_list() {
        let result = ResultMessage {
            subtype: ResultSubtype::ErrorMaxTurns,
            is_error: true,
            duration_ms: 1.0,
            duration_api_ms: 1.0,
            num_turns: 10,
            result: None,
            total_cost_usd: 0.0,
            usage: Usage::default(),
            model_usage: None,
            permission_denials: None,
            errors: Some(vec!["too many turns".into(), "stopped".into()]),
            structured_output: None,
            session_id: "s".into(),
            uuid: None,
        };
        assert_eq!(result.error_detail(), "too many turns; stopped");

        let bare = ResultMessage {
            errors: None,
            ..result
        };
        assert_eq!(bare.error_detail(), "error_max_turns");
    }
}
