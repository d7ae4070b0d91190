//! Decoding of stream-json frames into the typed [`Message`] model.
//!
//! This is a hand-written shape validator rather than a serde derive: the
//! protocol demands a structured error taxonomy (`missing_fields`,
//! `invalid_system_subtype`, …), camelCase/snake_case key normalization at a
//! single boundary, and generic fallbacks for unknown message types and
//! system subtypes. Downstream code only ever sees the typed model.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::content::{self, ContentListError};
use crate::message::*;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    #[error("message has no \"type\" field")]
    MissingType,

    #[error("unknown message type {0:?}")]
    UnknownMessageType(String),

    #[error("message is missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("system message has a missing or malformed \"subtype\"")]
    InvalidSystemSubtype,

    #[error("content failed to parse: {0}")]
    ContentParse(#[from] ContentListError),

    #[error("malformed message: {0}")]
    Shape(String),
}

/// Error for a single line: bad JSON or a bad decoded shape.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LineError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error(transparent)]
    Decode(DecodeError),
}

/// Error from [`decode_stream`], carrying the zero-based line index.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("line {line}: {kind}")]
pub struct StreamDecodeError {
    pub line: usize,
    pub kind: LineError,
}

/// Decode one JSON object into a [`Message`].
///
/// Strict on the top-level type: an unrecognized `"type"` is
/// [`DecodeError::UnknownMessageType`]. The streaming paths use
/// [`decode_lenient`], which maps that case to [`Message::Unknown`] instead
/// so that future protocol additions never terminate a stream.
pub fn decode(value: &Value) -> Result<Message, DecodeError> {
    let obj = value
        .as_object()
        .ok_or_else(|| DecodeError::Shape("expected a JSON object".into()))?;
    let message_type = match obj.get("type") {
        Some(Value::String(s)) => s.as_str(),
        Some(_) => return Err(DecodeError::Shape("\"type\" should be a string".into())),
        None => return Err(DecodeError::MissingType),
    };

    match message_type {
        "system" => decode_system(obj),
        "assistant" => decode_assistant(obj),
        "user" => decode_user(obj),
        "result" => decode_result(obj),
        "stream_event" => decode_stream_event(obj),
        "rate_limit_event" => decode_rate_limit(obj),
        "tool_progress" => decode_tool_progress(obj),
        "tool_use_summary" => decode_tool_use_summary(obj),
        "auth_status" => decode_auth_status(obj),
        "prompt_suggestion" => decode_prompt_suggestion(obj),
        other => Err(DecodeError::UnknownMessageType(other.to_owned())),
    }
}

/// [`decode`], with unknown message types preserved as [`Message::Unknown`].
pub fn decode_lenient(value: &Value) -> Result<Message, DecodeError> {
    match decode(value) {
        Err(DecodeError::UnknownMessageType(message_type)) => {
            Ok(Message::Unknown(UnknownMessage {
                message_type,
                raw: value.clone(),
            }))
        }
        other => other,
    }
}

/// Decode one NDJSON line.
pub fn decode_line(line: &str) -> Result<Message, LineError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| LineError::Json(e.to_string()))?;
    decode_lenient(&value).map_err(LineError::Decode)
}

/// Decode a whole NDJSON document. Blank lines are skipped; the first error
/// short-circuits with its zero-based line index.
pub fn decode_stream(text: &str) -> Result<Vec<Message>, StreamDecodeError> {
    let mut messages = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let msg = decode_line(line).map_err(|kind| StreamDecodeError {
            line: line_no,
            kind,
        })?;
        messages.push(msg);
    }
    Ok(messages)
}

// ─── Per-type decoders ────────────────────────────────────────────────────

fn decode_system(obj: &Map<String, Value>) -> Result<Message, DecodeError> {
    let session_id = req_str(obj, "session_id")?;
    let uuid = opt_str(obj, "uuid")?;
    let subtype = match field(obj, "subtype") {
        Some(Value::String(s)) => s.clone(),
        _ => return Err(DecodeError::InvalidSystemSubtype),
    };

    let payload = match subtype.as_str() {
        "init" => SystemPayload::Init(decode_system_init(obj)?),
        "compact_boundary" => {
            let meta = req_object(obj, "compact_metadata")?;
            let trigger = req_str(&meta, "trigger")?;
            SystemPayload::CompactBoundary(CompactBoundary {
                compact_metadata: CompactMetadata {
                    trigger: CompactTrigger::parse(&trigger),
                    pre_tokens: req_u64(&meta, "pre_tokens")?,
                },
            })
        }
        _ => {
            // Unknown subtypes are forwarded, payload intact.
            let mut data = Map::new();
            for (k, v) in obj {
                if !matches!(k.as_str(), "type" | "subtype" | "session_id" | "uuid") {
                    data.insert(k.clone(), v.clone());
                }
            }
            SystemPayload::Generic { subtype, data }
        }
    };

    Ok(Message::System(SystemMessage {
        session_id,
        uuid,
        payload,
    }))
}

fn decode_system_init(obj: &Map<String, Value>) -> Result<SystemInit, DecodeError> {
    let mut missing = Vec::new();
    for key in ["cwd", "model", "permission_mode", "tools", "mcp_servers"] {
        if field(obj, key).is_none() {
            missing.push(key.to_owned());
        }
    }
    if !missing.is_empty() {
        return Err(DecodeError::MissingFields(missing));
    }

    let mcp_servers = req_array(obj, "mcp_servers")?
        .iter()
        .map(|v| {
            let entry = v
                .as_object()
                .ok_or_else(|| DecodeError::Shape("mcp_servers entries should be objects".into()))?;
            Ok(McpServerStatus {
                name: req_str(entry, "name")?,
                status: req_str(entry, "status")?,
            })
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;

    Ok(SystemInit {
        cwd: req_str(obj, "cwd")?,
        model: req_str(obj, "model")?,
        permission_mode: PermissionMode::parse(&req_str(obj, "permission_mode")?),
        api_key_source: opt_str(obj, "api_key_source")?,
        tools: req_str_list(obj, "tools")?,
        mcp_servers,
        slash_commands: opt_str_list(obj, "slash_commands")?,
        output_style: opt_str(obj, "output_style")?,
        agents: opt_str_list(obj, "agents")?,
        skills: opt_str_list(obj, "skills")?,
        plugins: opt_array(obj, "plugins")?.map(|a| a.to_vec()),
        claude_code_version: opt_str(obj, "claude_code_version")?,
    })
}

fn decode_assistant(obj: &Map<String, Value>) -> Result<Message, DecodeError> {
    let inner = req_object(obj, "message")?;
    let content = req_array(&inner, "content")?;
    let message = AssistantInner {
        id: req_str(&inner, "id")?,
        model: req_str(&inner, "model")?,
        content: content::decode_all(&content)?,
        stop_reason: opt_str(&inner, "stop_reason")?
            .map(|s| StopReason::parse(&s)),
        stop_sequence: opt_str(&inner, "stop_sequence")?,
        usage: decode_usage(&inner)?,
    };
    Ok(Message::Assistant(AssistantMessage {
        message,
        parent_tool_use_id: opt_str(obj, "parent_tool_use_id")?,
        error: opt_str(obj, "error")?.map(|s| AssistantError::parse(&s)),
        session_id: req_str(obj, "session_id")?,
        uuid: opt_str(obj, "uuid")?,
    }))
}

fn decode_user(obj: &Map<String, Value>) -> Result<Message, DecodeError> {
    let inner = req_object(obj, "message")?;
    let user_content = match field(&inner, "content") {
        Some(Value::String(s)) => UserContent::Text(s.clone()),
        Some(Value::Array(items)) => UserContent::Blocks(content::decode_all(items)?),
        Some(_) => {
            return Err(DecodeError::Shape(
                "user \"content\" should be a string or a block list".into(),
            ))
        }
        None => return Err(DecodeError::MissingFields(vec!["message.content".into()])),
    };
    Ok(Message::User(UserMessage {
        message: UserInner {
            content: user_content,
        },
        parent_tool_use_id: opt_str(obj, "parent_tool_use_id")?,
        tool_use_result: field(obj, "tool_use_result").cloned(),
        session_id: req_str(obj, "session_id")?,
        uuid: opt_str(obj, "uuid")?,
    }))
}

fn decode_result(obj: &Map<String, Value>) -> Result<Message, DecodeError> {
    let mut missing = Vec::new();
    for key in [
        "subtype",
        "is_error",
        "duration_ms",
        "duration_api_ms",
        "num_turns",
        "total_cost_usd",
        "session_id",
    ] {
        if field(obj, key).is_none() {
            missing.push(key.to_owned());
        }
    }
    if !missing.is_empty() {
        return Err(DecodeError::MissingFields(missing));
    }

    Ok(Message::Result(ResultMessage {
        subtype: ResultSubtype::parse(&req_str(obj, "subtype")?),
        is_error: req_bool(obj, "is_error")?,
        duration_ms: req_f64(obj, "duration_ms")?,
        duration_api_ms: req_f64(obj, "duration_api_ms")?,
        num_turns: req_u64(obj, "num_turns")?,
        result: opt_str(obj, "result")?,
        total_cost_usd: req_f64(obj, "total_cost_usd")?,
        usage: decode_usage(obj)?,
        model_usage: opt_object(obj, "model_usage")?,
        permission_denials: opt_array(obj, "permission_denials")?.map(|a| a.to_vec()),
        errors: opt_str_list(obj, "errors")?,
        structured_output: field(obj, "structured_output").cloned(),
        session_id: req_str(obj, "session_id")?,
        uuid: opt_str(obj, "uuid")?,
    }))
}

fn decode_stream_event(obj: &Map<String, Value>) -> Result<Message, DecodeError> {
    let event_obj = req_object(obj, "event")?;
    let event_type = StreamEventType::parse(&req_str(&event_obj, "type")?);
    let delta = match field(&event_obj, "delta") {
        None | Some(Value::Null) => None,
        Some(v) => Some(decode_delta(v)?),
    };
    let content_block = match field(&event_obj, "content_block") {
        None | Some(Value::Null) => None,
        Some(v) => Some(content::decode(v).map_err(|source| ContentListError {
            index: 0,
            source,
        })?),
    };
    Ok(Message::StreamEvent(StreamEventMessage {
        event: StreamEvent {
            event_type,
            index: opt_u64(&event_obj, "index")?,
            delta,
            content_block,
        },
        parent_tool_use_id: opt_str(obj, "parent_tool_use_id")?,
        session_id: req_str(obj, "session_id")?,
        uuid: opt_str(obj, "uuid")?,
    }))
}

fn decode_delta(value: &Value) -> Result<Delta, DecodeError> {
    let obj = value
        .as_object()
        .ok_or_else(|| DecodeError::Shape("\"delta\" should be an object".into()))?;
    let delta_type = req_str(obj, "type")?;
    Ok(match delta_type.as_str() {
        "text_delta" => Delta::TextDelta {
            text: req_str(obj, "text")?,
        },
        "thinking_delta" => Delta::ThinkingDelta {
            thinking: req_str(obj, "thinking")?,
        },
        "input_json_delta" => Delta::InputJsonDelta {
            partial_json: req_str(obj, "partial_json")?,
        },
        _ => Delta::Other {
            delta_type,
            raw: value.clone(),
        },
    })
}

fn decode_rate_limit(obj: &Map<String, Value>) -> Result<Message, DecodeError> {
    Ok(Message::RateLimit(RateLimitMessage {
        status: RateLimitStatus::parse(&req_str(obj, "status")?),
        resets_at: opt_u64(obj, "resets_at")?,
        utilization: opt_f64(obj, "utilization")?,
        session_id: req_str(obj, "session_id")?,
        uuid: opt_str(obj, "uuid")?,
    }))
}

fn decode_tool_progress(obj: &Map<String, Value>) -> Result<Message, DecodeError> {
    Ok(Message::ToolProgress(ToolProgressMessage {
        tool_use_id: req_str(obj, "tool_use_id")?,
        tool_name: req_str(obj, "tool_name")?,
        elapsed_time_seconds: opt_f64(obj, "elapsed_time_seconds")?,
        parent_tool_use_id: opt_str(obj, "parent_tool_use_id")?,
        session_id: req_str(obj, "session_id")?,
        uuid: opt_str(obj, "uuid")?,
    }))
}

fn decode_tool_use_summary(obj: &Map<String, Value>) -> Result<Message, DecodeError> {
    Ok(Message::ToolUseSummary(ToolUseSummaryMessage {
        summary: req_str(obj, "summary")?,
        preceding_tool_use_ids: req_str_list(obj, "preceding_tool_use_ids")?,
        session_id: req_str(obj, "session_id")?,
        uuid: opt_str(obj, "uuid")?,
    }))
}

fn decode_auth_status(obj: &Map<String, Value>) -> Result<Message, DecodeError> {
    Ok(Message::AuthStatus(AuthStatusMessage {
        is_authenticating: req_bool(obj, "is_authenticating")?,
        output: req_str_list(obj, "output")?,
        error: opt_str(obj, "error")?,
        session_id: req_str(obj, "session_id")?,
        uuid: opt_str(obj, "uuid")?,
    }))
}

fn decode_prompt_suggestion(obj: &Map<String, Value>) -> Result<Message, DecodeError> {
    Ok(Message::PromptSuggestion(PromptSuggestionMessage {
        suggestion: req_str(obj, "suggestion")?,
        session_id: req_str(obj, "session_id")?,
        uuid: opt_str(obj, "uuid")?,
    }))
}

fn decode_usage(obj: &Map<String, Value>) -> Result<Usage, DecodeError> {
    let usage = match field(obj, "usage") {
        // A missing usage map defaults to all zeroes.
        None | Some(Value::Null) => return Ok(Usage::default()),
        Some(v) => v
            .as_object()
            .ok_or_else(|| DecodeError::Shape("\"usage\" should be an object".into()))?,
    };
    Ok(Usage {
        input_tokens: opt_u64(usage, "input_tokens")?.unwrap_or(0),
        output_tokens: opt_u64(usage, "output_tokens")?.unwrap_or(0),
        cache_creation_input_tokens: opt_u64(usage, "cache_creation_input_tokens")?,
        cache_read_input_tokens: opt_u64(usage, "cache_read_input_tokens")?,
    })
}

// ─── Field access with key normalization ──────────────────────────────────
//
// The CLI mixes snake_case and camelCase envelope keys (`apiKeySource`,
// `permissionMode`, `modelUsage`, `resetsAt`, …). Normalization happens here
// and only here: lookups try the snake_case name first, then its computed
// camelCase form. Payload maps (`input`, `data`) are never rewritten.

fn field<'a>(obj: &'a Map<String, Value>, snake: &str) -> Option<&'a Value> {
    if let Some(v) = obj.get(snake) {
        return Some(v);
    }
    let camel = snake_to_camel(snake);
    if camel != snake {
        return obj.get(&camel);
    }
    None
}

fn snake_to_camel(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper_next = false;
    for c in snake.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn req_str(obj: &Map<String, Value>, key: &str) -> Result<String, DecodeError> {
    match field(obj, key) {
        None | Some(Value::Null) => Err(DecodeError::MissingFields(vec![key.to_owned()])),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(DecodeError::Shape(format!("{key:?} should be a string"))),
    }
}

fn opt_str(obj: &Map<String, Value>, key: &str) -> Result<Option<String>, DecodeError> {
    match field(obj, key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(DecodeError::Shape(format!("{key:?} should be a string"))),
    }
}

fn req_bool(obj: &Map<String, Value>, key: &str) -> Result<bool, DecodeError> {
    match field(obj, key) {
        None | Some(Value::Null) => Err(DecodeError::MissingFields(vec![key.to_owned()])),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(DecodeError::Shape(format!("{key:?} should be a boolean"))),
    }
}

fn req_f64(obj: &Map<String, Value>, key: &str) -> Result<f64, DecodeError> {
    match field(obj, key) {
        None | Some(Value::Null) => Err(DecodeError::MissingFields(vec![key.to_owned()])),
        // Integers coerce to real here (the CLI emits either).
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| DecodeError::Shape(format!("{key:?} is not a representable number"))),
        Some(_) => Err(DecodeError::Shape(format!("{key:?} should be a number"))),
    }
}

fn opt_f64(obj: &Map<String, Value>, key: &str) -> Result<Option<f64>, DecodeError> {
    match field(obj, key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(_) => Err(DecodeError::Shape(format!("{key:?} should be a number"))),
    }
}

fn req_u64(obj: &Map<String, Value>, key: &str) -> Result<u64, DecodeError> {
    match field(obj, key) {
        None | Some(Value::Null) => Err(DecodeError::MissingFields(vec![key.to_owned()])),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| DecodeError::Shape(format!("{key:?} should be a non-negative integer"))),
        Some(_) => Err(DecodeError::Shape(format!("{key:?} should be a number"))),
    }
}

fn opt_u64(obj: &Map<String, Value>, key: &str) -> Result<Option<u64>, DecodeError> {
    match field(obj, key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_u64()),
        Some(_) => Err(DecodeError::Shape(format!("{key:?} should be a number"))),
    }
}

fn req_object(
    obj: &Map<String, Value>,
    key: &str,
) -> Result<Map<String, Value>, DecodeError> {
    match field(obj, key) {
        None | Some(Value::Null) => Err(DecodeError::MissingFields(vec![key.to_owned()])),
        Some(Value::Object(m)) => Ok(m.clone()),
        Some(_) => Err(DecodeError::Shape(format!("{key:?} should be an object"))),
    }
}

fn opt_object(
    obj: &Map<String, Value>,
    key: &str,
) -> Result<Option<Map<String, Value>>, DecodeError> {
    match field(obj, key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(m)) => Ok(Some(m.clone())),
        Some(_) => Err(DecodeError::Shape(format!("{key:?} should be an object"))),
    }
}

fn req_array<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a [Value], DecodeError> {
    match field(obj, key) {
        None | Some(Value::Null) => Err(DecodeError::MissingFields(vec![key.to_owned()])),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(DecodeError::Shape(format!("{key:?} should be an array"))),
    }
}

fn opt_array<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a [Value]>, DecodeError> {
    match field(obj, key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(_) => Err(DecodeError::Shape(format!("{key:?} should be an array"))),
    }
}

fn req_str_list(obj: &Map<String, Value>, key: &str) -> Result<Vec<String>, DecodeError> {
    str_list(req_array(obj, key)?, key)
}

fn opt_str_list(
    obj: &Map<String, Value>,
    key: &str,
) -> Result<Option<Vec<String>>, DecodeError> {
    match opt_array(obj, key)? {
        None => Ok(None),
        Some(items) => Ok(Some(str_list(items, key)?)),
    }
}

fn str_list(items: &[Value], key: &str) -> Result<Vec<String>, DecodeError> {
    items
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_owned)
                .ok_or_else(|| DecodeError::Shape(format!("{key:?} entries should be strings")))
        })
        .collect()
}
