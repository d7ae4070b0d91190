//! Stable JSON projection of the typed message model.
//!
//! One transformer walks each value and builds the wire object by hand:
//! absent optionals are omitted entirely (never emitted as `null`), and
//! known keys keep their insertion order. The projection is used for logging,
//! for the scripted adapter, and for the round-trip property
//! `decode(encode(m)) == m`.

use serde_json::{json, Map, Value};

use crate::content::{ContentBlock, ToolResultContent};
use crate::message::*;

impl Message {
    /// Project this message to its wire JSON object.
    pub fn to_value(&self) -> Value {
        match self {
            Message::System(m) => system_to_value(m),
            Message::Assistant(m) => assistant_to_value(m),
            Message::User(m) => user_to_value(m),
            Message::Result(m) => result_to_value(m),
            Message::StreamEvent(m) => stream_event_to_value(m),
            Message::RateLimit(m) => rate_limit_to_value(m),
            Message::ToolProgress(m) => tool_progress_to_value(m),
            Message::ToolUseSummary(m) => tool_use_summary_to_value(m),
            Message::AuthStatus(m) => auth_status_to_value(m),
            Message::PromptSuggestion(m) => prompt_suggestion_to_value(m),
            Message::Unknown(m) => m.raw.clone(),
        }
    }

    /// Project to a single NDJSON line (no trailing newline).
    pub fn to_json_line(&self) -> String {
        self.to_value().to_string()
    }
}

impl serde::Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

impl ContentBlock {
    pub fn to_value(&self) -> Value {
        match self {
            ContentBlock::Text { text } => json!({"type": "text", "text": text}),
            ContentBlock::Thinking {
                thinking,
                signature,
            } => json!({
                "type": "thinking",
                "thinking": thinking,
                "signature": signature
            }),
            ContentBlock::ToolUse {
                id,
                name,
                input,
                caller,
            } => {
                let mut obj = Map::new();
                obj.insert("type".into(), "tool_use".into());
                obj.insert("id".into(), id.as_str().into());
                obj.insert("name".into(), name.as_str().into());
                obj.insert("input".into(), input.clone());
                if let Some(caller) = caller {
                    obj.insert("caller".into(), caller.as_str().into());
                }
                Value::Object(obj)
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let mut obj = Map::new();
                obj.insert("type".into(), "tool_result".into());
                obj.insert("tool_use_id".into(), tool_use_id.as_str().into());
                match content {
                    None => {}
                    Some(ToolResultContent::Text(s)) => {
                        obj.insert("content".into(), s.as_str().into());
                    }
                    Some(ToolResultContent::Blocks(blocks)) => {
                        obj.insert("content".into(), blocks_to_value(blocks));
                    }
                }
                if *is_error {
                    obj.insert("is_error".into(), true.into());
                }
                Value::Object(obj)
            }
        }
    }
}

fn blocks_to_value(blocks: &[ContentBlock]) -> Value {
    Value::Array(blocks.iter().map(ContentBlock::to_value).collect())
}

fn system_to_value(m: &SystemMessage) -> Value {
    let mut obj = Map::new();
    obj.insert("type".into(), "system".into());
    obj.insert("subtype".into(), m.payload.subtype().into());
    match &m.payload {
        SystemPayload::Init(init) => {
            obj.insert("cwd".into(), init.cwd.as_str().into());
            obj.insert("model".into(), init.model.as_str().into());
            obj.insert(
                "permission_mode".into(),
                init.permission_mode.as_str().into(),
            );
            set_opt_str(&mut obj, "api_key_source", &init.api_key_source);
            obj.insert("tools".into(), str_list(&init.tools));
            obj.insert(
                "mcp_servers".into(),
                Value::Array(
                    init.mcp_servers
                        .iter()
                        .map(|s| json!({"name": s.name, "status": s.status}))
                        .collect(),
                ),
            );
            if let Some(cmds) = &init.slash_commands {
                obj.insert("slash_commands".into(), str_list(cmds));
            }
            set_opt_str(&mut obj, "output_style", &init.output_style);
            if let Some(agents) = &init.agents {
                obj.insert("agents".into(), str_list(agents));
            }
            if let Some(skills) = &init.skills {
                obj.insert("skills".into(), str_list(skills));
            }
            if let Some(plugins) = &init.plugins {
                obj.insert("plugins".into(), Value::Array(plugins.clone()));
            }
            set_opt_str(&mut obj, "claude_code_version", &init.claude_code_version);
        }
        SystemPayload::CompactBoundary(b) => {
            obj.insert(
                "compact_metadata".into(),
                json!({
                    "trigger": b.compact_metadata.trigger.as_str(),
                    "pre_tokens": b.compact_metadata.pre_tokens
                }),
            );
        }
        SystemPayload::Generic { data, .. } => {
            for (k, v) in data {
                obj.insert(k.clone(), v.clone());
            }
        }
    }
    obj.insert("session_id".into(), m.session_id.as_str().into());
    set_opt_str(&mut obj, "uuid", &m.uuid);
    Value::Object(obj)
}

fn assistant_to_value(m: &AssistantMessage) -> Value {
    let mut inner = Map::new();
    inner.insert("id".into(), m.message.id.as_str().into());
    inner.insert("role".into(), "assistant".into());
    inner.insert("content".into(), blocks_to_value(&m.message.content));
    inner.insert("model".into(), m.message.model.as_str().into());
    if let Some(reason) = &m.message.stop_reason {
        inner.insert("stop_reason".into(), reason.as_str().into());
    }
    set_opt_str(&mut inner, "stop_sequence", &m.message.stop_sequence);
    inner.insert("usage".into(), usage_to_value(&m.message.usage));

    let mut obj = Map::new();
    obj.insert("type".into(), "assistant".into());
    obj.insert("message".into(), Value::Object(inner));
    set_opt_str(&mut obj, "parent_tool_use_id", &m.parent_tool_use_id);
    if let Some(error) = &m.error {
        obj.insert("error".into(), error.as_str().into());
    }
    obj.insert("session_id".into(), m.session_id.as_str().into());
    set_opt_str(&mut obj, "uuid", &m.uuid);
    Value::Object(obj)
}

fn user_to_value(m: &UserMessage) -> Value {
    let content = match &m.message.content {
        UserContent::Text(s) => Value::String(s.clone()),
        UserContent::Blocks(blocks) => blocks_to_value(blocks),
    };
    let mut obj = Map::new();
    obj.insert("type".into(), "user".into());
    obj.insert(
        "message".into(),
        json!({"role": "user", "content": content}),
    );
    set_opt_str(&mut obj, "parent_tool_use_id", &m.parent_tool_use_id);
    if let Some(result) = &m.tool_use_result {
        obj.insert("tool_use_result".into(), result.clone());
    }
    obj.insert("session_id".into(), m.session_id.as_str().into());
    set_opt_str(&mut obj, "uuid", &m.uuid);
    Value::Object(obj)
}

fn result_to_value(m: &ResultMessage) -> Value {
    let mut obj = Map::new();
    obj.insert("type".into(), "result".into());
    obj.insert("subtype".into(), m.subtype.as_str().into());
    obj.insert("is_error".into(), m.is_error.into());
    obj.insert("duration_ms".into(), m.duration_ms.into());
    obj.insert("duration_api_ms".into(), m.duration_api_ms.into());
    obj.insert("num_turns".into(), m.num_turns.into());
    set_opt_str(&mut obj, "result", &m.result);
    obj.insert("total_cost_usd".into(), m.total_cost_usd.into());
    obj.insert("usage".into(), usage_to_value(&m.usage));
    if let Some(model_usage) = &m.model_usage {
        obj.insert("model_usage".into(), Value::Object(model_usage.clone()));
    }
    if let Some(denials) = &m.permission_denials {
        obj.insert("permission_denials".into(), Value::Array(denials.clone()));
    }
    if let Some(errors) = &m.errors {
        obj.insert("errors".into(), str_list(errors));
    }
    if let Some(output) = &m.structured_output {
        obj.insert("structured_output".into(), output.clone());
    }
    obj.insert("session_id".into(), m.session_id.as_str().into());
    set_opt_str(&mut obj, "uuid", &m.uuid);
    Value::Object(obj)
}

fn stream_event_to_value(m: &StreamEventMessage) -> Value {
    let mut event = Map::new();
    event.insert("type".into(), m.event.event_type.as_str().into());
    if let Some(index) = m.event.index {
        event.insert("index".into(), index.into());
    }
    if let Some(delta) = &m.event.delta {
        event.insert("delta".into(), delta_to_value(delta));
    }
    if let Some(block) = &m.event.content_block {
        event.insert("content_block".into(), block.to_value());
    }

    let mut obj = Map::new();
    obj.insert("type".into(), "stream_event".into());
    obj.insert("event".into(), Value::Object(event));
    set_opt_str(&mut obj, "parent_tool_use_id", &m.parent_tool_use_id);
    obj.insert("session_id".into(), m.session_id.as_str().into());
    set_opt_str(&mut obj, "uuid", &m.uuid);
    Value::Object(obj)
}

fn delta_to_value(delta: &Delta) -> Value {
    match delta {
        Delta::TextDelta { text } => json!({"type": "text_delta", "text": text}),
        Delta::ThinkingDelta { thinking } => {
            json!({"type": "thinking_delta", "thinking": thinking})
        }
        Delta::InputJsonDelta { partial_json } => {
            json!({"type": "input_json_delta", "partial_json": partial_json})
        }
        Delta::Other { raw, .. } => raw.clone(),
    }
}

fn rate_limit_to_value(m: &RateLimitMessage) -> Value {
    let mut obj = Map::new();
    obj.insert("type".into(), "rate_limit_event".into());
    obj.insert("status".into(), m.status.as_str().into());
    if let Some(resets_at) = m.resets_at {
        obj.insert("resets_at".into(), resets_at.into());
    }
    if let Some(utilization) = m.utilization {
        obj.insert("utilization".into(), utilization.into());
    }
    obj.insert("session_id".into(), m.session_id.as_str().into());
    set_opt_str(&mut obj, "uuid", &m.uuid);
    Value::Object(obj)
}

fn tool_progress_to_value(m: &ToolProgressMessage) -> Value {
    let mut obj = Map::new();
    obj.insert("type".into(), "tool_progress".into());
    obj.insert("tool_use_id".into(), m.tool_use_id.as_str().into());
    obj.insert("tool_name".into(), m.tool_name.as_str().into());
    if let Some(elapsed) = m.elapsed_time_seconds {
        obj.insert("elapsed_time_seconds".into(), elapsed.into());
    }
    set_opt_str(&mut obj, "parent_tool_use_id", &m.parent_tool_use_id);
    obj.insert("session_id".into(), m.session_id.as_str().into());
    set_opt_str(&mut obj, "uuid", &m.uuid);
    Value::Object(obj)
}

fn tool_use_summary_to_value(m: &ToolUseSummaryMessage) -> Value {
    let mut obj = Map::new();
    obj.insert("type".into(), "tool_use_summary".into());
    obj.insert("summary".into(), m.summary.as_str().into());
    obj.insert(
        "preceding_tool_use_ids".into(),
        str_list(&m.preceding_tool_use_ids),
    );
    obj.insert("session_id".into(), m.session_id.as_str().into());
    set_opt_str(&mut obj, "uuid", &m.uuid);
    Value::Object(obj)
}

fn auth_status_to_value(m: &AuthStatusMessage) -> Value {
    let mut obj = Map::new();
    obj.insert("type".into(), "auth_status".into());
    obj.insert("is_authenticating".into(), m.is_authenticating.into());
    obj.insert("output".into(), str_list(&m.output));
    set_opt_str(&mut obj, "error", &m.error);
    obj.insert("session_id".into(), m.session_id.as_str().into());
    set_opt_str(&mut obj, "uuid", &m.uuid);
    Value::Object(obj)
}

fn prompt_suggestion_to_value(m: &PromptSuggestionMessage) -> Value {
    let mut obj = Map::new();
    obj.insert("type".into(), "prompt_suggestion".into());
    obj.insert("suggestion".into(), m.suggestion.as_str().into());
    obj.insert("session_id".into(), m.session_id.as_str().into());
    set_opt_str(&mut obj, "uuid", &m.uuid);
    Value::Object(obj)
}

fn usage_to_value(usage: &Usage) -> Value {
    let mut obj = Map::new();
    obj.insert("input_tokens".into(), usage.input_tokens.into());
    obj.insert("output_tokens".into(), usage.output_tokens.into());
    if let Some(n) = usage.cache_creation_input_tokens {
        obj.insert("cache_creation_input_tokens".into(), n.into());
    }
    if let Some(n) = usage.cache_read_input_tokens {
        obj.insert("cache_read_input_tokens".into(), n.into());
    }
    Value::Object(obj)
}

fn str_list(items: &[String]) -> Value {
    Value::Array(items.iter().map(|s| Value::String(s.clone())).collect())
}

fn set_opt_str(obj: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        obj.insert(key.to_owned(), v.as_str().into());
    }
}
