use serde_json::Value;
use thiserror::Error;

/// A content block inside an assistant or user message.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Extended-thinking block. Both fields are required by the protocol;
    /// a block missing either is a hard parse error.
    Thinking {
        thinking: String,
        signature: String,
    },
    ToolUse {
        id: String,
        name: String,
        /// Tool inputs are schema-polymorphic (varies per tool), so Value is
        /// correct here.
        input: Value,
        caller: Option<String>,
    },
    ToolResult {
        tool_use_id: String,
        content: Option<ToolResultContent>,
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, ContentBlock::ToolUse { .. })
    }
}

/// `tool_result` content is either a plain string or a nested block list;
/// both shapes are preserved.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl ToolResultContent {
    /// Flatten to display text: the string itself, or the concatenated text
    /// blocks of the nested list.
    pub fn display_text(&self) -> String {
        match self {
            ToolResultContent::Text(s) => s.clone(),
            ToolResultContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(ContentBlock::as_text)
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ContentError {
    #[error("content block has no \"type\" field")]
    MissingType,

    #[error("unknown content block type {0:?}")]
    UnknownContentType(String),

    #[error("content block is missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("malformed content block: {0}")]
    Shape(String),
}

/// Error from [`decode_all`], carrying the index of the offending block.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("content block at index {index}: {source}")]
pub struct ContentListError {
    pub index: usize,
    #[source]
    pub source: ContentError,
}

/// Decode one content block, dispatching on the `type` key.
pub fn decode(value: &Value) -> Result<ContentBlock, ContentError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ContentError::Shape("expected a JSON object".into()))?;
    let block_type = match obj.get("type") {
        Some(Value::String(s)) => s.as_str(),
        Some(_) => return Err(ContentError::Shape("\"type\" should be a string".into())),
        None => return Err(ContentError::MissingType),
    };

    match block_type {
        "text" => Ok(ContentBlock::Text {
            text: require_str(obj, "text")?,
        }),
        "thinking" => {
            let mut missing = Vec::new();
            let thinking = optional_str(obj, "thinking")?;
            let signature = optional_str(obj, "signature")?;
            if thinking.is_none() {
                missing.push("thinking");
            }
            if signature.is_none() {
                missing.push("signature");
            }
            if !missing.is_empty() {
                return Err(ContentError::MissingFields(missing));
            }
            Ok(ContentBlock::Thinking {
                thinking: thinking.unwrap_or_default(),
                signature: signature.unwrap_or_default(),
            })
        }
        "tool_use" => Ok(ContentBlock::ToolUse {
            id: require_str(obj, "id")?,
            name: require_str(obj, "name")?,
            input: obj
                .get("input")
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default())),
            caller: optional_str(obj, "caller")?,
        }),
        "tool_result" => {
            let content = match obj.get("content") {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => Some(ToolResultContent::Text(s.clone())),
                Some(Value::Array(items)) => Some(ToolResultContent::Blocks(
                    decode_all(items).map_err(|e| ContentError::Shape(e.to_string()))?,
                )),
                Some(_) => {
                    return Err(ContentError::Shape(
                        "\"content\" should be a string or a block list".into(),
                    ))
                }
            };
            Ok(ContentBlock::ToolResult {
                tool_use_id: require_str(obj, "tool_use_id")?,
                content,
                is_error: obj
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            })
        }
        other => Err(ContentError::UnknownContentType(other.to_owned())),
    }
}

/// Decode a whole content list, failing with the index of the first bad block.
pub fn decode_all(values: &[Value]) -> Result<Vec<ContentBlock>, ContentListError> {
    values
        .iter()
        .enumerate()
        .map(|(index, v)| decode(v).map_err(|source| ContentListError { index, source }))
        .collect()
}

fn require_str(
    obj: &serde_json::Map<String, Value>,
    key: &'static str,
) -> Result<String, ContentError> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(ContentError::MissingFields(vec![key])),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ContentError::Shape(format!("{key:?} should be a string"))),
    }
}

fn optional_str(
    obj: &serde_json::Map<String, Value>,
    key: &'static str,
) -> Result<Option<String>, ContentError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ContentError::Shape(format!("{key:?} should be a string"))),
    }
}
