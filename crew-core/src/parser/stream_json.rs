//! Stream-JSON parsing for Claude's output format
//!
//! Claude Code's stream-json format emits one JSON object per line,
//! each with a "type" field identifying the message kind. Print mode wraps
//! content in `assistant`/`user` envelopes; partial-message mode wraps raw
//! API events in `stream_event`. Both are decoded into [`StreamChunk`]s.
//!
//! Nothing here fails: every line yields at least one chunk.

use serde::Deserialize;
use serde_json::Value;

use super::chunk::StreamChunk;

/// Content item within an assistant or user message
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentItem {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct MessagePayload {
    #[serde(default)]
    content: Vec<ContentItem>,
}

/// Content block types in streaming mode
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

/// Delta types for streaming content updates
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

/// Messages from Claude's stream-json output format
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamMessage {
    /// System message (init, info)
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },

    /// Assistant message with complete content (print mode)
    Assistant {
        #[serde(default)]
        message: MessagePayload,
    },

    /// User message carrying tool results (print mode)
    User {
        #[serde(default)]
        message: MessagePayload,
    },

    /// Raw API event wrapper (partial-message mode)
    StreamEvent { event: Value },

    /// Content block starting
    ContentBlockStart { content_block: ContentBlock },

    /// Streaming content delta
    ContentBlockDelta { delta: Delta },

    /// Tool use request
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },

    /// Tool execution result
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },

    /// Final result with cost and timing
    Result {
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        duration_ms: u64,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        cost_usd: Option<f64>,
        #[serde(default)]
        num_turns: Option<u32>,
        #[serde(default)]
        result: Option<String>,
    },

    /// Error reported by the worker runtime
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<Value>,
    },

    /// Unknown message type (future-proofing)
    #[serde(other)]
    Unknown,
}

/// Decode one line into its primary chunk
pub fn parse(line: &str) -> StreamChunk {
    let mut chunks = parse_all(line);
    // parse_all never returns an empty vec
    if chunks.is_empty() {
        return StreamChunk::Unknown {
            discriminator: None,
        };
    }
    chunks.swap_remove(0)
}

/// Decode one line into every chunk it carries
///
/// An assistant message holding text and two tool calls yields a text delta
/// followed by a start/input pair per tool. The result is never empty.
pub fn parse_all(line: &str) -> Vec<StreamChunk> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return vec![StreamChunk::Unknown {
            discriminator: None,
        }];
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => decode_value(value, trimmed),
        Err(e) => vec![malformed(format!("invalid JSON: {e}"), trimmed)],
    }
}

fn decode_value(value: Value, raw: &str) -> Vec<StreamChunk> {
    let Some(discriminator) = value.get("type").and_then(Value::as_str).map(str::to_owned)
    else {
        return vec![malformed("missing \"type\" discriminator".to_string(), raw)];
    };

    match serde_json::from_value::<StreamMessage>(value) {
        Ok(StreamMessage::Unknown) => vec![StreamChunk::unknown(&discriminator)],
        Ok(msg) => to_chunks(msg, &discriminator, raw),
        Err(e) => vec![malformed(format!("malformed {discriminator} event: {e}"), raw)],
    }
}

fn to_chunks(msg: StreamMessage, discriminator: &str, raw: &str) -> Vec<StreamChunk> {
    let chunks = match msg {
        StreamMessage::System { subtype, message } => {
            vec![StreamChunk::SystemInfo { subtype, message }]
        }
        StreamMessage::Assistant { message } | StreamMessage::User { message } => {
            content_chunks(message.content)
        }
        StreamMessage::StreamEvent { event } => decode_value(event, raw),
        StreamMessage::ContentBlockStart { content_block } => match content_block {
            ContentBlock::ToolUse { id, name } => vec![StreamChunk::ToolStart { id, name }],
            ContentBlock::Text { text } if !text.is_empty() => {
                vec![StreamChunk::TextDelta { text }]
            }
            ContentBlock::Text { .. } | ContentBlock::Other => Vec::new(),
        },
        StreamMessage::ContentBlockDelta { delta } => match delta {
            Delta::TextDelta { text } => vec![StreamChunk::TextDelta { text }],
            Delta::InputJsonDelta { partial_json } => vec![StreamChunk::ToolInputFragment {
                id: String::new(),
                fragment: partial_json,
            }],
            Delta::Other => Vec::new(),
        },
        StreamMessage::ToolUse { id, name, input } => tool_use_chunks(id, name, input),
        StreamMessage::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => vec![StreamChunk::ToolResult {
            id: tool_use_id,
            output: content_text(&content),
            is_error,
        }],
        StreamMessage::Result {
            is_error,
            duration_ms,
            total_cost_usd,
            cost_usd,
            num_turns,
            result,
        } => vec![StreamChunk::FinalResult {
            cost_usd: total_cost_usd.or(cost_usd).unwrap_or(0.0),
            duration_ms,
            is_error,
            num_turns,
            result,
        }],
        StreamMessage::Error { message, error } => {
            let message = message
                .or_else(|| error.as_ref().map(content_text))
                .unwrap_or_else(|| "worker reported an error".to_string());
            vec![StreamChunk::Error {
                message,
                raw: raw.to_string(),
            }]
        }
        StreamMessage::Unknown => Vec::new(),
    };

    if chunks.is_empty() {
        vec![StreamChunk::unknown(discriminator)]
    } else {
        chunks
    }
}

fn content_chunks(items: Vec<ContentItem>) -> Vec<StreamChunk> {
    let mut text = String::new();
    let mut tools = Vec::new();

    for item in items {
        match item {
            ContentItem::Text { text: segment } => text.push_str(&segment),
            ContentItem::ToolUse { id, name, input } => {
                tools.extend(tool_use_chunks(id, name, input));
            }
            ContentItem::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => tools.push(StreamChunk::ToolResult {
                id: tool_use_id,
                output: content_text(&content),
                is_error,
            }),
            ContentItem::Other => {}
        }
    }

    let mut chunks = Vec::with_capacity(tools.len() + 1);
    if !text.is_empty() {
        chunks.push(StreamChunk::TextDelta { text });
    }
    chunks.extend(tools);
    chunks
}

fn tool_use_chunks(id: String, name: String, input: Value) -> Vec<StreamChunk> {
    let mut chunks = vec![StreamChunk::ToolStart {
        id: id.clone(),
        name,
    }];
    if !input.is_null() {
        chunks.push(StreamChunk::ToolInputFragment {
            id,
            fragment: input.to_string(),
        });
    }
    chunks
}

/// Flatten tool result content: plain strings, or arrays of text blocks
fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                other => other.get("text").and_then(Value::as_str).map(str::to_owned),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| other.to_string()),
    }
}

fn malformed(message: String, raw: &str) -> StreamChunk {
    tracing::debug!(%message, "Malformed worker output line");
    StreamChunk::Error {
        message,
        raw: raw.to_string(),
    }
}
