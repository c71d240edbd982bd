//! Decoded worker output chunks

use serde::{Deserialize, Serialize};

/// One decoded unit of a worker's output
///
/// Decoded once at the process boundary; downstream code matches on the
/// variant instead of inspecting raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamChunk {
    /// Text produced by the worker
    TextDelta { text: String },

    /// A tool invocation has started
    ToolStart { id: String, name: String },

    /// Part of a tool's argument payload; concatenate fragments to rebuild it.
    /// `id` is empty when the feed only identifies the block by position.
    ToolInputFragment { id: String, fragment: String },

    /// Result of a tool invocation
    ToolResult {
        id: String,
        output: String,
        is_error: bool,
    },

    /// Terminal summary of the invocation
    FinalResult {
        cost_usd: f64,
        duration_ms: u64,
        is_error: bool,
        num_turns: Option<u32>,
        result: Option<String>,
    },

    /// Informational message from the worker runtime
    SystemInfo {
        subtype: Option<String>,
        message: Option<String>,
    },

    /// A line that could not be decoded, or an error reported by the worker
    Error { message: String, raw: String },

    /// A well-formed line with a discriminator we don't act on
    Unknown { discriminator: Option<String> },
}

impl StreamChunk {
    /// Short kind label, used in logs and event payloads
    pub fn kind(&self) -> &'static str {
        match self {
            StreamChunk::TextDelta { .. } => "text_delta",
            StreamChunk::ToolStart { .. } => "tool_start",
            StreamChunk::ToolInputFragment { .. } => "tool_input_fragment",
            StreamChunk::ToolResult { .. } => "tool_result",
            StreamChunk::FinalResult { .. } => "final_result",
            StreamChunk::SystemInfo { .. } => "system_info",
            StreamChunk::Error { .. } => "error",
            StreamChunk::Unknown { .. } => "unknown",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, StreamChunk::FinalResult { .. })
    }

    pub(crate) fn unknown(discriminator: &str) -> Self {
        StreamChunk::Unknown {
            discriminator: Some(discriminator.to_string()),
        }
    }
}
