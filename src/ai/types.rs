use serde::Serialize;

// Re-export core types from protocol
pub use crate::protocol::{ContentBlock, Message};

/// Tool definition for the API request.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Request body for the Messages API.
#[derive(Debug, Clone, Serialize)]
pub struct CreateMessageRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDef>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

/// Streamed SSE event types from the Messages API.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    TextDelta {
        index: usize,
        text: String,
    },
    InputJsonDelta {
        index: usize,
        partial_json: String,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        stop_reason: Option<String>,
    },
    MessageStop,
}

/// A complete assistant reply, folded from the stream.
#[derive(Debug, Clone, Default)]
pub struct AssistantTurn {
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
}

impl AssistantTurn {
    pub fn tool_uses(&self) -> Vec<(String, String, serde_json::Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.clone(), name.clone(), input.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn wants_tools(&self) -> bool {
        self.stop_reason.as_deref() == Some(STOP_REASON_TOOL_USE) && !self.tool_uses().is_empty()
    }
}

pub const STOP_REASON_END_TURN: &str = "end_turn";
pub const STOP_REASON_TOOL_USE: &str = "tool_use";
pub const STOP_REASON_MAX_TOKENS: &str = "max_tokens";
