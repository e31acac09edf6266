use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::sse::encode_data;

/// Literal end-of-stream marker written after the stop frame.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatCompletionChunkObject {
    #[serde(rename = "chat.completion.chunk")]
    ChatCompletionChunk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Function,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    FunctionCall,
    ToolCalls,
    ContentFilter,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ChatRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<JsonValue>,
}

impl ChatChunkDelta {
    /// True when the delta carries something the client has to render.
    pub fn has_payload(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.is_empty())
            || self.function_call.is_some()
            || self.tool_calls.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChunkChoice {
    pub index: i64,
    pub delta: ChatChunkDelta,
    pub finish_reason: Option<FinishReason>,
}

/// Canonical streamed frame: one `chat.completion.chunk` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: ChatCompletionChunkObject,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChunkChoice>,
}

impl ChatCompletionChunk {
    pub fn new(id: &str, created: i64, model: &str, choice: ChatChunkChoice) -> Self {
        Self {
            id: id.to_string(),
            object: ChatCompletionChunkObject::ChatCompletionChunk,
            created,
            model: model.to_string(),
            choices: vec![choice],
        }
    }

    /// Opening frame: assistant role marker, no content.
    pub fn start(id: &str, created: i64, model: &str) -> Self {
        Self::new(
            id,
            created,
            model,
            ChatChunkChoice {
                index: 0,
                delta: ChatChunkDelta {
                    role: Some(ChatRole::Assistant),
                    ..Default::default()
                },
                finish_reason: None,
            },
        )
    }

    pub fn content(id: &str, created: i64, model: &str, index: i64, delta: ChatChunkDelta) -> Self {
        Self::new(
            id,
            created,
            model,
            ChatChunkChoice {
                index,
                delta,
                finish_reason: None,
            },
        )
    }

    /// Closing frame: empty delta, `finish_reason = "stop"`.
    pub fn stop(id: &str, created: i64, model: &str) -> Self {
        Self::new(
            id,
            created,
            model,
            ChatChunkChoice {
                index: 0,
                delta: ChatChunkDelta::default(),
                finish_reason: Some(FinishReason::Stop),
            },
        )
    }
}

pub fn encode_chunk(chunk: &ChatCompletionChunk) -> Option<Bytes> {
    let data = serde_json::to_string(chunk).ok()?;
    Some(encode_data(&data))
}
