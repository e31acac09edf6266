use bytes::Bytes;
use serde_json::{Value as JsonValue, json};

use relay_protocol::chat::{ChatChunkDelta, ChatCompletionChunk, DONE_FRAME, encode_chunk};
use relay_protocol::sse::SseParser;
use relay_provider_core::ByteStream;

/// Rewrites an upstream chat stream into canonical frames.
///
/// All frames share one id, timestamp and model chosen by the gateway. Upstream
/// role markers, finish frames, keep-alives and anything unparsable are
/// dropped; only content-bearing deltas pass, in upstream order.
pub struct ChunkNormalizer {
    id: String,
    created: i64,
    model: String,
    parser: SseParser,
}

impl ChunkNormalizer {
    pub fn new(id: impl Into<String>, created: i64, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created,
            model: model.into(),
            parser: SseParser::new(),
        }
    }

    pub fn start_frame(&self) -> Bytes {
        encode_chunk(&ChatCompletionChunk::start(&self.id, self.created, &self.model))
            .unwrap_or_default()
    }

    /// Stop frame followed by `data: [DONE]`.
    pub fn end_frames(&self) -> Vec<Bytes> {
        let mut out = Vec::with_capacity(2);
        if let Some(stop) =
            encode_chunk(&ChatCompletionChunk::stop(&self.id, self.created, &self.model))
        {
            out.push(stop);
        }
        out.push(Bytes::from_static(DONE_FRAME));
        out
    }

    pub fn push(&mut self, chunk: &Bytes) -> Vec<Bytes> {
        let events = self.parser.push_bytes(chunk);
        events
            .iter()
            .flat_map(|event| self.frames_for(event.data()))
            .collect()
    }

    /// Flushes a trailing partial event, then closes the stream.
    pub fn finish(&mut self) -> Vec<Bytes> {
        let events = self.parser.finish();
        let mut out: Vec<Bytes> = events
            .iter()
            .flat_map(|event| self.frames_for(event.data()))
            .collect();
        out.extend(self.end_frames());
        out
    }

    /// Content frames for a whole (non-streamed) completion object.
    pub fn completion_frames(&self, completion: &JsonValue) -> Vec<Bytes> {
        self.frames_for_value(completion)
    }

    fn frames_for(&self, data: &str) -> Vec<Bytes> {
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return Vec::new();
        }
        match serde_json::from_str::<JsonValue>(data) {
            Ok(value) => self.frames_for_value(&value),
            Err(_) => {
                tracing::debug!(event = "upstream_chunk_dropped", reason = "invalid_json");
                Vec::new()
            }
        }
    }

    fn frames_for_value(&self, value: &JsonValue) -> Vec<Bytes> {
        choice_deltas(value)
            .into_iter()
            .filter_map(|(index, delta)| self.encode(index, delta))
            .collect()
    }

    fn encode(&self, index: i64, delta: ChatChunkDelta) -> Option<Bytes> {
        encode_chunk(&ChatCompletionChunk::content(
            &self.id,
            self.created,
            &self.model,
            index,
            delta,
        ))
    }
}

/// Content-bearing deltas of one upstream event, with their choice index.
fn choice_deltas(value: &JsonValue) -> Vec<(i64, ChatChunkDelta)> {
    if let Some(choices) = value.get("choices").and_then(JsonValue::as_array) {
        return choices
            .iter()
            .enumerate()
            .filter_map(|(pos, choice)| {
                let source = choice.get("delta").or_else(|| choice.get("message"))?;
                let delta = content_delta(source);
                let index = choice
                    .get("index")
                    .and_then(JsonValue::as_i64)
                    .unwrap_or(pos as i64);
                delta.has_payload().then_some((index, delta))
            })
            .collect();
    }
    // Some reverse-proxied providers emit `{"content": "..."}` objects.
    if let Some(content) = value.get("content").and_then(JsonValue::as_str) {
        let delta = ChatChunkDelta {
            content: Some(content.to_string()),
            ..Default::default()
        };
        if delta.has_payload() {
            return vec![(0, delta)];
        }
    }
    Vec::new()
}

/// Drains a streamed chat body into one `chat.completion` document, for
/// clients that did not ask for a stream. `None` when no text arrived.
pub async fn fold_stream(
    mut body: ByteStream,
    id: &str,
    created: i64,
    model: &str,
) -> Option<JsonValue> {
    let mut parser = SseParser::new();
    let mut content = String::new();
    while let Some(chunk) = body.recv().await {
        for event in parser.push_bytes(&chunk) {
            append_content(event.data(), &mut content);
        }
    }
    for event in parser.finish() {
        append_content(event.data(), &mut content);
    }
    if content.is_empty() {
        return None;
    }
    Some(json!({
        "id": id,
        "object": "chat.completion",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop",
        }],
    }))
}

fn append_content(data: &str, out: &mut String) {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return;
    }
    let Ok(value) = serde_json::from_str::<JsonValue>(data) else {
        return;
    };
    for (index, delta) in choice_deltas(&value) {
        if index == 0
            && let Some(text) = delta.content
        {
            out.push_str(&text);
        }
    }
}

fn content_delta(source: &JsonValue) -> ChatChunkDelta {
    let non_null = |key: &str| source.get(key).filter(|v| !v.is_null()).cloned();
    ChatChunkDelta {
        role: None,
        content: source
            .get("content")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        function_call: non_null("function_call"),
        tool_calls: non_null("tool_calls"),
    }
}
