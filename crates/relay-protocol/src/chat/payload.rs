use serde_json::Value as JsonValue;

pub fn is_chat_path(path: &str) -> bool {
    path.contains("chat/completions")
}

pub fn is_moderation_path(path: &str) -> bool {
    path.contains("/moderations")
}

pub fn payload_model(payload: &JsonValue) -> Option<&str> {
    payload.get("model").and_then(JsonValue::as_str)
}

/// `stream` flag of a request body; anything but a literal `true` is non-streaming.
pub fn payload_stream(payload: &JsonValue) -> bool {
    payload
        .get("stream")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false)
}
