use bytes::Bytes;
use serde_json::Value as JsonValue;

use relay_protocol::chat::{is_chat_path, is_moderation_path, payload_model, payload_stream};

use crate::credential::CredentialRef;
use crate::headers::Headers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    pub fn parse(method: &str) -> Option<Self> {
        if method.eq_ignore_ascii_case("GET") {
            Some(HttpMethod::Get)
        } else if method.eq_ignore_ascii_case("POST") {
            Some(HttpMethod::Post)
        } else if method.eq_ignore_ascii_case("PUT") {
            Some(HttpMethod::Put)
        } else if method.eq_ignore_ascii_case("PATCH") {
            Some(HttpMethod::Patch)
        } else if method.eq_ignore_ascii_case("DELETE") {
            Some(HttpMethod::Delete)
        } else {
            None
        }
    }
}

/// One inbound call, normalized once at the edge.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub method: HttpMethod,
    pub path: String,
    pub payload: JsonValue,
    /// Headers forwarded to organic providers (not the raw inbound headers).
    pub headers: Headers,
    pub cookies: Headers,
    pub stream: bool,
    pub model: Option<String>,
}

impl RequestEnvelope {
    pub fn new(
        method: HttpMethod,
        path: impl Into<String>,
        payload: JsonValue,
        headers: Headers,
        cookies: Headers,
    ) -> Self {
        let path = path.into();
        let stream = payload_stream(&payload);
        let model = if is_chat_path(&path) {
            payload_model(&payload).map(str::to_string)
        } else {
            None
        };
        Self {
            method,
            path,
            payload,
            headers,
            cookies,
            stream,
            model,
        }
    }

    pub fn is_chat(&self) -> bool {
        is_chat_path(&self.path)
    }

    pub fn is_moderation(&self) -> bool {
        is_moderation_path(&self.path)
    }

    /// True when the payload carries nothing worth sending (`{}`/`null`).
    pub fn payload_is_empty(&self) -> bool {
        match &self.payload {
            JsonValue::Null => true,
            JsonValue::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

/// Outbound request for a single attempt against one provider.
#[derive(Debug, Clone)]
pub struct TargetRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub cookies: Headers,
    pub body: Option<Bytes>,
    pub is_stream: bool,
    /// Credential used by this attempt; needed to invalidate it later.
    pub credential: Option<CredentialRef>,
    /// Provider tag for logs and settlement attribution.
    pub provider: String,
}

impl TargetRequest {
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
