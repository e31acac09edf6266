use bytes::{Bytes, BytesMut};
use serde_json::Value as JsonValue;

use relay_provider_core::{
    ByteStream, Headers, ProviderError, UpstreamBody, UpstreamFailure, UpstreamHttpResponse,
    header_get,
};

use crate::error::GatewayError;

const INVALID_KEY_MARKERS: [&str; 2] = ["invalid_api_key", "account_deactivated"];
const METHOD_UNSUPPORTED_MARKER: &str = "method_not_supported";

/// Why an attempt failed in a way that moves on to the next attempt.
#[derive(Debug, Clone)]
pub enum AttemptFailure {
    RateLimited,
    /// The upstream rejected the credential; it gets invalidated.
    AuthInvalid,
    Transport(UpstreamFailure),
    Status(u16),
    EmptyChat,
    Provider(ProviderError),
}

impl AttemptFailure {
    pub fn label(&self) -> &'static str {
        match self {
            AttemptFailure::RateLimited => "rate_limited",
            AttemptFailure::AuthInvalid => "auth_invalid",
            AttemptFailure::Transport(_) => "transport",
            AttemptFailure::Status(_) => "status",
            AttemptFailure::EmptyChat => "empty_chat",
            AttemptFailure::Provider(_) => "provider_error",
        }
    }
}

/// A complete response body that ends the transfer.
#[derive(Debug, Clone)]
pub struct FinalBody {
    pub status: u16,
    pub content_type: String,
    pub body: Bytes,
    /// Parsed body when the upstream answered with JSON.
    pub json: Option<JsonValue>,
}

#[derive(Debug)]
pub enum Classified {
    Retry(AttemptFailure),
    Terminal(GatewayError),
    /// Successful response.
    Done(FinalBody),
    /// Non-retryable upstream error passed through unchanged.
    Forward(FinalBody),
    Stream {
        headers: Headers,
        body: ByteStream,
    },
}

pub async fn classify(resp: UpstreamHttpResponse, is_chat: bool) -> Classified {
    let status = resp.status;
    if status == 429 {
        return Classified::Retry(AttemptFailure::RateLimited);
    }
    let success = resp.is_success();
    let is_json = resp.is_json();
    let content_type = header_get(&resp.headers, "content-type")
        .unwrap_or("application/octet-stream")
        .to_string();

    let body = match resp.body {
        UpstreamBody::Stream(rx) if success && !is_json => {
            return Classified::Stream {
                headers: resp.headers,
                body: rx,
            };
        }
        UpstreamBody::Stream(rx) => collect(rx).await,
        UpstreamBody::Bytes(bytes) => bytes,
    };

    if is_json {
        let text = String::from_utf8_lossy(&body);
        if text.contains(METHOD_UNSUPPORTED_MARKER) {
            return Classified::Terminal(GatewayError::MethodUnsupported {
                detail: error_message(&body)
                    .unwrap_or_else(|| "The upstream rejected this method.".to_string()),
            });
        }
        if INVALID_KEY_MARKERS.iter().any(|m| text.contains(m)) {
            return Classified::Retry(AttemptFailure::AuthInvalid);
        }
    }

    if success {
        let json = if is_json {
            serde_json::from_slice::<JsonValue>(&body).ok()
        } else {
            None
        };
        if is_chat && json.as_ref().is_none_or(is_empty_json) {
            return Classified::Retry(AttemptFailure::EmptyChat);
        }
        return Classified::Done(FinalBody {
            status,
            content_type,
            body,
            json,
        });
    }

    if is_retryable_status(status) {
        return Classified::Retry(AttemptFailure::Status(status));
    }
    Classified::Forward(FinalBody {
        status,
        content_type,
        body,
        json: None,
    })
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 401 | 403 | 408) || (500..600).contains(&status)
}

fn is_empty_json(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::Object(map) => map.is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn error_message(body: &[u8]) -> Option<String> {
    let value: JsonValue = serde_json::from_slice(body).ok()?;
    value
        .pointer("/error/message")
        .and_then(JsonValue::as_str)
        .map(str::to_string)
}

async fn collect(mut rx: ByteStream) -> Bytes {
    let mut buf = BytesMut::new();
    while let Some(chunk) = rx.recv().await {
        buf.extend_from_slice(&chunk);
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_response(status: u16, body: &str) -> UpstreamHttpResponse {
        UpstreamHttpResponse {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: UpstreamBody::Bytes(Bytes::from(body.to_string())),
        }
    }

    #[tokio::test]
    async fn markers_win_over_status() {
        let revoked = json_response(
            401,
            r#"{"error":{"code":"invalid_api_key","message":"bad key"}}"#,
        );
        assert!(matches!(
            classify(revoked, true).await,
            Classified::Retry(AttemptFailure::AuthInvalid)
        ));

        let unsupported = json_response(
            405,
            r#"{"error":{"code":"method_not_supported","message":"nope"}}"#,
        );
        match classify(unsupported, false).await {
            Classified::Terminal(GatewayError::MethodUnsupported { detail }) => {
                assert_eq!(detail, "nope")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_chat_json_is_retried_but_organic_is_not() {
        assert!(matches!(
            classify(json_response(200, "{}"), true).await,
            Classified::Retry(AttemptFailure::EmptyChat)
        ));
        assert!(matches!(
            classify(json_response(200, "{}"), false).await,
            Classified::Done(_)
        ));
    }

    #[tokio::test]
    async fn client_errors_are_forwarded_and_server_errors_retried() {
        assert!(matches!(
            classify(json_response(400, r#"{"error":"bad"}"#), true).await,
            Classified::Forward(FinalBody { status: 400, .. })
        ));
        assert!(matches!(
            classify(json_response(502, "{}"), true).await,
            Classified::Retry(AttemptFailure::Status(502))
        ));
        assert!(matches!(
            classify(json_response(429, "{}"), true).await,
            Classified::Retry(AttemptFailure::RateLimited)
        ));
    }
}
