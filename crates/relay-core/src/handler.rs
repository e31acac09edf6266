use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE};
use serde_json::{Value as JsonValue, json};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use relay_provider_core::{Headers, HttpMethod, RequestEnvelope};

use crate::core::CoreState;
use crate::error::GatewayError;
use crate::transfer::{TransferRequest, TransferResponse, new_request_id};

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const REQUEST_ID_HEADER: &str = "x-relay-request-id";

pub async fn root_handler() -> Json<JsonValue> {
    Json(json!({
        "hi": "Welcome to relay, an OpenAI-compatible gateway.",
        "api": "/v1",
        "models": "/v1/models",
        "ping": "pong",
    }))
}

pub async fn proxy_handler(State(state): State<Arc<CoreState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let trace_id = new_request_id();
    let started_at = Instant::now();

    let Some(path) = normalize_path(parts.uri.path()) else {
        return error_response(&GatewayError::InvalidPath, &trace_id);
    };
    if path.contains("/models") {
        return models_response(&state);
    }
    let Some(method) = HttpMethod::parse(parts.method.as_str()) else {
        return error_response(&GatewayError::InvalidPath, &trace_id);
    };

    let client_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());
    let body = match read_body(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(err) => {
            warn!(
                event = "downstream_rejected",
                trace_id = %trace_id,
                path = %path,
                code = err.code(),
            );
            return error_response(&err, &trace_id);
        }
    };
    let payload = parse_payload(&body);

    info!(
        event = "downstream_received",
        trace_id = %trace_id,
        method = %parts.method,
        path = %path,
        client_ip = ?client_ip,
    );

    let authorization = header_str(&parts.headers, AUTHORIZATION.as_str());
    let admitted = match state.admission.admit(authorization, &path, payload).await {
        Ok(admitted) => admitted,
        Err(err) => {
            warn!(
                event = "downstream_rejected",
                trace_id = %trace_id,
                path = %path,
                code = err.code(),
            );
            return error_response(&err, &trace_id);
        }
    };

    let envelope = RequestEnvelope::new(
        method,
        path.clone(),
        admitted.payload,
        Vec::new(),
        parse_cookies(&parts.headers),
    );
    let is_stream = envelope.stream;
    let transfer = TransferRequest {
        request_id: trace_id.clone(),
        envelope,
        account_id: Some(admitted.account.id),
        credits_cost: admitted.credits_cost,
        input_tokens: -1,
        client_ip,
    };

    let response = state.engine.run(transfer).await;
    let status = match &response {
        TransferResponse::Body { status, .. } => *status,
        TransferResponse::Stream { .. } => 200,
        TransferResponse::Error(err) => err.status().as_u16(),
    };
    info!(
        event = "downstream_responded",
        trace_id = %trace_id,
        path = %path,
        status,
        elapsed_ms = started_at.elapsed().as_millis(),
        is_stream,
    );
    transfer_response(response, &trace_id)
}

/// Collapses `v1/v1` and `//`; `None` for anything outside `/v1/`.
pub fn normalize_path(raw: &str) -> Option<String> {
    let mut path = raw.to_string();
    while path.contains("//") {
        path = path.replace("//", "/");
    }
    while path.contains("v1/v1") {
        path = path.replace("v1/v1", "v1");
    }
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    path.starts_with("/v1/").then_some(path)
}

fn parse_payload(body: &Bytes) -> JsonValue {
    if body.is_empty() {
        return json!({});
    }
    serde_json::from_slice(body).unwrap_or_else(|_| json!({}))
}

fn parse_cookies(headers: &HeaderMap) -> Headers {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (!name.is_empty()).then(|| (name.to_string(), value.to_string()))
        })
        .collect()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn models_response(state: &CoreState) -> Response {
    let data: Vec<JsonValue> = state
        .registry
        .models()
        .into_iter()
        .map(|(id, owner)| json!({"id": id, "object": "model", "owned_by": owner}))
        .collect();
    Json(json!({"object": "list", "data": data})).into_response()
}

fn transfer_response(response: TransferResponse, trace_id: &str) -> Response {
    let mut resp = match response {
        TransferResponse::Body {
            status,
            content_type,
            body,
        } => {
            let mut resp = Response::new(Body::from(body));
            *resp.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                resp.headers_mut().insert(CONTENT_TYPE, value);
            }
            resp
        }
        TransferResponse::Stream { content_type, body } => {
            let stream = ReceiverStream::new(body).map(Ok::<Bytes, Infallible>);
            let mut resp = Response::new(Body::from_stream(stream));
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                resp.headers_mut().insert(CONTENT_TYPE, value);
            }
            resp.headers_mut()
                .insert("cache-control", HeaderValue::from_static("no-cache"));
            resp
        }
        TransferResponse::Error(err) => return error_response(&err, trace_id),
    };
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    resp
}

fn error_response(err: &GatewayError, trace_id: &str) -> Response {
    let mut resp = Response::new(Body::from(err.to_json_bytes()));
    *resp.status_mut() = err.status();
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    resp
}

/// Oversized or unreadable bodies are refused rather than treated as empty.
async fn read_body(body: Body, limit: usize) -> Result<Bytes, GatewayError> {
    axum::body::to_bytes(body, limit).await.map_err(|err| {
        tracing::debug!(event = "downstream_body_unreadable", error = %err);
        GatewayError::PayloadTooLarge { limit }
    })
}
