//! Retry/failover loop between the selector, the upstream client and the
//! chunk normalizer.

mod classify;
mod normalize;

use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use relay_provider_core::{
    ByteStream, CredentialHealth, CredentialRef, Event, EventHub, Headers, HttpMethod,
    NoProviderAvailableEvent, OperationalEvent, RequestEnvelope, TargetRequest,
    UpstreamAttemptEvent, header_get, header_merge,
};

use crate::error::GatewayError;
use crate::selector::{ProviderSelector, SelectError};
use crate::settlement::{Settlement, SettlementRecord, TransferOutcome};
use crate::upstream_client::UpstreamClient;

pub use classify::{AttemptFailure, Classified, FinalBody, classify};
pub use normalize::{ChunkNormalizer, fold_stream};

const EVENT_STREAM: &str = "text/event-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Attempt bound for chat and streaming requests.
    pub chat_attempts: u32,
    /// Attempt bound for non-streaming organic requests.
    pub organic_attempts: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chat_attempts: 5,
            organic_attempts: 10,
        }
    }
}

impl TransferConfig {
    pub fn attempts_for(&self, envelope: &RequestEnvelope) -> u32 {
        let bound = if envelope.is_chat() || envelope.stream {
            self.chat_attempts
        } else {
            self.organic_attempts
        };
        bound.max(1)
    }
}

/// One admitted request, ready to be transferred.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub request_id: String,
    pub envelope: RequestEnvelope,
    pub account_id: Option<String>,
    pub credits_cost: i64,
    pub input_tokens: i64,
    pub client_ip: Option<String>,
}

#[derive(Debug)]
pub enum TransferResponse {
    Body {
        status: u16,
        content_type: String,
        body: Bytes,
    },
    Stream {
        content_type: String,
        body: mpsc::Receiver<Bytes>,
    },
    Error(GatewayError),
}

/// Target of one attempt, kept for settlement attribution.
#[derive(Debug, Clone)]
struct Attribution {
    provider: String,
    url: String,
}

pub struct TransferEngine {
    selector: Arc<ProviderSelector>,
    client: Arc<dyn UpstreamClient>,
    health: CredentialHealth,
    events: EventHub,
    settlement: Arc<dyn Settlement>,
    config: TransferConfig,
    base_headers: Headers,
}

impl TransferEngine {
    pub fn new(
        selector: Arc<ProviderSelector>,
        client: Arc<dyn UpstreamClient>,
        health: CredentialHealth,
        events: EventHub,
        settlement: Arc<dyn Settlement>,
        config: TransferConfig,
    ) -> Self {
        Self {
            selector,
            client,
            health,
            events,
            settlement,
            config,
            base_headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("User-Agent".to_string(), "null".to_string()),
            ],
        }
    }

    pub async fn run(&self, req: TransferRequest) -> TransferResponse {
        let max_attempts = self.config.attempts_for(&req.envelope);
        let is_chat = req.envelope.is_chat();
        let mut last: Option<Attribution> = None;

        for attempt_no in 1..=max_attempts {
            let target = match self.selector.select(&req.envelope).await {
                Ok(target) => target,
                Err(SelectError::NoProviderAvailable { model }) => {
                    return self.no_provider(&req, model, attempt_no - 1, last).await;
                }
                Err(SelectError::Provider { provider, error }) => {
                    warn!(
                        event = "provider_build_failed",
                        trace_id = %req.request_id,
                        provider = %provider,
                        attempt_no,
                        error = %error,
                    );
                    let attribution = Attribution {
                        provider,
                        url: String::new(),
                    };
                    self.emit_attempt(
                        &req,
                        attempt_no,
                        req.envelope.method,
                        &attribution,
                        None,
                        None,
                        Some(&AttemptFailure::Provider(error)),
                    )
                    .await;
                    continue;
                }
            };

            let target = self.prepare(target, &req.envelope);
            let credential = target.credential.clone();
            let attribution = Attribution {
                provider: target.provider.clone(),
                url: target.url.clone(),
            };
            let method = target.method;
            last = Some(attribution.clone());

            let classified = match self.client.send(target).await {
                Ok(resp) => {
                    let status = resp.status;
                    (Some(status), classify(resp, is_chat).await)
                }
                Err(failure) => (None, Classified::Retry(AttemptFailure::Transport(failure))),
            };
            let classified = match classified {
                // Frames go only to clients that asked for a stream.
                (status, Classified::Stream { body, .. }) if is_chat && !req.envelope.stream => {
                    (status, self.fold_chat_stream(&req, body).await)
                }
                other => other,
            };

            match classified {
                (status, Classified::Retry(failure)) => {
                    warn!(
                        event = "upstream_attempt_failed",
                        trace_id = %req.request_id,
                        provider = %attribution.provider,
                        attempt_no,
                        status = ?status,
                        reason = failure.label(),
                    );
                    if matches!(failure, AttemptFailure::AuthInvalid) {
                        self.health.invalidate(credential.as_ref()).await;
                    }
                    self.emit_attempt(
                        &req,
                        attempt_no,
                        method,
                        &attribution,
                        status,
                        credential.as_ref(),
                        Some(&failure),
                    )
                    .await;
                }
                (status, Classified::Terminal(err)) => {
                    warn!(
                        event = "upstream_method_unsupported",
                        trace_id = %req.request_id,
                        provider = %attribution.provider,
                        attempt_no,
                    );
                    self.emit_attempt(
                        &req,
                        attempt_no,
                        method,
                        &attribution,
                        status,
                        credential.as_ref(),
                        None,
                    )
                    .await;
                    self.settle_detached(
                        &req,
                        Some(attribution),
                        TransferOutcome::MethodUnsupported,
                        attempt_no,
                    );
                    return TransferResponse::Error(err);
                }
                (status, Classified::Done(body)) => {
                    info!(
                        event = "upstream_attempt_succeeded",
                        trace_id = %req.request_id,
                        provider = %attribution.provider,
                        attempt_no,
                        status = ?status,
                    );
                    self.emit_attempt(
                        &req,
                        attempt_no,
                        method,
                        &attribution,
                        status,
                        credential.as_ref(),
                        None,
                    )
                    .await;
                    self.settle_detached(
                        &req,
                        Some(attribution),
                        TransferOutcome::Completed,
                        attempt_no,
                    );
                    return self.final_response(&req, body);
                }
                (status, Classified::Forward(body)) => {
                    info!(
                        event = "upstream_error_forwarded",
                        trace_id = %req.request_id,
                        provider = %attribution.provider,
                        attempt_no,
                        status = body.status,
                    );
                    self.emit_attempt(
                        &req,
                        attempt_no,
                        method,
                        &attribution,
                        status,
                        credential.as_ref(),
                        None,
                    )
                    .await;
                    self.settle_detached(
                        &req,
                        Some(attribution),
                        TransferOutcome::Forwarded,
                        attempt_no,
                    );
                    return TransferResponse::Body {
                        status: body.status,
                        content_type: body.content_type,
                        body: body.body,
                    };
                }
                (status, Classified::Stream { headers, body }) => {
                    info!(
                        event = "upstream_stream_opened",
                        trace_id = %req.request_id,
                        provider = %attribution.provider,
                        attempt_no,
                    );
                    self.emit_attempt(
                        &req,
                        attempt_no,
                        method,
                        &attribution,
                        status,
                        credential.as_ref(),
                        None,
                    )
                    .await;
                    return self.forward_stream(req, headers, body, attribution, attempt_no);
                }
            }
        }

        warn!(
            event = "transfer_exhausted",
            trace_id = %req.request_id,
            path = %req.envelope.path,
            attempts = max_attempts,
        );
        self.settle_detached(&req, last, TransferOutcome::Exhausted, max_attempts);
        TransferResponse::Error(GatewayError::AllAttemptsExhausted {
            attempts: max_attempts,
        })
    }

    fn prepare(&self, mut target: TargetRequest, envelope: &RequestEnvelope) -> TargetRequest {
        target.headers = header_merge(&self.base_headers, &target.headers);
        if target.method == HttpMethod::Get && envelope.payload_is_empty() {
            target.body = None;
        }
        target
    }

    async fn no_provider(
        &self,
        req: &TransferRequest,
        model: Option<String>,
        attempts: u32,
        last: Option<Attribution>,
    ) -> TransferResponse {
        warn!(
            event = "no_provider_available",
            trace_id = %req.request_id,
            model = ?model,
            path = %req.envelope.path,
        );
        self.events
            .emit(Event::Operational(OperationalEvent::NoProviderAvailable(
                NoProviderAvailableEvent {
                    at: SystemTime::now(),
                    model: model.clone(),
                    path: req.envelope.path.clone(),
                },
            )))
            .await;
        self.settle_detached(req, last, TransferOutcome::NoProvider, attempts);
        TransferResponse::Error(GatewayError::NoProviderAvailable { model })
    }

    fn final_response(&self, req: &TransferRequest, body: FinalBody) -> TransferResponse {
        // A streaming chat client answered with a plain completion still gets frames.
        if req.envelope.is_chat()
            && req.envelope.stream
            && let Some(json) = &body.json
        {
            let normalizer = self.normalizer(req);
            let mut frames = vec![normalizer.start_frame()];
            frames.extend(normalizer.completion_frames(json));
            frames.extend(normalizer.end_frames());
            let (tx, rx) = mpsc::channel(frames.len());
            for frame in frames {
                let _ = tx.try_send(frame);
            }
            return TransferResponse::Stream {
                content_type: EVENT_STREAM.to_string(),
                body: rx,
            };
        }
        TransferResponse::Body {
            status: body.status,
            content_type: body.content_type,
            body: body.body,
        }
    }

    async fn fold_chat_stream(&self, req: &TransferRequest, body: ByteStream) -> Classified {
        let folded = fold_stream(
            body,
            &new_chat_id(),
            OffsetDateTime::now_utc().unix_timestamp(),
            req.envelope.model.as_deref().unwrap_or_default(),
        )
        .await;
        let Some(json) = folded else {
            return Classified::Retry(AttemptFailure::EmptyChat);
        };
        match serde_json::to_vec(&json) {
            Ok(body) => Classified::Done(FinalBody {
                status: 200,
                content_type: "application/json".to_string(),
                body: Bytes::from(body),
                json: Some(json),
            }),
            Err(_) => Classified::Retry(AttemptFailure::EmptyChat),
        }
    }

    fn normalizer(&self, req: &TransferRequest) -> ChunkNormalizer {
        ChunkNormalizer::new(
            new_chat_id(),
            OffsetDateTime::now_utc().unix_timestamp(),
            req.envelope.model.clone().unwrap_or_default(),
        )
    }

    fn forward_stream(
        &self,
        req: TransferRequest,
        upstream_headers: Headers,
        mut upstream: ByteStream,
        attribution: Attribution,
        attempts: u32,
    ) -> TransferResponse {
        let (tx, rx) = mpsc::channel::<Bytes>(32);
        let mut normalizer = (req.envelope.is_chat()).then(|| self.normalizer(&req));
        let content_type = if normalizer.is_some() {
            EVENT_STREAM.to_string()
        } else {
            header_get(&upstream_headers, "content-type")
                .unwrap_or(EVENT_STREAM)
                .to_string()
        };
        let settlement = self.settlement.clone();

        tokio::spawn(async move {
            let mut disconnected = false;
            if let Some(normalizer) = &normalizer {
                disconnected = tx.send(normalizer.start_frame()).await.is_err();
            }

            'read: while !disconnected {
                let chunk = tokio::select! {
                    chunk = upstream.recv() => chunk,
                    _ = tx.closed() => {
                        disconnected = true;
                        break;
                    }
                };
                let Some(chunk) = chunk else {
                    break;
                };
                let frames = match normalizer.as_mut() {
                    Some(normalizer) => normalizer.push(&chunk),
                    None => vec![chunk],
                };
                for frame in frames {
                    if tx.send(frame).await.is_err() {
                        disconnected = true;
                        break 'read;
                    }
                }
            }

            if !disconnected && let Some(normalizer) = normalizer.as_mut() {
                for frame in normalizer.finish() {
                    if tx.send(frame).await.is_err() {
                        disconnected = true;
                        break;
                    }
                }
            }
            drop(upstream);
            drop(tx);

            let outcome = if disconnected {
                TransferOutcome::ClientDisconnected
            } else {
                TransferOutcome::Completed
            };
            info!(
                event = "stream_finished",
                trace_id = %req.request_id,
                provider = %attribution.provider,
                outcome = ?outcome,
            );
            settlement
                .settle(settlement_record(&req, Some(attribution), outcome, attempts))
                .await;
        });

        TransferResponse::Stream {
            content_type,
            body: rx,
        }
    }

    fn settle_detached(
        &self,
        req: &TransferRequest,
        attribution: Option<Attribution>,
        outcome: TransferOutcome,
        attempts: u32,
    ) {
        let record = settlement_record(req, attribution, outcome, attempts);
        let settlement = self.settlement.clone();
        tokio::spawn(async move {
            settlement.settle(record).await;
        });
    }

    #[allow(clippy::too_many_arguments)]
    async fn emit_attempt(
        &self,
        req: &TransferRequest,
        attempt_no: u32,
        method: HttpMethod,
        attribution: &Attribution,
        status: Option<u16>,
        credential: Option<&CredentialRef>,
        failure: Option<&AttemptFailure>,
    ) {
        let (transport_kind, error_message) = match failure {
            Some(AttemptFailure::Transport(f)) => (Some(f.kind), Some(f.message.clone())),
            Some(AttemptFailure::Provider(err)) => (None, Some(err.to_string())),
            _ => (None, None),
        };
        self.events
            .emit(Event::Upstream(UpstreamAttemptEvent {
                request_id: req.request_id.clone(),
                at: SystemTime::now(),
                provider: attribution.provider.clone(),
                attempt_no,
                method: method.as_str().to_string(),
                url: attribution.url.clone(),
                status,
                outcome: failure.map_or("ok", AttemptFailure::label).to_string(),
                credential_excerpt: credential.map(CredentialRef::excerpt),
                transport_kind,
                error_message,
            }))
            .await;
    }
}

fn settlement_record(
    req: &TransferRequest,
    attribution: Option<Attribution>,
    outcome: TransferOutcome,
    attempts: u32,
) -> SettlementRecord {
    let (provider, target_url) = match attribution {
        Some(a) => (Some(a.provider), Some(a.url)),
        None => (None, None),
    };
    SettlementRecord {
        request_id: req.request_id.clone(),
        account_id: req.account_id.clone(),
        credits_cost: req.credits_cost,
        input_tokens: req.input_tokens,
        path: req.envelope.path.clone(),
        is_chat: req.envelope.is_chat(),
        model: req.envelope.model.clone(),
        target_url,
        provider,
        client_ip: req.client_ip.clone(),
        outcome,
        attempts,
    }
}

pub fn new_chat_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}
