use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Value as JsonValue, json};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use relay_core::{
    Chooser, GatewayError, ProviderSelector, Settlement, SettlementRecord, TransferConfig,
    TransferEngine, TransferOutcome, TransferRequest, TransferResponse, UpstreamClient,
};
use relay_provider_core::{
    CredentialHealth, CredentialPool, Event, EventHub, HttpMethod, MemoryCredentialStore,
    OperationalEvent, ProviderConfig, RequestEnvelope, TargetRequest, UpstreamBody,
    UpstreamFailure, UpstreamHttpResponse, UpstreamTransportErrorKind, header_get,
};
use relay_provider_impl::build_registry;

enum Reply {
    Json(u16, String),
    Stream(Vec<&'static str>),
    Live(mpsc::Receiver<Bytes>),
    Transport,
}

struct ScriptedClient {
    replies: Mutex<VecDeque<Reply>>,
    fallback_status: Option<u16>,
    calls: AtomicUsize,
    targets: Mutex<Vec<TargetRequest>>,
}

impl ScriptedClient {
    fn new(replies: Vec<Reply>, fallback_status: Option<u16>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            fallback_status,
            calls: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn targets(&self) -> Vec<TargetRequest> {
        self.targets.lock().unwrap().clone()
    }
}

fn json_headers() -> Vec<(String, String)> {
    vec![("content-type".to_string(), "application/json".to_string())]
}

impl UpstreamClient for ScriptedClient {
    fn send<'a>(
        &'a self,
        req: TargetRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.targets.lock().unwrap().push(req);
            let next = self.replies.lock().unwrap().pop_front();
            let reply = match next {
                Some(reply) => reply,
                None => Reply::Json(self.fallback_status.unwrap_or(500), "{}".to_string()),
            };
            match reply {
                Reply::Json(status, body) => Ok(UpstreamHttpResponse {
                    status,
                    headers: json_headers(),
                    body: UpstreamBody::Bytes(Bytes::from(body)),
                }),
                Reply::Stream(chunks) => {
                    let (tx, rx) = mpsc::channel(chunks.len() + 1);
                    for chunk in chunks {
                        tx.try_send(Bytes::from_static(chunk.as_bytes())).unwrap();
                    }
                    Ok(event_stream(rx))
                }
                Reply::Live(rx) => Ok(event_stream(rx)),
                Reply::Transport => Err(UpstreamFailure {
                    kind: UpstreamTransportErrorKind::Connect,
                    message: "connection reset".to_string(),
                }),
            }
        })
    }
}

fn event_stream(rx: mpsc::Receiver<Bytes>) -> UpstreamHttpResponse {
    UpstreamHttpResponse {
        status: 200,
        headers: vec![("content-type".to_string(), "text/event-stream".to_string())],
        body: UpstreamBody::Stream(rx),
    }
}

struct CountingChooser(Arc<AtomicUsize>);

impl Chooser for CountingChooser {
    fn choose(&self, _len: usize) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst);
        0
    }
}

struct Recorder(mpsc::UnboundedSender<SettlementRecord>);

#[async_trait::async_trait]
impl Settlement for Recorder {
    async fn settle(&self, record: SettlementRecord) {
        let _ = self.0.send(record);
    }
}

struct Harness {
    engine: TransferEngine,
    client: Arc<ScriptedClient>,
    selector: Arc<ProviderSelector>,
    selections: Arc<AtomicUsize>,
    settlements: mpsc::UnboundedReceiver<SettlementRecord>,
    events: broadcast::Receiver<Event>,
    store: Arc<MemoryCredentialStore>,
}

fn alpha() -> ProviderConfig {
    ProviderConfig {
        name: "alpha".to_string(),
        base_url: "https://alpha.example".to_string(),
        streaming: true,
        organic: true,
        moderations: false,
        models: vec!["demo-model".to_string()],
        headers: Vec::new(),
    }
}

async fn harness(keys: &[&str], client: Arc<ScriptedClient>) -> Harness {
    let hub = EventHub::new(64);
    let events = hub.subscribe();
    let pool = Arc::new(CredentialPool::new());
    let store = Arc::new(MemoryCredentialStore::new());
    store
        .seed("alpha", keys.iter().map(|k| k.to_string()).collect())
        .await;
    let health = CredentialHealth::new(pool.clone(), store.clone(), hub.clone());
    health.load_provider("alpha").await.unwrap();

    let registry = Arc::new(build_registry(&[alpha()], pool));
    let selections = Arc::new(AtomicUsize::new(0));
    let selector = Arc::new(ProviderSelector::new(
        registry,
        Arc::new(CountingChooser(selections.clone())),
    ));
    let (tx, settlements) = mpsc::unbounded_channel();
    let engine = TransferEngine::new(
        selector.clone(),
        client.clone(),
        health,
        hub,
        Arc::new(Recorder(tx)),
        TransferConfig::default(),
    );
    Harness {
        engine,
        client,
        selector,
        selections,
        settlements,
        events,
        store,
    }
}

fn chat_request(payload: JsonValue) -> TransferRequest {
    TransferRequest {
        request_id: "trace-1".to_string(),
        envelope: RequestEnvelope::new(
            HttpMethod::Post,
            "/v1/chat/completions",
            payload,
            Vec::new(),
            Vec::new(),
        ),
        account_id: Some("u1".to_string()),
        credits_cost: 10,
        input_tokens: -1,
        client_ip: Some("127.0.0.1".to_string()),
    }
}

async fn next_settlement(h: &mut Harness) -> SettlementRecord {
    timeout(Duration::from_secs(1), h.settlements.recv())
        .await
        .unwrap()
        .unwrap()
}

async fn assert_no_more_settlements(h: &mut Harness) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.settlements.try_recv().is_err());
}

async fn drain_operational(h: &mut Harness) -> Vec<OperationalEvent> {
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut out = Vec::new();
    while let Ok(event) = h.events.try_recv() {
        if let Event::Operational(op) = event {
            out.push(op);
        }
    }
    out
}

async fn collect_stream(mut rx: mpsc::Receiver<Bytes>) -> Vec<Bytes> {
    let mut frames = Vec::new();
    while let Some(frame) = timeout(Duration::from_secs(1), rx.recv()).await.unwrap() {
        frames.push(frame);
    }
    frames
}

fn frame_json(frame: &Bytes) -> JsonValue {
    let text = std::str::from_utf8(frame).unwrap();
    serde_json::from_str(text.strip_prefix("data: ").unwrap().trim_end()).unwrap()
}

const DEMO_ANSWER: &str = r#"{"choices":[{"message":{"content":"2"}}]}"#;

fn demo_payload(stream: bool) -> JsonValue {
    json!({
        "model": "demo-model",
        "messages": [{"role": "user", "content": "1+1="}],
        "stream": stream,
    })
}

#[tokio::test]
async fn happy_path_forwards_json_once() {
    let client = ScriptedClient::new(vec![Reply::Json(200, DEMO_ANSWER.to_string())], None);
    let mut h = harness(&["sk-alpha-0001"], client).await;

    let response = h.engine.run(chat_request(demo_payload(false))).await;
    match response {
        TransferResponse::Body {
            status,
            content_type,
            body,
        } => {
            assert_eq!(status, 200);
            assert_eq!(content_type, "application/json");
            assert_eq!(body, Bytes::from_static(DEMO_ANSWER.as_bytes()));
        }
        other => panic!("unexpected response: {other:?}"),
    }
    assert_eq!(h.client.calls(), 1);

    let target = &h.client.targets()[0];
    assert_eq!(header_get(&target.headers, "user-agent"), Some("null"));
    assert_eq!(
        header_get(&target.headers, "authorization"),
        Some("Bearer sk-alpha-0001")
    );

    let record = next_settlement(&mut h).await;
    assert_eq!(record.provider.as_deref(), Some("alpha"));
    assert_eq!(record.outcome, TransferOutcome::Completed);
    assert_eq!(record.attempts, 1);
    assert_no_more_settlements(&mut h).await;
}

#[tokio::test]
async fn failover_after_rate_limit() {
    let client = ScriptedClient::new(
        vec![
            Reply::Json(429, r#"{"error":"slow down"}"#.to_string()),
            Reply::Json(200, DEMO_ANSWER.to_string()),
        ],
        None,
    );
    let mut h = harness(&["sk-alpha-0001"], client).await;

    let response = h.engine.run(chat_request(demo_payload(false))).await;
    assert!(matches!(
        response,
        TransferResponse::Body { status: 200, ref body, .. } if body.as_ref() == DEMO_ANSWER.as_bytes()
    ));
    assert_eq!(h.selections.load(Ordering::SeqCst), 2);
    assert_eq!(h.client.calls(), 2);
    let record = next_settlement(&mut h).await;
    assert_eq!(record.attempts, 2);
}

#[tokio::test]
async fn transport_failures_are_retried() {
    let client = ScriptedClient::new(
        vec![Reply::Transport, Reply::Json(200, DEMO_ANSWER.to_string())],
        None,
    );
    let h = harness(&["sk-alpha-0001"], client).await;
    let response = h.engine.run(chat_request(demo_payload(false))).await;
    assert!(matches!(response, TransferResponse::Body { status: 200, .. }));
    assert_eq!(h.client.calls(), 2);
}

#[tokio::test]
async fn always_rate_limited_exhausts_without_output() {
    let client = ScriptedClient::new(Vec::new(), Some(429));
    let mut h = harness(&["sk-alpha-0001"], client).await;

    let response = h.engine.run(chat_request(demo_payload(true))).await;
    match response {
        TransferResponse::Error(GatewayError::AllAttemptsExhausted { attempts }) => {
            assert_eq!(attempts, 5)
        }
        other => panic!("unexpected response: {other:?}"),
    }
    assert_eq!(h.client.calls(), 5);
    let record = next_settlement(&mut h).await;
    assert_eq!(record.outcome, TransferOutcome::Exhausted);
    assert_eq!(record.provider.as_deref(), Some("alpha"));
}

#[tokio::test]
async fn organic_requests_get_the_larger_attempt_bound() {
    let client = ScriptedClient::new(Vec::new(), Some(503));
    let h = harness(&["sk-alpha-0001"], client).await;
    let request = TransferRequest {
        envelope: RequestEnvelope::new(
            HttpMethod::Post,
            "/v1/images/generations",
            json!({"prompt": "a cat"}),
            Vec::new(),
            Vec::new(),
        ),
        ..chat_request(json!({}))
    };
    let response = h.engine.run(request).await;
    assert!(matches!(
        response,
        TransferResponse::Error(GatewayError::AllAttemptsExhausted { attempts: 10 })
    ));
    assert_eq!(h.client.calls(), 10);
}

#[tokio::test]
async fn no_provider_notifies_once_without_calls() {
    let client = ScriptedClient::new(Vec::new(), None);
    let mut h = harness(&["sk-alpha-0001"], client).await;

    let payload = json!({"model": "unknown-model", "messages": []});
    let response = h.engine.run(chat_request(payload)).await;
    assert!(matches!(
        response,
        TransferResponse::Error(GatewayError::NoProviderAvailable { model: Some(ref m) }) if m == "unknown-model"
    ));
    assert_eq!(h.client.calls(), 0);

    let ops = drain_operational(&mut h).await;
    assert_eq!(ops.len(), 1);
    assert!(matches!(ops[0], OperationalEvent::NoProviderAvailable(_)));

    let record = next_settlement(&mut h).await;
    assert_eq!(record.outcome, TransferOutcome::NoProvider);
    assert_eq!(record.target_url, None);
}

#[tokio::test]
async fn streaming_chat_is_normalized() {
    let client = ScriptedClient::new(
        vec![Reply::Stream(vec![
            "data: {\"id\":\"up-1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"id\":\"up-1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"id\":\"up-1\",\"choi",
            "ces\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\n",
            ": keep-alive\n\n",
            "data: {\"id\":\"up-1\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ])],
        None,
    );
    let mut h = harness(&["sk-alpha-0001"], client).await;

    let response = h.engine.run(chat_request(demo_payload(true))).await;
    let TransferResponse::Stream { content_type, body } = response else {
        panic!("expected a stream");
    };
    assert_eq!(content_type, "text/event-stream");
    let frames = collect_stream(body).await;
    assert_eq!(frames.len(), 5);

    let start = frame_json(&frames[0]);
    assert_eq!(start["choices"][0]["delta"], json!({"role": "assistant"}));
    assert_eq!(frame_json(&frames[1])["choices"][0]["delta"]["content"], "Hel");
    assert_eq!(frame_json(&frames[2])["choices"][0]["delta"]["content"], "lo");
    let stop = frame_json(&frames[3]);
    assert_eq!(stop["choices"][0]["finish_reason"], "stop");
    assert_eq!(frames[4], Bytes::from_static(b"data: [DONE]\n\n"));

    let id = start["id"].as_str().unwrap();
    assert!(id.starts_with("chatcmpl-"));
    assert_ne!(id, "up-1");
    for frame in &frames[..4] {
        let value = frame_json(frame);
        assert_eq!(value["id"], id);
        assert_eq!(value["model"], "demo-model");
        assert_eq!(value["object"], "chat.completion.chunk");
    }

    let record = next_settlement(&mut h).await;
    assert_eq!(record.outcome, TransferOutcome::Completed);
    assert_no_more_settlements(&mut h).await;
}

#[tokio::test]
async fn invalidated_credential_never_returns() {
    let client = ScriptedClient::new(
        vec![
            Reply::Json(
                401,
                r#"{"error":{"code":"invalid_api_key","message":"Incorrect API key"}}"#.to_string(),
            ),
            Reply::Json(200, DEMO_ANSWER.to_string()),
        ],
        None,
    );
    let mut h = harness(&["sk-first-key-0001", "sk-second-key-0002"], client).await;

    let response = h.engine.run(chat_request(demo_payload(false))).await;
    assert!(matches!(response, TransferResponse::Body { status: 200, .. }));

    let targets = h.client.targets();
    let revoked = targets[0].credential.clone().unwrap();
    assert_ne!(targets[1].credential.as_ref(), Some(&revoked));

    let envelope = chat_request(demo_payload(false)).envelope;
    for _ in 0..6 {
        let target = h.selector.select(&envelope).await.unwrap();
        assert_ne!(target.credential.as_ref(), Some(&revoked));
    }

    assert_eq!(h.store.invalid("alpha").await, vec![revoked.secret.clone()]);
    let ops = drain_operational(&mut h).await;
    assert_eq!(ops.len(), 1);
    match &ops[0] {
        OperationalEvent::CredentialInvalidated(ev) => {
            assert_eq!(ev.provider, "alpha");
            assert!(!ev.credential_excerpt.contains(&revoked.secret));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn last_credential_revoked_leaves_no_provider() {
    let client = ScriptedClient::new(
        vec![Reply::Json(
            401,
            r#"{"error":{"code":"account_deactivated"}}"#.to_string(),
        )],
        None,
    );
    let h = harness(&["sk-only-key-0001"], client).await;
    let response = h.engine.run(chat_request(demo_payload(false))).await;
    assert!(matches!(
        response,
        TransferResponse::Error(GatewayError::NoProviderAvailable { .. })
    ));
    assert_eq!(h.client.calls(), 1);
}

#[tokio::test]
async fn method_not_supported_is_terminal() {
    let client = ScriptedClient::new(
        vec![Reply::Json(
            405,
            r#"{"error":{"code":"method_not_supported","message":"GET only"}}"#.to_string(),
        )],
        None,
    );
    let mut h = harness(&["sk-alpha-0001"], client).await;
    let request = TransferRequest {
        envelope: RequestEnvelope::new(
            HttpMethod::Post,
            "/v1/files",
            json!({"purpose": "x"}),
            Vec::new(),
            Vec::new(),
        ),
        ..chat_request(json!({}))
    };
    let response = h.engine.run(request).await;
    match response {
        TransferResponse::Error(err) => {
            assert_eq!(err.status().as_u16(), 500);
            assert_eq!(err.tip(), "GET only");
        }
        other => panic!("unexpected response: {other:?}"),
    }
    assert_eq!(h.client.calls(), 1);
    let record = next_settlement(&mut h).await;
    assert_eq!(record.outcome, TransferOutcome::MethodUnsupported);
}

#[tokio::test]
async fn client_disconnect_stops_upstream_and_still_settles() {
    let (upstream_tx, upstream_rx) = mpsc::channel::<Bytes>(4);
    let client = ScriptedClient::new(vec![Reply::Live(upstream_rx)], None);
    let mut h = harness(&["sk-alpha-0001"], client).await;

    let response = h.engine.run(chat_request(demo_payload(true))).await;
    let TransferResponse::Stream { mut body, .. } = response else {
        panic!("expected a stream");
    };
    let start = timeout(Duration::from_secs(1), body.recv()).await.unwrap().unwrap();
    assert_eq!(frame_json(&start)["choices"][0]["delta"]["role"], "assistant");
    drop(body);

    upstream_tx
        .send(Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        ))
        .await
        .unwrap();
    timeout(Duration::from_secs(1), upstream_tx.closed())
        .await
        .unwrap();

    let record = next_settlement(&mut h).await;
    assert_eq!(record.outcome, TransferOutcome::ClientDisconnected);
    assert_no_more_settlements(&mut h).await;
}

#[tokio::test]
async fn client_disconnect_is_noticed_while_upstream_is_silent() {
    let (upstream_tx, upstream_rx) = mpsc::channel::<Bytes>(4);
    let client = ScriptedClient::new(vec![Reply::Live(upstream_rx)], None);
    let mut h = harness(&["sk-alpha-0001"], client).await;

    let response = h.engine.run(chat_request(demo_payload(true))).await;
    let TransferResponse::Stream { mut body, .. } = response else {
        panic!("expected a stream");
    };
    timeout(Duration::from_secs(1), body.recv()).await.unwrap().unwrap();
    drop(body);

    timeout(Duration::from_secs(1), upstream_tx.closed())
        .await
        .unwrap();
    let record = next_settlement(&mut h).await;
    assert_eq!(record.outcome, TransferOutcome::ClientDisconnected);
}

#[tokio::test]
async fn non_streaming_chat_answered_with_stream_gets_one_json_document() {
    let client = ScriptedClient::new(
        vec![Reply::Stream(vec![
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"2\"}}]}\n\n",
            "data: [DONE]\n\n",
        ])],
        None,
    );
    let mut h = harness(&["sk-alpha-0001"], client).await;

    let response = h.engine.run(chat_request(demo_payload(false))).await;
    let TransferResponse::Body {
        status,
        content_type,
        body,
    } = response
    else {
        panic!("expected a JSON body");
    };
    assert_eq!(status, 200);
    assert_eq!(content_type, "application/json");
    let value: JsonValue = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["object"], "chat.completion");
    assert_eq!(value["model"], "demo-model");
    assert_eq!(value["choices"][0]["message"]["content"], "2");

    let record = next_settlement(&mut h).await;
    assert_eq!(record.outcome, TransferOutcome::Completed);
}

#[tokio::test]
async fn non_streaming_chat_with_empty_stream_is_retried() {
    let client = ScriptedClient::new(
        vec![
            Reply::Stream(vec!["data: [DONE]\n\n"]),
            Reply::Json(200, DEMO_ANSWER.to_string()),
        ],
        None,
    );
    let h = harness(&["sk-alpha-0001"], client).await;

    let response = h.engine.run(chat_request(demo_payload(false))).await;
    assert!(matches!(
        response,
        TransferResponse::Body { ref body, .. } if body.as_ref() == DEMO_ANSWER.as_bytes()
    ));
    assert_eq!(h.client.calls(), 2);
}
