use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use wreq::{Client, Method, Proxy, RequestBuilder};

use relay_common::GlobalConfig;
use relay_provider_core::{
    ByteStream, Headers, HttpMethod, TargetRequest, UpstreamBody, UpstreamFailure,
    UpstreamHttpResponse, UpstreamTransportErrorKind,
};

/// Performs one upstream attempt. Implemented over wreq in production and by
/// scripted stubs in tests.
pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: TargetRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub proxy: Option<String>,
    /// Kept short so a dead provider costs little before failover.
    pub connect_timeout: Duration,
    /// Bound on a whole attempt; also the longest gap tolerated between two
    /// chunks of a streamed body.
    pub transfer_timeout: Duration,
}

impl UpstreamClientConfig {
    pub fn from_global(global: &GlobalConfig) -> Self {
        Self {
            proxy: global.proxy.clone(),
            connect_timeout: Duration::from_millis(global.connect_timeout_ms),
            transfer_timeout: Duration::from_secs(global.transfer_timeout_secs),
        }
    }
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(2),
            transfer_timeout: Duration::from_secs(120),
        }
    }
}

/// Shared wreq client; one connection pool for every provider.
#[derive(Clone)]
pub struct WreqUpstreamClient {
    client: Client,
    chunk_timeout: Duration,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.transfer_timeout);
        let proxy = config
            .proxy
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());
        if let Some(proxy) = proxy {
            builder = builder.proxy(Proxy::all(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
            chunk_timeout: config.transfer_timeout,
        })
    }

    fn request(&self, req: &mut TargetRequest) -> RequestBuilder {
        let method = match req.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        };
        let mut builder = self.client.request(method, &req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }
        if let Some(cookie) = req.cookie_header() {
            builder = builder.header("Cookie", cookie);
        }
        if let Some(body) = req.body.take() {
            builder = builder.body(body);
        }
        builder
    }
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        mut req: TargetRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            let resp = self
                .request(&mut req)
                .send()
                .await
                .map_err(transport_failure)?;

            let mut out = UpstreamHttpResponse {
                status: resp.status().as_u16(),
                headers: collect_headers(resp.headers()),
                body: UpstreamBody::Bytes(Bytes::new()),
            };
            out.body = if keeps_streaming(&out, req.is_stream) {
                UpstreamBody::Stream(pump(resp, self.chunk_timeout))
            } else {
                UpstreamBody::Bytes(resp.bytes().await.map_err(transport_failure)?)
            };
            Ok(out)
        })
    }
}

/// JSON and error bodies are read whole so the transfer loop can inspect
/// them. A successful body stays a stream when the caller asked for one or
/// the upstream announces `text/event-stream`.
fn keeps_streaming(head: &UpstreamHttpResponse, want_stream: bool) -> bool {
    head.is_success() && !head.is_json() && (want_stream || head.is_event_stream())
}

/// Moves body chunks into a channel. Stops on upstream end, on a gap longer
/// than `chunk_timeout`, or once the receiver is dropped.
fn pump(resp: wreq::Response, chunk_timeout: Duration) -> ByteStream {
    let (tx, rx) = mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        let mut chunks = resp.bytes_stream();
        while let Ok(next) = tokio::time::timeout(chunk_timeout, chunks.next()).await {
            match next {
                Some(Ok(chunk)) => {
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                }
                Some(Err(err)) => {
                    tracing::debug!(event = "upstream_stream_error", error = %err);
                    return;
                }
                None => return,
            }
        }
        tracing::debug!(event = "upstream_stream_stalled");
    });
    rx
}

fn collect_headers(map: &wreq::header::HeaderMap) -> Headers {
    map.iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn transport_failure(err: wreq::Error) -> UpstreamFailure {
    let message = err.to_string();
    let lower = message.to_ascii_lowercase();
    let mentions = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    let kind = if err.is_timeout() {
        if mentions(&["read", "idle"]) {
            UpstreamTransportErrorKind::ReadTimeout
        } else {
            UpstreamTransportErrorKind::Timeout
        }
    } else if mentions(&["tls", "ssl", "certificate"]) {
        UpstreamTransportErrorKind::Tls
    } else if err.is_connect() && mentions(&["dns", "resolve"]) {
        UpstreamTransportErrorKind::Dns
    } else if err.is_connect() || err.is_connection_reset() {
        UpstreamTransportErrorKind::Connect
    } else {
        UpstreamTransportErrorKind::Other
    };
    UpstreamFailure { kind, message }
}
