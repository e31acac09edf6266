use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value as JsonValue;

use relay_protocol::chat::payload_stream;
use relay_provider_core::{
    AcquireError, Capabilities, CredentialPool, CredentialRef, HttpMethod, ProviderConfig,
    ProviderError, ProviderResult, RequestEnvelope, TargetRequest, UpstreamProvider, header_merge,
    header_set,
};

use crate::auth_extractor;

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Any upstream that speaks the OpenAI wire protocol behind a bearer key.
pub struct OpenAICompatibleProvider {
    config: ProviderConfig,
    pool: Arc<CredentialPool>,
}

impl OpenAICompatibleProvider {
    pub fn new(config: ProviderConfig, pool: Arc<CredentialPool>) -> Self {
        Self { config, pool }
    }

    async fn credential(&self) -> ProviderResult<CredentialRef> {
        self.pool
            .acquire(&self.config.name)
            .await
            .map_err(|err| match err {
                AcquireError::ProviderUnknown | AcquireError::NoActiveCredentials => {
                    ProviderError::NoActiveCredentials(self.config.name.clone())
                }
            })
    }

    fn provider_headers(&self, credential: &CredentialRef, stream: bool) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        for (name, value) in &self.config.headers {
            header_set(&mut headers, name, value.clone());
        }
        auth_extractor::set_bearer(&mut headers, &credential.secret);
        if stream {
            auth_extractor::set_accept_event_stream(&mut headers);
        }
        headers
    }
}

#[async_trait::async_trait]
impl UpstreamProvider for OpenAICompatibleProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn capabilities(&self) -> Capabilities {
        self.config.capabilities()
    }

    fn models(&self) -> &[String] {
        &self.config.models
    }

    async fn is_available(&self) -> bool {
        self.pool.has_active(&self.config.name).await
    }

    async fn chat_completion(&self, payload: &JsonValue) -> ProviderResult<TargetRequest> {
        if !payload.is_object() {
            return Err(ProviderError::InvalidPayload(
                "chat payload must be a JSON object".to_string(),
            ));
        }
        let credential = self.credential().await?;
        let is_stream = payload_stream(payload);
        let body =
            serde_json::to_vec(payload).map_err(|err| ProviderError::Other(err.to_string()))?;
        let mut headers = self.provider_headers(&credential, is_stream);
        auth_extractor::set_content_type_json(&mut headers);
        Ok(TargetRequest {
            method: HttpMethod::Post,
            url: build_url(&self.config.base_url, CHAT_COMPLETIONS_PATH),
            headers,
            cookies: Vec::new(),
            body: Some(Bytes::from(body)),
            is_stream,
            credential: Some(credential),
            provider: self.config.name.clone(),
        })
    }

    async fn organify(&self, request: &RequestEnvelope) -> ProviderResult<TargetRequest> {
        if !self.config.organic {
            return Err(ProviderError::Unsupported("organify"));
        }
        let credential = self.credential().await?;
        let body = if request.method == HttpMethod::Get && request.payload_is_empty() {
            None
        } else {
            let raw = serde_json::to_vec(&request.payload)
                .map_err(|err| ProviderError::Other(err.to_string()))?;
            Some(Bytes::from(raw))
        };
        let provider_headers = self.provider_headers(&credential, request.stream);
        let mut headers = header_merge(&request.headers, &provider_headers);
        if body.is_some() {
            auth_extractor::set_content_type_json(&mut headers);
        }
        Ok(TargetRequest {
            method: request.method,
            url: build_url(&self.config.base_url, &request.path),
            headers,
            cookies: request.cookies.clone(),
            body,
            is_stream: request.stream,
            credential: Some(credential),
            provider: self.config.name.clone(),
        })
    }
}

fn build_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    format!("{base}/{}", path.trim_start_matches('/'))
}
