use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::upstream::UpstreamTransportErrorKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Upstream(UpstreamAttemptEvent),
    Operational(OperationalEvent),
}

/// One attempt against one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamAttemptEvent {
    pub request_id: String,
    pub at: SystemTime,
    pub provider: String,
    pub attempt_no: u32,
    pub method: String,
    pub url: String,
    pub status: Option<u16>,
    /// Classification of the attempt: `ok`, `retry`, `invalid_key`, ...
    pub outcome: String,
    pub credential_excerpt: Option<String>,
    pub transport_kind: Option<UpstreamTransportErrorKind>,
    pub error_message: Option<String>,
}

/// Events an operator should see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperationalEvent {
    NoProviderAvailable(NoProviderAvailableEvent),
    CredentialInvalidated(CredentialInvalidatedEvent),
}

impl OperationalEvent {
    /// Human-readable line for chat-style webhooks.
    pub fn message(&self) -> String {
        match self {
            OperationalEvent::NoProviderAvailable(ev) => match &ev.model {
                Some(model) => format!(
                    "No provider available for model `{model}` (path `{}`).",
                    ev.path
                ),
                None => format!("No provider available for path `{}`.", ev.path),
            },
            OperationalEvent::CredentialInvalidated(ev) => format!(
                "Credential `{}` of provider `{}` was invalidated.",
                ev.credential_excerpt, ev.provider
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoProviderAvailableEvent {
    pub at: SystemTime,
    pub model: Option<String>,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialInvalidatedEvent {
    pub at: SystemTime,
    pub provider: String,
    pub credential_excerpt: String,
}
