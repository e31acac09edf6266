//! Core provider abstractions for the relay gateway.
//!
//! This crate does **not** depend on axum or any concrete HTTP client.
//! Providers turn a downstream request into a `TargetRequest`; a higher layer
//! performs the IO, classifies the outcome and drives retries.

pub mod config;
pub mod credential;
pub mod errors;
pub mod events;
pub mod headers;
pub mod provider;
pub mod registry;
pub mod request;
pub mod upstream;

pub use config::ProviderConfig;
pub use credential::{
    AcquireError, CredentialHealth, CredentialPool, CredentialRef, CredentialStore,
    CredentialStoreError, FileCredentialStore, MemoryCredentialStore,
};
pub use errors::{ProviderError, ProviderResult};
pub use events::{
    CredentialInvalidatedEvent, Event, EventHub, EventSink, NoProviderAvailableEvent,
    OperationalEvent, TerminalEventSink, UpstreamAttemptEvent,
};
pub use headers::{Headers, header_get, header_merge, header_remove, header_set};
pub use provider::{Capabilities, UpstreamProvider};
pub use registry::ProviderRegistry;
pub use request::{HttpMethod, RequestEnvelope, TargetRequest};
pub use upstream::{
    ByteStream, UpstreamBody, UpstreamFailure, UpstreamHttpResponse, UpstreamTransportErrorKind,
};
