//! Gateway pipeline: admission, provider selection, transfer with failover,
//! chunk normalization and settlement, exposed as an axum router.

pub mod accounts;
pub mod admission;
pub mod core;
pub mod error;
pub mod handler;
pub mod moderation;
pub mod notify;
pub mod selector;
pub mod settlement;
pub mod transfer;
pub mod upstream_client;

pub use accounts::{Account, AccountStore, MemoryAccountStore};
pub use admission::{Admission, Admitted, Pricing, RolePricing};
pub use core::{Core, CoreState};
pub use error::{ErrorBody, GatewayError};
pub use moderation::{KeywordClassifier, ModerationClassifier, ModerationGate, Verdict};
pub use notify::WebhookEventSink;
pub use selector::{Chooser, ProviderSelector, SelectError, UniformChooser};
pub use settlement::{
    LedgerSettlement, NoopSettlement, Settlement, SettlementRecord, TransferOutcome, UsageSnapshot,
    UsageStats,
};
pub use transfer::{
    ChunkNormalizer, TransferConfig, TransferEngine, TransferRequest, TransferResponse,
};
pub use upstream_client::{UpstreamClient, UpstreamClientConfig, WreqUpstreamClient};
