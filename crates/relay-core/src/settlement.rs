use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::accounts::AccountStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOutcome {
    /// A provider produced the returned content.
    Completed,
    /// A non-retryable upstream error was passed through verbatim.
    Forwarded,
    /// The client went away while the stream was being forwarded.
    ClientDisconnected,
    MethodUnsupported,
    NoProvider,
    Exhausted,
}

impl TransferOutcome {
    /// Whether the account is charged for this transfer.
    pub fn is_billable(&self) -> bool {
        !matches!(
            self,
            TransferOutcome::NoProvider | TransferOutcome::MethodUnsupported
        )
    }
}

/// Everything settlement needs to know about one finished transfer.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementRecord {
    pub request_id: String,
    pub account_id: Option<String>,
    pub credits_cost: i64,
    pub input_tokens: i64,
    pub path: String,
    pub is_chat: bool,
    pub model: Option<String>,
    /// Target of the attempt that produced the content, else the last one tried.
    pub target_url: Option<String>,
    pub provider: Option<String>,
    pub client_ip: Option<String>,
    pub outcome: TransferOutcome,
    pub attempts: u32,
}

#[async_trait]
pub trait Settlement: Send + Sync {
    async fn settle(&self, record: SettlementRecord);
}

#[derive(Debug, Default)]
pub struct NoopSettlement;

#[async_trait]
impl Settlement for NoopSettlement {
    async fn settle(&self, _record: SettlementRecord) {}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub by_day: BTreeMap<String, u64>,
    pub by_ip: BTreeMap<String, u64>,
    pub by_path: BTreeMap<String, u64>,
    pub by_target: BTreeMap<String, u64>,
    pub by_model: BTreeMap<String, u64>,
    pub input_tokens: i64,
}

/// In-process request counters.
#[derive(Default)]
pub struct UsageStats {
    inner: Mutex<UsageSnapshot>,
}

impl UsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, record: &SettlementRecord) {
        let day = OffsetDateTime::now_utc().date().to_string();
        let mut guard = self.inner.lock().await;
        *guard.by_day.entry(day).or_default() += 1;
        if let Some(ip) = &record.client_ip {
            *guard.by_ip.entry(ip.clone()).or_default() += 1;
        }
        *guard.by_path.entry(record.path.clone()).or_default() += 1;
        if let Some(target) = &record.target_url {
            *guard.by_target.entry(target.clone()).or_default() += 1;
        }
        if let Some(model) = &record.model {
            *guard.by_model.entry(model.clone()).or_default() += 1;
        }
        if record.input_tokens > 0 {
            guard.input_tokens += record.input_tokens;
        }
    }

    pub async fn snapshot(&self) -> UsageSnapshot {
        self.inner.lock().await.clone()
    }
}

/// Debits the account, logs the request and bumps usage counters.
pub struct LedgerSettlement {
    accounts: Arc<dyn AccountStore>,
    stats: Arc<UsageStats>,
}

impl LedgerSettlement {
    pub fn new(accounts: Arc<dyn AccountStore>, stats: Arc<UsageStats>) -> Self {
        Self { accounts, stats }
    }
}

#[async_trait]
impl Settlement for LedgerSettlement {
    async fn settle(&self, record: SettlementRecord) {
        let mut balance = None;
        if record.outcome.is_billable()
            && let Some(account_id) = record.account_id.as_deref()
        {
            balance = self.accounts.debit(account_id, record.credits_cost).await;
        }

        tracing::info!(
            event = "request_settled",
            trace_id = %record.request_id,
            account = ?record.account_id,
            path = %record.path,
            model = ?record.model,
            provider = ?record.provider,
            target = ?record.target_url,
            outcome = ?record.outcome,
            attempts = record.attempts,
            credits_cost = record.credits_cost,
            balance = ?balance,
        );

        if record.target_url.is_some() {
            self.stats.record(&record).await;
        }
    }
}
