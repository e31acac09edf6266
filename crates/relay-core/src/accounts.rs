use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub api_key: String,
    #[serde(default)]
    pub credits: i64,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub ban_reason: Option<String>,
}

fn default_role() -> String {
    "default".to_string()
}

fn default_active() -> bool {
    true
}

/// Key-value account store keyed by API key.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn lookup(&self, api_key: &str) -> Option<Account>;

    /// Subtracts `amount` and returns the new balance, or `None` for an unknown id.
    async fn debit(&self, account_id: &str, amount: i64) -> Option<i64>;
}

#[derive(Default)]
struct Accounts {
    by_id: HashMap<String, Account>,
    id_by_key: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemoryAccountStore {
    inner: RwLock<Accounts>,
}

impl MemoryAccountStore {
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        let mut inner = Accounts::default();
        for account in accounts {
            inner
                .id_by_key
                .insert(account.api_key.clone(), account.id.clone());
            inner.by_id.insert(account.id.clone(), account);
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    pub async fn credits(&self, account_id: &str) -> Option<i64> {
        self.inner
            .read()
            .await
            .by_id
            .get(account_id)
            .map(|a| a.credits)
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn lookup(&self, api_key: &str) -> Option<Account> {
        let guard = self.inner.read().await;
        let id = guard.id_by_key.get(api_key)?;
        guard.by_id.get(id).cloned()
    }

    async fn debit(&self, account_id: &str, amount: i64) -> Option<i64> {
        let mut guard = self.inner.write().await;
        let account = guard.by_id.get_mut(account_id)?;
        account.credits -= amount;
        Some(account.credits)
    }
}
