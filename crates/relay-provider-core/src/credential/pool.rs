use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;

/// A `(provider, secret)` pair. The secret never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CredentialRef {
    pub provider: String,
    pub secret: String,
}

impl CredentialRef {
    pub fn new(provider: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            secret: secret.into(),
        }
    }

    /// Short prefix safe to show operators, e.g. `sk-abcdefg...`.
    pub fn excerpt(&self) -> String {
        let visible = (self.secret.chars().count() / 2).min(10);
        let prefix: String = self.secret.chars().take(visible).collect();
        format!("{prefix}...")
    }
}

impl fmt::Debug for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRef")
            .field("provider", &self.provider)
            .field("secret", &self.excerpt())
            .finish()
    }
}

impl fmt::Display for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}>{}", self.provider, self.excerpt())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    ProviderUnknown,
    NoActiveCredentials,
}

#[derive(Default)]
struct ProviderSlot {
    active: Vec<String>,
    invalid: HashSet<String>,
    cursor: AtomicUsize,
}

/// Live credentials per provider. Invalidated secrets are remembered so a
/// reload cannot resurrect them.
#[derive(Default)]
pub struct CredentialPool {
    slots: RwLock<HashMap<String, ProviderSlot>>,
}

impl CredentialPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a secret. Returns false when it is already present or was invalidated.
    pub async fn insert(&self, provider: &str, secret: impl Into<String>) -> bool {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return false;
        }
        let mut slots = self.slots.write().await;
        let slot = slots.entry(provider.to_string()).or_default();
        if slot.invalid.contains(&secret) || slot.active.contains(&secret) {
            return false;
        }
        slot.active.push(secret);
        true
    }

    /// Replaces the active set of a provider, still honoring invalidations.
    pub async fn replace(&self, provider: &str, secrets: Vec<String>) {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(provider.to_string()).or_default();
        let mut active = Vec::with_capacity(secrets.len());
        for secret in secrets {
            if secret.trim().is_empty() || slot.invalid.contains(&secret) || active.contains(&secret)
            {
                continue;
            }
            active.push(secret);
        }
        slot.active = active;
        slot.cursor.store(0, Ordering::Relaxed);
    }

    /// Round-robin pick among the active secrets of `provider`.
    pub async fn acquire(&self, provider: &str) -> Result<CredentialRef, AcquireError> {
        let slots = self.slots.read().await;
        let Some(slot) = slots.get(provider) else {
            return Err(AcquireError::ProviderUnknown);
        };
        if slot.active.is_empty() {
            return Err(AcquireError::NoActiveCredentials);
        }
        let idx = slot.cursor.fetch_add(1, Ordering::Relaxed) % slot.active.len();
        Ok(CredentialRef::new(provider, slot.active[idx].clone()))
    }

    pub async fn has_active(&self, provider: &str) -> bool {
        self.slots
            .read()
            .await
            .get(provider)
            .is_some_and(|slot| !slot.active.is_empty())
    }

    pub async fn active_count(&self, provider: &str) -> usize {
        self.slots
            .read()
            .await
            .get(provider)
            .map_or(0, |slot| slot.active.len())
    }

    /// Moves a credential out of the active set.
    ///
    /// Returns true only for the call that actually removed it, so concurrent
    /// invalidations of the same key collapse into one.
    pub async fn remove(&self, credential: &CredentialRef) -> bool {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(credential.provider.clone()).or_default();
        let before = slot.active.len();
        slot.active.retain(|s| s != &credential.secret);
        slot.invalid.insert(credential.secret.clone());
        slot.active.len() != before
    }

    pub async fn is_invalidated(&self, credential: &CredentialRef) -> bool {
        self.slots
            .read()
            .await
            .get(&credential.provider)
            .is_some_and(|slot| slot.invalid.contains(&credential.secret))
    }
}
