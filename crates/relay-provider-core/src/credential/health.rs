use std::sync::Arc;
use std::time::SystemTime;

use crate::events::{CredentialInvalidatedEvent, Event, EventHub, OperationalEvent};

use super::{CredentialPool, CredentialRef, CredentialStore, CredentialStoreError};

/// Ties the live pool to its durable store and to operator notifications.
#[derive(Clone)]
pub struct CredentialHealth {
    pool: Arc<CredentialPool>,
    store: Arc<dyn CredentialStore>,
    events: EventHub,
}

impl CredentialHealth {
    pub fn new(pool: Arc<CredentialPool>, store: Arc<dyn CredentialStore>, events: EventHub) -> Self {
        Self {
            pool,
            store,
            events,
        }
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// Loads the provider's secrets from the store into the pool.
    pub async fn load_provider(&self, provider: &str) -> Result<usize, CredentialStoreError> {
        let secrets = self.store.load(provider).await?;
        self.pool.replace(provider, secrets).await;
        Ok(self.pool.active_count(provider).await)
    }

    /// Permanently retires a credential.
    ///
    /// No-op for `None` or for a credential already retired. Returns whether
    /// this call performed the retirement. Store failures are logged; the
    /// in-memory removal still holds.
    pub async fn invalidate(&self, credential: Option<&CredentialRef>) -> bool {
        let Some(credential) = credential else {
            return false;
        };
        if !self.pool.remove(credential).await {
            return false;
        }

        if let Err(err) = self
            .store
            .remove(&credential.provider, &credential.secret)
            .await
        {
            tracing::warn!(
                event = "credential_store_remove_failed",
                provider = %credential.provider,
                error = %err,
            );
        }
        if let Err(err) = self
            .store
            .append_invalid(&credential.provider, &credential.secret)
            .await
        {
            tracing::warn!(
                event = "credential_store_append_failed",
                provider = %credential.provider,
                error = %err,
            );
        }

        tracing::info!(
            event = "credential_invalidated",
            provider = %credential.provider,
            credential = %credential.excerpt(),
        );
        self.events
            .emit(Event::Operational(OperationalEvent::CredentialInvalidated(
                CredentialInvalidatedEvent {
                    at: SystemTime::now(),
                    provider: credential.provider.clone(),
                    credential_excerpt: credential.excerpt(),
                },
            )))
            .await;
        true
    }
}
