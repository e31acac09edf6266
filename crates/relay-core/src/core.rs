use std::sync::Arc;

use axum::Router;
use axum::routing::{any, get};

use relay_provider_core::ProviderRegistry;

use crate::admission::Admission;
use crate::handler::{proxy_handler, root_handler};
use crate::transfer::TransferEngine;

pub struct CoreState {
    pub admission: Admission,
    pub engine: TransferEngine,
    pub registry: Arc<ProviderRegistry>,
}

pub struct Core {
    state: Arc<CoreState>,
}

impl Core {
    pub fn new(
        admission: Admission,
        engine: TransferEngine,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            state: Arc::new(CoreState {
                admission,
                engine,
                registry,
            }),
        }
    }

    /// `/v1/...` plus a fallback so `//v1/...` style paths still reach the
    /// proxy handler, which normalizes them.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/v1/{*path}", any(proxy_handler))
            .fallback(proxy_handler)
            .with_state(self.state.clone())
    }

    pub fn state(&self) -> Arc<CoreState> {
        self.state.clone()
    }
}
