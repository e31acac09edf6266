use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use relay_protocol::chat::{is_chat_path, is_moderation_path, payload_model};

use crate::accounts::{Account, AccountStore};
use crate::error::GatewayError;
use crate::moderation::{ModerationGate, Verdict};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolePricing {
    /// Cost multiplier applied to every request of this role.
    pub bonus: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pricing {
    /// Cost of any request that has no dedicated price.
    pub other: i64,
    pub chat_models: HashMap<String, i64>,
    pub roles: HashMap<String, RolePricing>,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            other: 10,
            chat_models: HashMap::new(),
            roles: HashMap::new(),
        }
    }
}

impl Pricing {
    pub fn cost(&self, path: &str, model: Option<&str>, role: &str) -> i64 {
        let base = if is_chat_path(path) {
            model
                .and_then(|m| self.chat_models.get(m).copied())
                .unwrap_or(self.other)
        } else {
            self.other
        };
        let bonus = self.roles.get(role).map_or(1.0, |r| r.bonus);
        (base as f64 * bonus).round() as i64
    }
}

/// A request that passed every pre-flight check.
#[derive(Debug, Clone)]
pub struct Admitted {
    pub account: Account,
    pub credits_cost: i64,
    /// Payload with `stream` made explicit on chat paths.
    pub payload: JsonValue,
}

/// Authentication, moderation, pricing and the credit check, in that order.
pub struct Admission {
    accounts: Arc<dyn AccountStore>,
    moderation: Arc<ModerationGate>,
    pricing: ArcSwap<Pricing>,
}

impl Admission {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        moderation: Arc<ModerationGate>,
        pricing: Pricing,
    ) -> Self {
        Self {
            accounts,
            moderation,
            pricing: ArcSwap::from_pointee(pricing),
        }
    }

    pub fn replace_pricing(&self, pricing: Pricing) {
        self.pricing.store(Arc::new(pricing));
    }

    pub async fn admit(
        &self,
        authorization: Option<&str>,
        path: &str,
        mut payload: JsonValue,
    ) -> Result<Admitted, GatewayError> {
        let api_key = bearer_token(authorization).ok_or(GatewayError::MissingApiKey)?;
        let account = self
            .accounts
            .lookup(api_key)
            .await
            .filter(|a| a.active)
            .ok_or(GatewayError::InvalidApiKey)?;
        if let Some(reason) = account.ban_reason.as_ref().filter(|r| !r.is_empty()) {
            return Err(GatewayError::AccountBanned {
                reason: reason.clone(),
            });
        }

        if !is_moderation_path(path)
            && let Verdict::Blocked { reason } = self.moderation.check_payload(&payload).await
        {
            return Err(GatewayError::PolicyViolation { reason });
        }

        let credits_cost = self
            .pricing
            .load()
            .cost(path, payload_model(&payload), &account.role);
        if account.credits < credits_cost {
            return Err(GatewayError::NotEnoughCredits {
                required: credits_cost,
                available: account.credits,
            });
        }

        if is_chat_path(path)
            && let Some(map) = payload.as_object_mut()
            && !map.get("stream").is_some_and(|v| v.as_bool() == Some(true))
        {
            map.insert("stream".to_string(), JsonValue::Bool(false));
        }

        Ok(Admitted {
            account,
            credits_cost,
            payload,
        })
    }
}

fn bearer_token(authorization: Option<&str>) -> Option<&str> {
    let token = authorization?.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}
