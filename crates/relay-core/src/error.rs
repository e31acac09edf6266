use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;

/// Every failure a client can observe.
///
/// Upstream failures that are retried (rate limits, revoked keys, transport
/// errors) never surface here; they are attempt outcomes inside the transfer
/// loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("No API key given.")]
    MissingApiKey,
    #[error("Invalid API key.")]
    InvalidApiKey,
    #[error("Your account has been banned: {reason}")]
    AccountBanned { reason: String },
    #[error("Not enough credits.")]
    NotEnoughCredits { required: i64, available: i64 },
    #[error("Sorry, your request violates the content policy: {reason}")]
    PolicyViolation { reason: String },
    #[error("Sorry, the API has no working keys anymore.")]
    NoProviderAvailable { model: Option<String> },
    #[error("Sorry, this endpoint does not support this method.")]
    MethodUnsupported { detail: String },
    #[error("Sorry, the provider is not responding. We're possibly getting rate-limited.")]
    AllAttemptsExhausted { attempts: u32 },
    #[error("Invalid path.")]
    InvalidPath,
    #[error("The request body is too large or could not be read.")]
    PayloadTooLarge { limit: usize },
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MissingApiKey
            | GatewayError::InvalidApiKey
            | GatewayError::AccountBanned { .. } => StatusCode::FORBIDDEN,
            GatewayError::NotEnoughCredits { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::PolicyViolation { .. } => StatusCode::BAD_REQUEST,
            GatewayError::NoProviderAvailable { .. } | GatewayError::MethodUnsupported { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::AllAttemptsExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::InvalidPath => StatusCode::NOT_FOUND,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::MissingApiKey => "missing_api_key",
            GatewayError::InvalidApiKey => "invalid_api_key",
            GatewayError::AccountBanned { .. } => "account_banned",
            GatewayError::NotEnoughCredits { .. } => "not_enough_credits",
            GatewayError::PolicyViolation { .. } => "policy_violation",
            GatewayError::NoProviderAvailable { .. } => "no_provider_available",
            GatewayError::MethodUnsupported { .. } => "method_not_supported",
            GatewayError::AllAttemptsExhausted { .. } => "provider_not_responding",
            GatewayError::InvalidPath => "invalid_path",
            GatewayError::PayloadTooLarge { .. } => "payload_too_large",
        }
    }

    pub fn tip(&self) -> String {
        match self {
            GatewayError::MissingApiKey => {
                "Add the header \"Authorization: Bearer <your key>\" to the request.".to_string()
            }
            GatewayError::InvalidApiKey => "Check the key or ask for a new one.".to_string(),
            GatewayError::AccountBanned { .. } => "Contact the staff for an appeal.".to_string(),
            GatewayError::NotEnoughCredits {
                required,
                available,
            } => format!("This request costs {required} credits, you have {available}."),
            GatewayError::PolicyViolation { .. } => {
                "Remove the offending content and try again.".to_string()
            }
            GatewayError::NoProviderAvailable { .. } => {
                "The admins have been messaged automatically.".to_string()
            }
            GatewayError::MethodUnsupported { detail } => detail.clone(),
            GatewayError::AllAttemptsExhausted { .. } => "Please try again later.".to_string(),
            GatewayError::InvalidPath => "Requests must target /v1/...".to_string(),
            GatewayError::PayloadTooLarge { limit } => {
                format!("Request bodies are limited to {} MiB.", limit / (1024 * 1024))
            }
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
                tip: self.tip(),
                status: self.status().as_u16(),
            },
        }
    }

    pub fn to_json_bytes(&self) -> Bytes {
        serde_json::to_vec(&self.body())
            .map(Bytes::from)
            .unwrap_or_else(|_| Bytes::from_static(b"{\"error\":{\"code\":\"internal\"}}"))
    }
}

/// `{"error": {"code", "message", "tip", "status"}}`
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    pub tip: String,
    pub status: u16,
}
