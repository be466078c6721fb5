//! Webhook error type with JSON error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::config::MissingSetting;
use crate::crypto::CryptoError;
use crate::events::SubmitError;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),
    #[error(transparent)]
    ConfigurationMissing(#[from] MissingSetting),
    #[error("missing header: {0}")]
    MissingHeader(&'static str),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("failed to decrypt payload: {0}")]
    Decryption(CryptoError),
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("event queue unavailable: {0}")]
    QueueUnavailable(#[from] SubmitError),
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebhookError::UnknownPlatform(_) => StatusCode::NOT_FOUND,
            WebhookError::ConfigurationMissing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WebhookError::MissingHeader(_)
            | WebhookError::MissingField(_)
            | WebhookError::Decryption(_)
            | WebhookError::MalformedEnvelope(_) => StatusCode::BAD_REQUEST,
            WebhookError::SignatureMismatch => StatusCode::UNAUTHORIZED,
            WebhookError::QueueUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<CryptoError> for WebhookError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::SignatureMismatch => WebhookError::SignatureMismatch,
            other => WebhookError::Decryption(other),
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": true,
            "message": self.to_string(),
        }));
        (self.status(), body).into_response()
    }
}

/// Result type for webhook handlers.
pub type WebhookResult<T> = Result<T, WebhookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            WebhookError::from(CryptoError::SignatureMismatch).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            WebhookError::from(CryptoError::EmptyCiphertext).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WebhookError::from(MissingSetting("webhook.token")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            WebhookError::from(SubmitError::Full).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            WebhookError::MissingHeader("nonce").status(),
            StatusCode::BAD_REQUEST
        );
    }
}
