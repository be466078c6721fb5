//! Platform webhook endpoints.
//!
//! - `GET /webhooks/:platform?check_str=..` answers the URL ownership challenge
//! - `POST /webhooks/:platform` accepts an encrypted event delivery
//!
//! Both expect `timestamp`, `nonce` and `signature` headers. A delivery is
//! acknowledged once it is queued; processing happens on the event worker.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::api::error::{WebhookError, WebhookResult};
use crate::config::WebhookConfig;
use crate::crypto;
use crate::events::{Envelope, EventWorker};

/// Acknowledgement body the platform expects, byte for byte.
pub const ACKNOWLEDGEMENT: &str = "successfully received callback";

const TIMESTAMP_HEADER: &str = "timestamp";
const NONCE_HEADER: &str = "nonce";
const SIGNATURE_HEADER: &str = "signature";

#[derive(Clone)]
pub struct WebhookState {
    pub config: WebhookConfig,
    pub worker: EventWorker,
}

#[derive(Debug, Deserialize)]
pub struct ChallengeQuery {
    pub check_str: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeliveryBody {
    data: Option<String>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/:platform", get(challenge).post(receive))
        .with_state(state)
}

struct SignedHeaders {
    timestamp: String,
    nonce: String,
    signature: String,
}

impl SignedHeaders {
    fn from_headers(headers: &HeaderMap) -> WebhookResult<Self> {
        Ok(Self {
            timestamp: header(headers, TIMESTAMP_HEADER)?,
            nonce: header(headers, NONCE_HEADER)?,
            signature: header(headers, SIGNATURE_HEADER)?,
        })
    }
}

fn header(headers: &HeaderMap, name: &'static str) -> WebhookResult<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(WebhookError::MissingHeader(name))
}

fn check_platform(state: &WebhookState, platform: &str) -> WebhookResult<()> {
    if platform != state.config.platform {
        return Err(WebhookError::UnknownPlatform(platform.to_string()));
    }
    Ok(())
}

/// URL ownership challenge: returns the decrypted `check_str` verbatim.
async fn challenge(
    State(state): State<WebhookState>,
    Path(platform): Path<String>,
    Query(query): Query<ChallengeQuery>,
    headers: HeaderMap,
) -> WebhookResult<String> {
    check_platform(&state, &platform)?;
    let signed = SignedHeaders::from_headers(&headers)?;
    let check_str = query
        .check_str
        .filter(|s| !s.is_empty())
        .ok_or(WebhookError::MissingField("check_str"))?;
    let token = state.config.token()?;
    let key = state.config.encoding_aes_key()?;

    let plaintext = crypto::verify_webhook_url(
        &check_str,
        &signed.timestamp,
        &signed.nonce,
        &signed.signature,
        token,
        key,
    )
    .map_err(|e| {
        warn!(platform = %platform, "Webhook challenge rejected: {}", e);
        WebhookError::from(e)
    })?;

    info!(platform = %platform, "Webhook URL verified");
    Ok(plaintext)
}

/// Event delivery: verify, decrypt, queue, acknowledge.
async fn receive(
    State(state): State<WebhookState>,
    Path(platform): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult<&'static str> {
    check_platform(&state, &platform)?;
    let signed = SignedHeaders::from_headers(&headers)?;
    let data = serde_json::from_slice::<DeliveryBody>(&body)
        .map_err(|e| WebhookError::MalformedEnvelope(e.to_string()))?
        .data
        .filter(|d| !d.is_empty())
        .ok_or(WebhookError::MissingField("data"))?;
    let token = state.config.token()?;
    let key = state.config.encoding_aes_key()?;

    if !crypto::verify_signature(token, &signed.timestamp, &signed.nonce, &data, &signed.signature) {
        warn!(platform = %platform, nonce = %signed.nonce, "Webhook signature mismatch");
        return Err(WebhookError::SignatureMismatch);
    }

    let plaintext = crypto::decrypt(&data, key).map_err(|e| {
        warn!(platform = %platform, "Failed to decrypt webhook payload: {}", e);
        WebhookError::from(e)
    })?;
    let envelope = Envelope::parse(&plaintext)
        .map_err(|e| WebhookError::MalformedEnvelope(e.to_string()))?;

    debug!(
        event = %envelope.event,
        trace_id = %envelope.trace_id,
        items = envelope.payload.len(),
        "Webhook delivery accepted"
    );

    let (event, trace_id) = (envelope.event.clone(), envelope.trace_id.clone());
    state.worker.submit(envelope).map_err(|e| {
        warn!(event = %event, trace_id = %trace_id, "Failed to queue webhook delivery: {}", e);
        WebhookError::from(e)
    })?;

    Ok(ACKNOWLEDGEMENT)
}
