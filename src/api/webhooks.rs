//! Payment provider webhook. Mounted outside the authenticated router;
//! the HMAC signature on the raw body is the only credential accepted
//! here.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::db::models::settle_booking;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-checkout-signature";

/// Verify the hex HMAC-SHA256 signature over the raw payload.
fn verify_signature(secret: &str, signature_header: &str, payload: &[u8]) -> bool {
    let expected = match hex::decode(signature_header.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: Option<WebhookData>,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: WebhookObject,
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    client_reference_id: Option<String>,
}

/// POST /webhooks/payments
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let secret = state
        .config
        .payments
        .webhook_secret
        .as_ref()
        .ok_or_else(|| ApiError::bad_request("Webhook secret is not configured"))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("Missing webhook signature"))?;

    if !verify_signature(secret, signature, &body) {
        tracing::warn!("Payment webhook signature verification failed");
        return Err(ApiError::bad_request("Invalid webhook signature"));
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request("Invalid webhook payload").with_detail(e.to_string()))?;

    if event.event_type == "checkout.session.completed" {
        let booking_id = event
            .data
            .and_then(|d| d.object.client_reference_id)
            .ok_or_else(|| ApiError::bad_request("Event carries no client reference id"))?;

        if settle_booking(&state.db, &booking_id).await? {
            tracing::info!("Booking {} settled by payment webhook", booking_id);
        } else {
            tracing::warn!("Payment webhook referenced unknown booking {}", booking_id);
        }
    } else {
        tracing::debug!("Ignoring payment webhook event type {}", event.event_type);
    }

    Ok(Json(json!({ "received": true })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_passes() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let signature = sign("whsec_test", payload);
        assert!(verify_signature("whsec_test", &signature, payload));
    }

    #[test]
    fn tampered_payload_fails() {
        let signature = sign("whsec_test", b"original body");
        assert!(!verify_signature("whsec_test", &signature, b"tampered body"));
    }

    #[test]
    fn wrong_secret_fails() {
        let payload = b"body";
        let signature = sign("whsec_test", payload);
        assert!(!verify_signature("whsec_other", &signature, payload));
    }

    #[test]
    fn garbage_signature_fails() {
        assert!(!verify_signature("whsec_test", "not-hex!", b"body"));
    }

    #[test]
    fn completed_event_parses_reference_id() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{"type":"checkout.session.completed",
                "data":{"object":{"client_reference_id":"b-42"}}}"#,
        )
        .unwrap();
        assert_eq!(event.event_type, "checkout.session.completed");
        assert_eq!(
            event.data.unwrap().object.client_reference_id.as_deref(),
            Some("b-42")
        );
    }
}
