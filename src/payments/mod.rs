//! Checkout provider integration. Sessions are created against an
//! external payment API over HTTP; completion comes back through the
//! signed webhook in `api::webhooks`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PaymentConfig;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment provider is not configured")]
    NotConfigured,
    #[error("checkout request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("checkout provider returned {status}: {body}")]
    Provider { status: u16, body: String },
}

/// Session creation payload, priced in the smallest currency unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Echoed back in the completion webhook; carries our booking id
    pub client_reference_id: String,
    pub customer_email: String,
    pub product_name: String,
    pub product_description: String,
    pub product_image: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    async fn create_session(&self, request: SessionRequest)
        -> Result<CheckoutSession, PaymentError>;
}

/// Provider speaking to a hosted checkout API with a bearer key.
pub struct HttpCheckoutProvider {
    client: reqwest::Client,
    api_url: String,
    secret_key: Option<String>,
}

impl HttpCheckoutProvider {
    pub fn new(config: &PaymentConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        }
    }
}

#[async_trait]
impl CheckoutProvider for HttpCheckoutProvider {
    async fn create_session(
        &self,
        request: SessionRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let secret_key = self.secret_key.as_ref().ok_or(PaymentError::NotConfigured)?;

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.api_url))
            .bearer_auth(secret_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Provider that records requests and returns a canned session.
    #[derive(Default)]
    pub struct StaticProvider {
        pub fail: bool,
    }

    #[async_trait]
    impl CheckoutProvider for StaticProvider {
        async fn create_session(
            &self,
            request: SessionRequest,
        ) -> Result<CheckoutSession, PaymentError> {
            if self.fail {
                return Err(PaymentError::NotConfigured);
            }
            Ok(CheckoutSession {
                id: format!("cs_test_{}", request.client_reference_id),
                url: Some("https://checkout.example.com/session".to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn provider_without_key_refuses_to_create_sessions() {
        let provider = HttpCheckoutProvider::new(&PaymentConfig::default());
        let request = SessionRequest {
            client_reference_id: "b1".into(),
            customer_email: "user@example.com".into(),
            product_name: "Forest Hiker".into(),
            product_description: "A summary".into(),
            product_image: None,
            amount_cents: 39700,
            currency: "usd".into(),
            success_url: "http://localhost/ok".into(),
            cancel_url: "http://localhost/cancel".into(),
        };
        assert!(matches!(
            provider.create_session(request).await,
            Err(PaymentError::NotConfigured)
        ));
    }

    #[test]
    fn session_request_serializes_reference_id() {
        let request = SessionRequest {
            client_reference_id: "booking-42".into(),
            customer_email: "user@example.com".into(),
            product_name: "Forest Hiker".into(),
            product_description: String::new(),
            product_image: None,
            amount_cents: 100,
            currency: "usd".into(),
            success_url: String::new(),
            cancel_url: String::new(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["client_reference_id"], "booking-42");
        assert_eq!(value["amount_cents"], 100);
    }
}
