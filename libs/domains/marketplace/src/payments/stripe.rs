//! Stripe gateway over the REST API.

use async_trait::async_trait;
use core_config::{ConfigError, env_or_default, env_required};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, error, info};

use super::{ChargeRequest, PaymentError, PaymentGateway, RefundRequest, TransferRequest};

/// Stripe API configuration.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Secret API key.
    pub secret_key: String,
    /// API base URL (defaults to production).
    pub api_url: String,
    /// ISO currency for every amount.
    pub currency: String,
}

impl StripeConfig {
    pub fn new(secret_key: String) -> Self {
        Self {
            secret_key,
            api_url: "https://api.stripe.com/v1".to_string(),
            currency: "usd".to_string(),
        }
    }

    /// Create configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            secret_key: env_required("STRIPE_SECRET_KEY")?,
            api_url: env_or_default("STRIPE_API_URL", "https://api.stripe.com/v1"),
            currency: env_or_default("STRIPE_CURRENCY", "usd"),
        })
    }
}

pub struct StripeGateway {
    config: StripeConfig,
    client: Client,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    async fn post(
        &self,
        path: &str,
        idempotency_key: &str,
        form: &[(String, String)],
    ) -> Result<String, PaymentError> {
        debug!(path, idempotency_key, "Calling Stripe");

        let response = self
            .client
            .post(format!("{}/{}", self.config.api_url, path))
            .bearer_auth(&self.config.secret_key)
            .header("Idempotency-Key", idempotency_key)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let object: StripeObject = response.json().await?;
            info!(path, id = %object.id, "Stripe call succeeded");
            return Ok(object.id);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<StripeErrorEnvelope>(&body)
            .map(|e| e.error)
            .ok();
        error!(path, %status, error = %body, "Stripe call failed");

        Err(match (status, detail) {
            (StatusCode::PAYMENT_REQUIRED, Some(detail)) => PaymentError::Declined(
                detail
                    .decline_code
                    .or(detail.code)
                    .unwrap_or(detail.message),
            ),
            (StatusCode::PAYMENT_REQUIRED, None) => PaymentError::Declined(body),
            (_, Some(detail)) => {
                PaymentError::Gateway(format!("Stripe error ({}): {}", status, detail.message))
            }
            (_, None) => PaymentError::Gateway(format!("Stripe error ({}): {}", status, body)),
        })
    }

    fn metadata_fields(
        metadata: &std::collections::HashMap<String, String>,
    ) -> Vec<(String, String)> {
        metadata
            .iter()
            .map(|(k, v)| (format!("metadata[{}]", k), v.clone()))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct StripeObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: String,
    code: Option<String>,
    decline_code: Option<String>,
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn charge(&self, request: ChargeRequest) -> Result<String, PaymentError> {
        let mut form = vec![
            ("amount".to_string(), request.amount_cents.to_string()),
            ("currency".to_string(), self.config.currency.clone()),
            ("customer".to_string(), request.customer_ref),
            ("payment_method".to_string(), request.payment_method_ref),
            ("off_session".to_string(), "true".to_string()),
            ("confirm".to_string(), "true".to_string()),
        ];
        form.extend(Self::metadata_fields(&request.metadata));
        self.post("payment_intents", &request.idempotency_key, &form)
            .await
    }

    async fn transfer(&self, request: TransferRequest) -> Result<String, PaymentError> {
        let mut form = vec![
            ("amount".to_string(), request.amount_cents.to_string()),
            ("currency".to_string(), self.config.currency.clone()),
            ("destination".to_string(), request.destination_ref),
            ("transfer_group".to_string(), request.transfer_group),
        ];
        form.extend(Self::metadata_fields(&request.metadata));
        self.post("transfers", &request.idempotency_key, &form).await
    }

    async fn refund(&self, request: RefundRequest) -> Result<String, PaymentError> {
        let mut form = vec![("payment_intent".to_string(), request.charge_ref)];
        form.extend(Self::metadata_fields(&request.metadata));
        self.post("refunds", &request.idempotency_key, &form).await
    }

    fn name(&self) -> &'static str {
        "stripe"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stripe_config_new() {
        let config = StripeConfig::new("sk_test_123".to_string());
        assert_eq!(config.api_url, "https://api.stripe.com/v1");
        assert_eq!(config.currency, "usd");
    }

    #[test]
    fn test_stripe_config_requires_secret() {
        temp_env::with_var_unset("STRIPE_SECRET_KEY", || {
            assert!(StripeConfig::from_env().is_err());
        });
    }

    #[test]
    fn test_error_envelope_parses_decline_code() {
        let body = r#"{"error":{"message":"Your card was declined.","code":"card_declined","decline_code":"insufficient_funds"}}"#;
        let envelope: StripeErrorEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(
            envelope.error.decline_code.as_deref(),
            Some("insufficient_funds")
        );
    }
}
