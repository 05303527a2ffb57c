//! Payment intent gateway.
//!
//! The API never touches card data: it asks the gateway for a payment intent and hands
//! the client secret back to the browser, which confirms the charge directly.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::GatewayConfig;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, amount_cents: u64) -> Result<PaymentIntent, GatewayError>;
}

/// Converts a price in currency units to integer cents. `None` for non-positive or
/// non-finite prices.
pub fn amount_in_cents(price: f64) -> Option<u64> {
    if !price.is_finite() || price <= 0.0 {
        return None;
    }
    let cents = (price * 100.0).round();
    if cents < 1.0 || cents >= u64::MAX as f64 {
        return None;
    }
    Some(cents as u64)
}

/// Stripe-compatible `/v1/payment_intents` client.
#[derive(Debug, Clone)]
pub struct StripeGateway {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
    currency: String,
}

impl StripeGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("summer-camp/0.1 (payment intents)")
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            currency: config.currency.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(&self, amount_cents: u64) -> Result<PaymentIntent, GatewayError> {
        let url = format!("{}/v1/payment_intents", self.base_url);
        let form = [
            ("amount", amount_cents.to_string()),
            ("currency", self.currency.clone()),
            ("payment_method_types[]", String::from("card")),
        ];

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", uuid::Uuid::new_v4().to_string())
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "payment intent rejected");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let intent: PaymentIntent = response.json().await?;
        debug!(intent = %intent.id, amount_cents, "payment intent created");
        Ok(intent)
    }
}

#[cfg(test)]
mod tests {
    use super::amount_in_cents;

    #[test]
    fn prices_round_to_whole_cents() {
        assert_eq!(amount_in_cents(40.0), Some(4000));
        assert_eq!(amount_in_cents(19.99), Some(1999));
        assert_eq!(amount_in_cents(2.5), Some(250));
    }

    #[test]
    fn invalid_prices_have_no_amount() {
        assert_eq!(amount_in_cents(0.0), None);
        assert_eq!(amount_in_cents(-5.0), None);
        assert_eq!(amount_in_cents(f64::NAN), None);
        assert_eq!(amount_in_cents(f64::INFINITY), None);
        assert_eq!(amount_in_cents(0.001), None);
    }
}
