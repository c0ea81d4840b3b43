use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Charge, ChargeRequest, GatewayError, PaymentGateway};
use crate::config::StripeConfig;
use crate::error::{AppError, AppResult};

/// Charges cards through Stripe's `/v1/charges` endpoint.
pub struct StripeGateway {
    client: Client,
    api_base: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct ChargeResponse {
    id: String,
    customer: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

impl StripeGateway {
    /// Builds a client with the configured timeout. Returns `None` when no
    /// private key is configured, so purchases report a misconfiguration.
    pub fn from_config(config: &StripeConfig) -> AppResult<Option<Self>> {
        match &config.private_key {
            Some(secret_key) => {
                Self::new(&config.api_base, secret_key, config.timeout).map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn new(api_base: &str, secret_key: &str, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::configuration(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_owned(),
            secret_key: secret_key.to_owned(),
        })
    }
}

/// Sorts a failed response into the error kinds callers act on.
fn classify(status: StatusCode, body: &str) -> GatewayError {
    let error = serde_json::from_str::<ErrorResponse>(body).ok().map(|r| r.error);
    let kind = error.as_ref().and_then(|e| e.kind.clone()).unwrap_or_default();
    let message = error
        .and_then(|e| e.message)
        .unwrap_or_else(|| format!("unexpected response with status {status}"));

    if kind == "card_error" || status == StatusCode::PAYMENT_REQUIRED {
        GatewayError::Card(message)
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        GatewayError::Authentication(message)
    } else {
        GatewayError::Api(message)
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_charge(&self, request: ChargeRequest) -> Result<Charge, GatewayError> {
        let amount = request.amount.cents().to_string();
        let params = [
            ("amount", amount.as_str()),
            ("currency", request.currency.as_str()),
            ("description", request.description.as_str()),
            ("source", request.source.as_str()),
        ];

        let response = self
            .client
            .post(format!("{}/v1/charges", self.api_base))
            .basic_auth(&self.secret_key, Some(""))
            .form(&params)
            .send()
            .await
            .map_err(|err| {
                warn!(timeout = err.is_timeout(), "payment gateway request failed: {err}");
                GatewayError::Connection(err.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| GatewayError::Connection(err.to_string()))?;
        if !status.is_success() {
            return Err(classify(status, &body));
        }

        let charge: ChargeResponse = serde_json::from_str(&body)
            .map_err(|err| GatewayError::Api(format!("unreadable charge response: {err}")))?;
        debug!(charge = %charge.id, "created charge");

        Ok(Charge {
            id: charge.id,
            customer: charge.customer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declines_are_card_errors() {
        let body = r#"{"error": {"type": "card_error", "code": "card_declined", "message": "Your card was declined."}}"#;

        assert_eq!(
            classify(StatusCode::PAYMENT_REQUIRED, body),
            GatewayError::Card("Your card was declined.".to_owned())
        );
    }

    #[test]
    fn bad_keys_are_authentication_errors() {
        let body = r#"{"error": {"type": "invalid_request_error", "message": "Invalid API Key provided"}}"#;

        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, body),
            GatewayError::Authentication(_)
        ));
    }

    #[test]
    fn anything_else_is_an_api_error() {
        let error = classify(StatusCode::INTERNAL_SERVER_ERROR, "<html>oops</html>");

        assert!(matches!(error, GatewayError::Api(_)));
        assert!(!error.is_recoverable());
    }

    #[test]
    fn missing_key_means_no_gateway() {
        let config = StripeConfig {
            public_key: Some("pk_test".to_owned()),
            private_key: None,
            api_base: "https://api.stripe.com".to_owned(),
            timeout: Duration::from_secs(10),
        };

        assert!(StripeGateway::from_config(&config).unwrap().is_none());
    }
}
