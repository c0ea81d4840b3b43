//! The payment gateway cards are charged through.

use async_trait::async_trait;

use crate::models::money::Money;

mod stripe;

pub use self::stripe::StripeGateway;

pub const CURRENCY: &str = "usd";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChargeRequest {
    pub amount: Money,
    pub currency: String,
    pub description: String,
    /// The single-use token from the payment widget.
    pub source: String,
}

impl ChargeRequest {
    pub fn usd(amount: Money, description: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            amount,
            currency: CURRENCY.to_owned(),
            description: description.into(),
            source: source.into(),
        }
    }
}

/// A charge the gateway accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Charge {
    pub id: String,
    pub customer: Option<String>,
}

/// Why a charge failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The gateway couldn't be reached or didn't answer in time.
    #[error("could not reach the payment gateway: {0}")]
    Connection(String),
    /// The card was declined or failed verification.
    #[error("{0}")]
    Card(String),
    /// The gateway rejected our API key.
    #[error("the payment gateway rejected our credentials: {0}")]
    Authentication(String),
    /// Any other failure reported by the gateway.
    #[error("the payment gateway failed: {0}")]
    Api(String),
}

impl GatewayError {
    /// Whether the buyer can fix this by trying again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, GatewayError::Connection(_) | GatewayError::Card(_))
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_charge(&self, request: ChargeRequest) -> Result<Charge, GatewayError>;
}
