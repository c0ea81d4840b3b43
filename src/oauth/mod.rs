//! Logging in through an OAuth2 identity provider.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{AppError, AppResult};

mod google;

pub use google::GoogleProvider;

pub const SCOPES: [&str; 3] = ["openid", "email", "profile"];

/// The parts of the provider's user info the site cares about.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Profile {
    pub email: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
}

/// What the provider sends back to the callback.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("the login request could not be verified")]
    StateMismatch,
    #[error("the provider refused the login: {0}")]
    Denied(String),
    #[error("the provider did not return an authorization code")]
    MissingCode,
    #[error("could not reach the identity provider: {0}")]
    Connection(String),
    #[error("the identity provider returned an unexpected response: {0}")]
    Provider(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send the browser to start logging in.
    fn authorization_url(&self, state: &str) -> AppResult<String>;

    /// Trades the callback's code for the user's profile.
    async fn exchange_code_for_profile(&self, code: &str) -> Result<Profile, OAuthError>;
}

/// A fresh, unguessable value for the `state` parameter.
pub fn new_state() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Checks the callback against the state stored when the login started,
/// then fetches the profile. Both states must be present and equal.
pub async fn complete_login(
    provider: &dyn IdentityProvider,
    expected_state: Option<&str>,
    params: &CallbackParams,
) -> Result<Profile, OAuthError> {
    match (expected_state, params.state.as_deref()) {
        (Some(expected), Some(returned)) if !expected.is_empty() && expected == returned => {}
        _ => return Err(OAuthError::StateMismatch),
    }
    if let Some(error) = &params.error {
        return Err(OAuthError::Denied(error.clone()));
    }
    let code = params
        .code
        .as_deref()
        .filter(|code| !code.is_empty())
        .ok_or(OAuthError::MissingCode)?;

    provider.exchange_code_for_profile(code).await
}

impl From<OAuthError> for AppError {
    fn from(error: OAuthError) -> Self {
        match error {
            OAuthError::StateMismatch | OAuthError::Denied(_) | OAuthError::MissingCode => {
                AppError::Forbidden
            }
            OAuthError::Connection(detail) | OAuthError::Provider(detail) => {
                AppError::configuration(format!("identity provider failure: {detail}"))
            }
        }
    }
}
