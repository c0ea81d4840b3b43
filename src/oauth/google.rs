use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::{IdentityProvider, OAuthError, Profile, SCOPES};
use crate::config::GoogleConfig;
use crate::error::{AppError, AppResult};

const AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const USERINFO_ENDPOINT: &str = "https://openidconnect.googleapis.com/v1/userinfo";

pub struct GoogleProvider {
    client: Client,
    config: GoogleConfig,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl GoogleProvider {
    pub fn new(config: GoogleConfig, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::configuration(format!("failed to build HTTP client: {err}")))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn authorization_url(&self, state: &str) -> AppResult<String> {
        let mut url = Url::parse(AUTHORIZATION_ENDPOINT)
            .map_err(|err| AppError::configuration(err.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("scope", &SCOPES.join(" "))
                .append_pair("state", state)
                .append_pair("access_type", "offline")
                .append_pair("include_granted_scopes", "true")
                .append_pair("prompt", "select_account");
            if let Some(domain) = &self.config.hosted_domain {
                query.append_pair("hd", domain);
            }
        }

        Ok(url.into())
    }

    async fn exchange_code_for_profile(&self, code: &str) -> Result<Profile, OAuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        let response = self
            .client
            .post(TOKEN_ENDPOINT)
            .form(&params)
            .send()
            .await
            .map_err(|err| OAuthError::Connection(err.to_string()))?;
        if !response.status().is_success() {
            return Err(OAuthError::Provider(format!(
                "token exchange returned {}",
                response.status()
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| OAuthError::Provider(err.to_string()))?;

        let response = self
            .client
            .get(USERINFO_ENDPOINT)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|err| OAuthError::Connection(err.to_string()))?;
        if !response.status().is_success() {
            return Err(OAuthError::Provider(format!(
                "user info returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|err| OAuthError::Provider(err.to_string()))
    }
}
