//! Deployment settings, read once from the environment at start-up.

use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::models::user::EmailDomains;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
pub const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
pub const DEFAULT_GATEWAY_TIMEOUT_SECS: &str = "10";
pub const DEFAULT_MAX_HOME_FLIER_COUNT: &str = "2";
pub const DEFAULT_MEDIA_ROOT: &str = "media_files";
pub const DEFAULT_FLIERS_PATH: &str = "fliers";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub email_domains: EmailDomains,
    pub stripe: StripeConfig,
    pub google: Option<GoogleConfig>,
    pub max_home_flier_count: usize,
    pub media: MediaConfig,
}

#[derive(Clone)]
pub struct StripeConfig {
    pub public_key: Option<String>,
    pub private_key: Option<String>,
    pub api_base: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub hosted_domain: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub root: PathBuf,
    pub fliers_path: String,
}

impl Config {
    /// Loads settings from the environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let email_domains = EmailDomains::from_setting(optional("ENFORCED_EMAIL_DOMAINS").as_deref());
        let google = match (
            optional("GOOGLE_CLIENT_ID"),
            optional("GOOGLE_CLIENT_SECRET"),
            optional("GOOGLE_REDIRECT_URI"),
        ) {
            (Some(client_id), Some(client_secret), Some(redirect_uri)) => Some(GoogleConfig {
                client_id,
                client_secret,
                redirect_uri,
                hosted_domain: optional("GOOGLE_HOSTED_DOMAIN")
                    .or_else(|| email_domains.first().map(str::to_owned)),
            }),
            _ => {
                warn!("Google OAuth2 settings incomplete, social login is disabled");
                None
            }
        };

        Ok(Self {
            bind_address: parse_or("BIND_ADDRESS", DEFAULT_BIND_ADDRESS)?,
            database_url: env::var("DATABASE_URL").context("No database URL provided")?,
            email_domains,
            stripe: StripeConfig {
                public_key: optional("STRIPE_PUB_KEY"),
                private_key: optional("STRIPE_PRIV_KEY"),
                api_base: optional("STRIPE_API_BASE")
                    .unwrap_or_else(|| DEFAULT_STRIPE_API_BASE.to_owned()),
                timeout: Duration::from_secs(parse_or(
                    "GATEWAY_TIMEOUT_SECS",
                    DEFAULT_GATEWAY_TIMEOUT_SECS,
                )?),
            },
            google,
            max_home_flier_count: parse_or("MAX_HOME_FLIER_COUNT", DEFAULT_MAX_HOME_FLIER_COUNT)?,
            media: MediaConfig {
                root: PathBuf::from(
                    optional("MEDIA_ROOT").unwrap_or_else(|| DEFAULT_MEDIA_ROOT.to_owned()),
                ),
                fliers_path: optional("FLIERS_PATH")
                    .unwrap_or_else(|| DEFAULT_FLIERS_PATH.to_owned()),
            },
        })
    }
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("public_key", &self.public_key)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl std::fmt::Debug for GoogleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("hosted_domain", &self.hosted_domain)
            .finish()
    }
}

/// Unset and blank variables are both treated as absent.
fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_or<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = optional(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_owned()
    });

    raw.parse()
        .map_err(|err| anyhow::anyhow!("Invalid {key} value `{raw}`: {err}"))
}
