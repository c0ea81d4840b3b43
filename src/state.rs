//! The shared state every request handler and resolver can reach.

use std::sync::Arc;

use crate::config::Config;
use crate::db::Store;
use crate::error::AppResult;
use crate::gateway::{PaymentGateway, StripeGateway};
use crate::oauth::{GoogleProvider, IdentityProvider};

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Config,
    /// `None` when no gateway key is configured.
    pub gateway: Option<Arc<dyn PaymentGateway>>,
    /// `None` when the OAuth2 client is not configured.
    pub identity: Option<Arc<dyn IdentityProvider>>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        identity: Option<Arc<dyn IdentityProvider>>,
    ) -> Self {
        Self {
            store,
            config,
            gateway,
            identity,
        }
    }

    /// Builds the real gateway and identity provider from `config`.
    pub fn from_config(config: Config, store: Arc<dyn Store>) -> AppResult<Self> {
        let gateway = StripeGateway::from_config(&config.stripe)?
            .map(|gateway| Arc::new(gateway) as Arc<dyn PaymentGateway>);
        let identity = match &config.google {
            Some(google) => Some(Arc::new(GoogleProvider::new(
                google.clone(),
                config.stripe.timeout,
            )?) as Arc<dyn IdentityProvider>),
            None => None,
        };

        Ok(Self::new(config, store, gateway, identity))
    }

    pub fn gateway(&self) -> Option<&dyn PaymentGateway> {
        self.gateway.as_deref()
    }
}
