//! Fixtures and fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use acm_general::config::{Config, MediaConfig, StripeConfig};
use acm_general::db::MemoryStore;
use acm_general::error::AppResult;
use acm_general::gateway::{Charge, ChargeRequest, GatewayError, PaymentGateway};
use acm_general::models::event::{Event, EventFields};
use acm_general::models::membership::MembershipType;
use acm_general::models::money::{Money, Product};
use acm_general::models::sig::{Sig, SigFields};
use acm_general::models::user::{EmailDomains, RegistrationFields, User};
use acm_general::oauth::{IdentityProvider, OAuthError, Profile};
use acm_general::state::AppState;

pub const DOMAIN: &str = "mst.edu";
pub const SIG_ID: &str = "acm";
pub const SEMESTER_COST: i64 = 2000;
pub const YEAR_COST: i64 = 3500;

pub fn domains() -> EmailDomains {
    EmailDomains::new([DOMAIN])
}

pub fn temp_media() -> MediaConfig {
    MediaConfig {
        root: std::env::temp_dir().join(format!("acm-media-{}", Uuid::new_v4())),
        fliers_path: "fliers".to_owned(),
    }
}

pub fn test_config() -> Config {
    Config {
        bind_address: ([127, 0, 0, 1], 0).into(),
        database_url: String::new(),
        email_domains: domains(),
        stripe: StripeConfig {
            public_key: Some("pk_test_123".to_owned()),
            private_key: None,
            api_base: "http://127.0.0.1:9".to_owned(),
            timeout: Duration::from_secs(1),
        },
        google: None,
        max_home_flier_count: 2,
        media: temp_media(),
    }
}

pub fn fields(first_name: &str, last_name: &str) -> RegistrationFields {
    RegistrationFields {
        first_name: first_name.to_owned(),
        last_name: last_name.to_owned(),
        ..RegistrationFields::default()
    }
}

pub async fn register(email: &str, store: &MemoryStore) -> User {
    User::register(email, fields("Joe", "Miner"), &domains(), store)
        .await
        .unwrap()
}

/// A SIG founded by a freshly registered user.
pub async fn sig(id: &str, store: &MemoryStore) -> Sig {
    let founder = register(&format!("{id}-founder@{DOMAIN}"), store).await;
    Sig::create_sig(
        SigFields {
            id: Some(id.to_owned()),
            founder: Some(founder.id),
            description: Some(format!("The {id} SIG")),
            ..SigFields::default()
        },
        store,
    )
    .await
    .unwrap()
}

/// The `acm` SIG with both membership products on sale.
pub async fn membership_store() -> (MemoryStore, Vec<Product>) {
    let store = MemoryStore::new();
    sig(SIG_ID, &store).await;
    let products = MembershipType::seed(
        SIG_ID,
        [
            Money::from_cents(SEMESTER_COST),
            Money::from_cents(YEAR_COST),
        ],
        &store,
    )
    .await
    .unwrap();

    (store, products)
}

pub fn event_fields(title: &str, hosted: OffsetDateTime, expire: OffsetDateTime) -> EventFields {
    EventFields {
        hosting_sig: SIG_ID.to_owned(),
        title: title.to_owned(),
        description: "Snacks provided.".to_owned(),
        location: "CS 209".to_owned(),
        date_hosted: Some(hosted),
        date_expire: Some(expire),
        ..EventFields::default()
    }
}

pub async fn event(
    title: &str,
    hosted: OffsetDateTime,
    expire: OffsetDateTime,
    creator: &User,
    store: &MemoryStore,
) -> AppResult<Event> {
    Event::create_event(creator.id, event_fields(title, hosted, expire), store).await
}

/// A gateway that answers with scripted results and counts its calls.
#[derive(Default)]
pub struct FakeGateway {
    results: Mutex<VecDeque<Result<Charge, GatewayError>>>,
    requests: Mutex<Vec<ChargeRequest>>,
    calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn charging(ids: &[&str]) -> Self {
        let gateway = Self::new();
        for id in ids {
            gateway.push(Ok(charge(id)));
        }
        gateway
    }

    pub fn failing(error: GatewayError) -> Self {
        let gateway = Self::new();
        gateway.push(Err(error));
        gateway
    }

    pub fn push(&self, result: Result<Charge, GatewayError>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChargeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn charge(id: &str) -> Charge {
    Charge {
        id: id.to_owned(),
        customer: Some("cus_test".to_owned()),
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_charge(&self, request: ChargeRequest) -> Result<Charge, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::Api("no scripted result".to_owned())))
    }
}

/// An identity provider that always knows who is logging in.
pub struct FakeIdentity {
    pub profile: Profile,
}

impl FakeIdentity {
    pub fn new(email: &str) -> Self {
        Self {
            profile: Profile {
                email: email.to_owned(),
                given_name: "Grace".to_owned(),
                family_name: "Hopper".to_owned(),
            },
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    fn authorization_url(&self, state: &str) -> AppResult<String> {
        Ok(format!("https://accounts.example.com/auth?state={state}"))
    }

    async fn exchange_code_for_profile(&self, code: &str) -> Result<Profile, OAuthError> {
        if code == "good-code" {
            Ok(self.profile.clone())
        } else {
            Err(OAuthError::Provider(format!("unknown code {code}")))
        }
    }
}

/// Application state over an in-memory store.
pub fn app_state(
    store: Arc<MemoryStore>,
    gateway: Option<Arc<FakeGateway>>,
    identity: Option<FakeIdentity>,
) -> Arc<AppState> {
    Arc::new(AppState::new(
        test_config(),
        store,
        gateway.map(|gateway| gateway as Arc<dyn PaymentGateway>),
        identity.map(|identity| Arc::new(identity) as Arc<dyn IdentityProvider>),
    ))
}
