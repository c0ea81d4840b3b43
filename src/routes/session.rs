//! Cookie-backed sessions.
//!
//! The cookie only carries a random key; everything else lives in the
//! store's `session_values` so it can be read from any handler. Keys the
//! store doesn't know are never adopted, and the key changes whenever the
//! logged-in user does.

use std::sync::Arc;

use axum::headers::{Cookie, HeaderMapExt};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{Store, SESSION_LIFETIME};
use crate::error::{AppError, AppResult};
use crate::models::user::User;
use crate::outcome::Flash;
use crate::state::AppState;
use crate::util::current_time;

pub const SESSION_COOKIE: &str = "acm_session";

const USER_KEY: &str = "user_id";
const FLASHES_KEY: &str = "flashes";
pub const OAUTH_STATE_KEY: &str = "oauth_state";
pub const NEXT_KEY: &str = "next";

struct SessionKey {
    value: String,
    /// The browser doesn't have this key yet.
    unsent: bool,
}

#[derive(Clone)]
pub struct Session {
    key: Arc<RwLock<SessionKey>>,
    store: Arc<dyn Store>,
}

impl Session {
    /// A session the browser already holds the key for.
    pub fn new(key: impl Into<String>, store: Arc<dyn Store>) -> Self {
        Self::with_key(key.into(), false, store)
    }

    /// A brand new session, whose key still has to be sent to the browser.
    pub fn start(store: Arc<dyn Store>) -> Self {
        Self::with_key(new_session_key(), true, store)
    }

    fn with_key(value: String, unsent: bool, store: Arc<dyn Store>) -> Self {
        Self {
            key: Arc::new(RwLock::new(SessionKey { value, unsent })),
            store,
        }
    }

    pub async fn key(&self) -> String {
        self.key.read().await.value.clone()
    }

    /// The key to set as the cookie, if the browser doesn't have it yet.
    pub async fn unsent_key(&self) -> Option<String> {
        let key = self.key.read().await;
        key.unsent.then(|| key.value.clone())
    }

    pub async fn get(&self, key: &str) -> AppResult<Option<String>> {
        self.store
            .session_get(&self.key().await, key, fresh_after())
            .await
    }

    pub async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.store
            .session_set(&self.key().await, key, value, current_time())
            .await
    }

    pub async fn pop(&self, key: &str) -> AppResult<Option<String>> {
        self.store
            .session_pop(&self.key().await, key, fresh_after())
            .await
    }

    /// The logged-in user, if the stored id still names an active account.
    pub async fn current_user(&self) -> AppResult<Option<User>> {
        match self.get(USER_KEY).await? {
            Some(id) => User::lookup_by_id(&id, self.store.as_ref()).await,
            None => Ok(None),
        }
    }

    /// Logs `user` in under a fresh key, carrying over what was stored, and
    /// clears out expired values.
    pub async fn log_in(&self, user: &User) -> AppResult<()> {
        self.renew().await?;
        self.set(USER_KEY, &user.id.to_string()).await?;

        let swept = self.store.session_sweep(fresh_after()).await?;
        if swept > 0 {
            info!(swept, "removed expired session values");
        }

        Ok(())
    }

    /// Forgets everything stored for this browser and starts over under a
    /// fresh key.
    pub async fn log_out(&self) -> AppResult<()> {
        let mut key = self.key.write().await;
        self.store.session_clear(&key.value).await?;
        key.value = new_session_key();
        key.unsent = true;

        Ok(())
    }

    async fn renew(&self) -> AppResult<()> {
        let mut key = self.key.write().await;
        let renewed = new_session_key();
        self.store.session_rename(&key.value, &renewed).await?;
        key.value = renewed;
        key.unsent = true;

        Ok(())
    }

    /// Queues a message for the next page this browser renders.
    pub async fn flash(&self, flash: Flash) -> AppResult<()> {
        let mut flashes = self.read_flashes(self.get(FLASHES_KEY).await?).await;
        flashes.push(flash);
        let encoded = serde_json::to_string(&flashes)
            .map_err(|err| AppError::configuration(format!("failed to encode flashes: {err}")))?;

        self.set(FLASHES_KEY, &encoded).await
    }

    /// Returns the queued messages and forgets them.
    pub async fn take_flashes(&self) -> AppResult<Vec<Flash>> {
        Ok(self.read_flashes(self.pop(FLASHES_KEY).await?).await)
    }

    async fn read_flashes(&self, raw: Option<String>) -> Vec<Flash> {
        match raw {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(flashes) => flashes,
                Err(err) => {
                    let key = self.key().await;
                    warn!(session = %key, "dropping unreadable flashes: {err}");
                    Vec::new()
                }
            },
            None => Vec::new(),
        }
    }
}

/// Values written at or before this moment have expired.
fn fresh_after() -> OffsetDateTime {
    current_time() - SESSION_LIFETIME
}

fn new_session_key() -> String {
    Uuid::new_v4().simple().to_string()
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= 64 && key.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Attaches a [Session] to every request. A browser without a cookie, or
/// with a key the store holds nothing for, gets a new session.
pub async fn load_session<B>(mut request: Request<B>, next: Next<B>) -> Response {
    let state = match request.extensions().get::<Arc<AppState>>() {
        Some(state) => state.clone(),
        None => {
            return AppError::configuration("application state missing from request")
                .into_response()
        }
    };

    let presented = request
        .headers()
        .typed_get::<Cookie>()
        .and_then(|cookie| cookie.get(SESSION_COOKIE).map(str::to_owned))
        .filter(|key| is_valid_key(key));
    let known = match presented {
        Some(key) => match state.store.session_exists(&key, fresh_after()).await {
            Ok(true) => Some(key),
            Ok(false) => None,
            Err(err) => {
                err.log();
                return err.into_response();
            }
        },
        None => None,
    };
    let session = match known {
        Some(key) => Session::new(key, state.store.clone()),
        None => Session::start(state.store.clone()),
    };

    request.extensions_mut().insert(session.clone());
    let mut response = next.run(request).await;

    if let Some(key) = session.unsent_key().await {
        let cookie = format!("{SESSION_COOKIE}={key}; Path=/; HttpOnly; SameSite=Lax");
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(err) => warn!("failed to build session cookie: {err}"),
        }
    }

    response
}
