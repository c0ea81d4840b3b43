//! Logging in with a university Google account.

use std::sync::Arc;

use axum::extract::Query;
use axum::response::Response;
use axum::Extension;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::user::User;
use crate::oauth::{self, CallbackParams, IdentityProvider, OAuthError};
use crate::outcome::{Flash, Outcome};
use crate::routes::accounts::NextParam;
use crate::routes::session::{Session, NEXT_KEY, OAUTH_STATE_KEY};
use crate::routes::{respond, safe_next};
use crate::state::AppState;

const LOGIN_FAILED: &str = "An error occurred during login, please try again later.";
const BAD_SESSION: &str = "Something is wrong with your session, please refresh the page.";

fn provider(state: &AppState) -> AppResult<&dyn IdentityProvider> {
    state
        .identity
        .as_deref()
        .ok_or_else(|| AppError::configuration("Google OAuth2 is not configured"))
}

fn already_logged_in() -> Outcome<()> {
    Outcome::redirect_with("/", Flash::warning("You are already logged in."))
}

/// Sends the browser to the provider's consent screen.
pub async fn begin(
    Extension(state): Extension<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Query(params): Query<NextParam>,
) -> Response {
    let outcome = start_login(&state, &session, params)
        .await
        .unwrap_or_else(Outcome::from);
    respond(&session, outcome).await
}

async fn start_login(
    state: &AppState,
    session: &Session,
    params: NextParam,
) -> AppResult<Outcome<()>> {
    if session.current_user().await?.is_some() {
        return Ok(already_logged_in());
    }

    let provider = provider(state)?;
    let login_state = oauth::new_state();
    session.set(OAUTH_STATE_KEY, &login_state).await?;
    if let Some(next) = safe_next(params.next()) {
        session.set(NEXT_KEY, &next).await?;
    }

    Ok(Outcome::redirect(provider.authorization_url(&login_state)?))
}

/// Where the provider sends the browser back to.
pub async fn callback(
    Extension(state): Extension<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let outcome = finish_login(&state, &session, params)
        .await
        .unwrap_or_else(Outcome::from);
    respond(&session, outcome).await
}

async fn finish_login(
    state: &AppState,
    session: &Session,
    params: CallbackParams,
) -> AppResult<Outcome<()>> {
    let next = safe_next(session.pop(NEXT_KEY).await?.as_deref())
        .unwrap_or_else(|| "/".to_owned());
    if session.current_user().await?.is_some() {
        return Ok(already_logged_in());
    }

    let provider = provider(state)?;
    let expected_state = session.pop(OAUTH_STATE_KEY).await?;
    let profile = match oauth::complete_login(provider, expected_state.as_deref(), &params).await {
        Ok(profile) => profile,
        Err(OAuthError::StateMismatch) => {
            let key = session.key().await;
            warn!(session = %key, "login callback state did not match");
            return Ok(Outcome::redirect_with("/", Flash::error(BAD_SESSION)));
        }
        Err(err) => {
            warn!("login through the identity provider failed: {err}");
            return Ok(Outcome::redirect_with("/", Flash::warning(LOGIN_FAILED)));
        }
    };

    let user = match User::oauth_provision(
        &profile.email,
        &profile.given_name,
        &profile.family_name,
        &state.config.email_domains,
        state.store.as_ref(),
    )
    .await
    {
        Ok(user) if user.can_authenticate() => user,
        Ok(_) | Err(AppError::Validation(_)) => {
            warn!(email = %profile.email, "refused login through the identity provider");
            return Ok(Outcome::redirect_with("/", Flash::warning(LOGIN_FAILED)));
        }
        Err(err) => return Err(err),
    };

    session.log_in(&user).await?;
    info!(user = %user.id, "logged in through the identity provider");

    Ok(Outcome::redirect_with(
        next,
        Flash::success(format!("You have been logged in, {}.", user.short_name())),
    ))
}
