use std::sync::Arc;

use axum::extract::{Form, Query};
use axum::response::Response;
use axum::Extension;
use serde::Deserialize;
use tracing::info;
use url::form_urlencoded;

use crate::error::AppResult;
use crate::models::user::User;
use crate::outcome::{Flash, Outcome};
use crate::routes::session::Session;
use crate::routes::{respond, safe_next};
use crate::state::AppState;
use crate::templates::{render, LoginPage, Nav};

#[derive(Deserialize)]
pub struct NextParam {
    next: Option<String>,
}

impl NextParam {
    pub fn next(&self) -> Option<&str> {
        self.next.as_deref()
    }
}

#[derive(Deserialize)]
pub struct LoginForm {
    email: String,
    password: String,
    next: Option<String>,
}

pub async fn login_page(
    Extension(state): Extension<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Query(params): Query<NextParam>,
) -> Response {
    let outcome = show_login(&state, &session, params.next())
        .await
        .unwrap_or_else(Outcome::from);
    respond(&session, outcome).await
}

async fn show_login(
    state: &AppState,
    session: &Session,
    next: Option<&str>,
) -> AppResult<Outcome<Response>> {
    if session.current_user().await?.is_some() {
        return Ok(Outcome::redirect_with(
            "/",
            Flash::warning("You are already logged in."),
        ));
    }

    let page = LoginPage {
        nav: Nav::new(None),
        flashes: session.take_flashes().await?,
        google_enabled: state.identity.is_some(),
        next: safe_next(next).unwrap_or_else(|| "/".to_owned()),
    };

    Ok(Outcome::Success(render(&page)?))
}

/// Password login, for administrators created from the command line.
pub async fn login(
    Extension(state): Extension<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Form(form): Form<LoginForm>,
) -> Response {
    let outcome = password_login(&state, &session, form)
        .await
        .unwrap_or_else(Outcome::from);
    respond(&session, outcome).await
}

async fn password_login(
    state: &AppState,
    session: &Session,
    form: LoginForm,
) -> AppResult<Outcome<()>> {
    let next = safe_next(form.next.as_deref()).unwrap_or_else(|| "/".to_owned());
    match User::login_is_valid(&form.email, &form.password, state.store.as_ref()).await? {
        Some(user) => {
            session.log_in(&user).await?;
            info!(user = %user.id, "logged in with password");

            Ok(Outcome::redirect_with(
                next,
                Flash::success(format!("You have been logged in, {}.", user.short_name())),
            ))
        }
        None => Ok(Outcome::redirect_with(
            format!(
                "/accounts/login?next={}",
                form_urlencoded::byte_serialize(next.as_bytes()).collect::<String>()
            ),
            Flash::error("Invalid email or password."),
        )),
    }
}

pub async fn logout(Extension(session): Extension<Session>) -> Response {
    let outcome = match session.log_out().await {
        Ok(()) => Outcome::<()>::redirect_with("/", Flash::success("Successfully logged out.")),
        Err(err) => Outcome::from(err),
    };
    respond(&session, outcome).await
}
