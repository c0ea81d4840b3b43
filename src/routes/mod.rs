//! The site's pages and the GraphQL endpoint.
//!
//! Page handlers do their work in a function returning
//! `AppResult<Outcome<_>>`, and [respond] turns that into a response:
//! redirects carry their flash through the session, and errors render the
//! error page with the status their kind calls for.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, get_service, post};
use axum::{middleware, Extension, Router};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::graphql::build_schema;
use crate::outcome::Outcome;
use crate::state::AppState;
use crate::templates::{render_with_status, ErrorPage, Nav};

pub mod accounts;
pub mod api;
pub mod events;
pub mod home;
pub mod payments;
pub mod session;
pub mod social_auth;

use self::session::Session;

pub fn router(state: Arc<AppState>) -> Router {
    let media = get_service(ServeDir::new(&state.config.media.root)).handle_error(
        |err: std::io::Error| async move {
            tracing::error!("failed to serve media: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "server error")
        },
    );
    let api = Router::new()
        .route("/web-api", get(api::playground).post(api::query))
        .layer(CorsLayer::permissive());

    Router::new()
        .route("/", get(home::index))
        .route(
            "/accounts/login",
            get(accounts::login_page).post(accounts::login),
        )
        .route("/accounts/logout", get(accounts::logout))
        .route("/events/", get(events::list))
        .route(
            "/events/create",
            get(events::create_page).post(events::create),
        )
        .route(
            "/payments/membership",
            get(payments::membership_page).post(payments::purchase_membership),
        )
        .route(
            "/payments/productHandler/:id",
            post(payments::purchase_product),
        )
        .route("/social-auth/google", get(social_auth::begin))
        .route("/social-auth/google/callback", get(social_auth::callback))
        .merge(api)
        .nest("/media_files", media)
        .layer(middleware::from_fn(session::load_session))
        .layer(Extension(build_schema()))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

/// Sends the browser where the handler decided, or shows the error page.
pub async fn respond<T: IntoResponse>(session: &Session, outcome: Outcome<T>) -> Response {
    match outcome {
        Outcome::Success(body) => body.into_response(),
        Outcome::Redirect { target, flash } => {
            if let Some(flash) = flash {
                if let Err(err) = session.flash(flash).await {
                    err.log();
                }
            }
            Redirect::to(&target).into_response()
        }
        Outcome::ClientError { status, message } | Outcome::ServerError { status, message } => {
            error_page(session, status, message).await
        }
    }
}

async fn error_page(session: &Session, status: StatusCode, message: String) -> Response {
    let user = session.current_user().await.ok().flatten();
    let flashes = session.take_flashes().await.unwrap_or_default();
    let page = ErrorPage {
        nav: Nav::new(user.as_ref()),
        flashes,
        status: status.as_u16(),
        message: message.clone(),
    };

    match render_with_status(status, &page) {
        Ok(response) => response,
        Err(err) => {
            err.log();
            (status, message).into_response()
        }
    }
}

/// Only same-site paths are followed after logging in.
pub fn safe_next(next: Option<&str>) -> Option<String> {
    next.map(str::trim)
        .filter(|next| next.starts_with('/') && !next.starts_with("//") && !next.contains('\\'))
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_must_stay_on_the_site() {
        assert_eq!(safe_next(Some("/events/")).as_deref(), Some("/events/"));
        assert_eq!(safe_next(Some("//evil.example")), None);
        assert_eq!(safe_next(Some("https://evil.example")), None);
        assert_eq!(safe_next(Some("/\\evil.example")), None);
        assert_eq!(safe_next(None), None);
    }
}
