use std::sync::Arc;

use axum::response::Response;
use axum::Extension;

use crate::error::AppResult;
use crate::models::event::Event;
use crate::outcome::Outcome;
use crate::routes::respond;
use crate::routes::session::Session;
use crate::state::AppState;
use crate::templates::{render, EventCard, IndexPage, Nav};

/// The homepage, previewing the next few events.
pub async fn index(
    Extension(state): Extension<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Response {
    let outcome = index_page(&state, &session)
        .await
        .unwrap_or_else(Outcome::from);
    respond(&session, outcome).await
}

async fn index_page(state: &AppState, session: &Session) -> AppResult<Outcome<Response>> {
    let store = state.store.as_ref();
    let user = session.current_user().await?;
    let events = Event::list_upcoming(state.config.max_home_flier_count, store).await?;
    let total_upcoming = Event::count_upcoming(store).await?;

    let page = IndexPage {
        nav: Nav::new(user.as_ref()),
        flashes: session.take_flashes().await?,
        events: events.iter().map(EventCard::from).collect(),
        total_upcoming,
    };

    Ok(Outcome::Success(render(&page)?))
}
