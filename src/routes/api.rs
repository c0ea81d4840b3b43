use std::sync::Arc;

use async_graphql::http::{playground_source, GraphQLPlaygroundConfig};
use axum::response::Html;
use axum::{Extension, Json};

use crate::graphql::AppSchema;
use crate::routes::session::Session;
use crate::state::AppState;

pub async fn playground() -> Html<String> {
    Html(playground_source(GraphQLPlaygroundConfig::new("/web-api")))
}

/// Runs a query as whoever the session belongs to.
pub async fn query(
    Extension(state): Extension<Arc<AppState>>,
    Extension(schema): Extension<AppSchema>,
    Extension(session): Extension<Session>,
    Json(request): Json<async_graphql::Request>,
) -> Json<async_graphql::Response> {
    let mut request = request.data(state);
    match session.current_user().await {
        Ok(Some(user)) => request = request.data(user),
        Ok(None) => {}
        Err(err) => err.log(),
    }

    Json(schema.execute(request).await)
}
