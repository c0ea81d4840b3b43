use std::sync::Arc;

use axum::extract::{Form, Path};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Extension;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::membership::{
    purchase_membership as buy_membership, purchase_outcome, purchase_product as buy_product,
    PurchaseRequest, MEMBERSHIP_PAGE,
};
use crate::models::money::Product;
use crate::outcome::Outcome;
use crate::routes::respond;
use crate::routes::session::Session;
use crate::state::AppState;
use crate::templates::{render, MembershipOption, MembershipPage, Nav, ProductRow};

/// What the payment widget posts back.
#[derive(Deserialize)]
pub struct PaymentForm {
    #[serde(rename = "stripeToken")]
    stripe_token: Option<String>,
    #[serde(rename = "type", default)]
    membership_type: String,
}

pub async fn membership_page(
    Extension(state): Extension<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Response {
    let outcome = show_membership(&state, &session)
        .await
        .unwrap_or_else(Outcome::from);
    respond(&session, outcome).await
}

async fn show_membership(state: &AppState, session: &Session) -> AppResult<Outcome<Response>> {
    let user = session.current_user().await?;
    let products = Product::all(state.store.as_ref()).await?;
    let page = MembershipPage {
        nav: Nav::new(user.as_ref()),
        flashes: session.take_flashes().await?,
        memberships: MembershipOption::available(&products),
        products: products.iter().map(ProductRow::from).collect(),
        stripe_public_key: state.config.stripe.public_key.clone().unwrap_or_default(),
    };

    Ok(Outcome::Success(render(&page)?))
}

pub async fn purchase_membership(
    Extension(state): Extension<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Form(form): Form<PaymentForm>,
) -> Response {
    let user = match session.current_user().await {
        Ok(user) => user,
        Err(err) => return respond(&session, Outcome::<()>::from(err)).await,
    };
    let request = PurchaseRequest {
        user: user.as_ref(),
        token: form.stripe_token.as_deref(),
    };

    let result = buy_membership(
        request,
        &form.membership_type,
        state.gateway(),
        state.store.as_ref(),
    )
    .await;
    respond(&session, purchase_outcome(&result, MEMBERSHIP_PAGE)).await
}

pub async fn purchase_product(
    Extension(state): Extension<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Form(form): Form<PaymentForm>,
) -> Response {
    let id = match Uuid::parse_str(&id) {
        Ok(id) => id,
        Err(_) => {
            let outcome = Outcome::<()>::client_error(StatusCode::NOT_FOUND, "Page not found");
            return respond(&session, outcome).await;
        }
    };
    let user = match session.current_user().await {
        Ok(user) => user,
        Err(err) => return respond(&session, Outcome::<()>::from(err)).await,
    };
    let request = PurchaseRequest {
        user: user.as_ref(),
        token: form.stripe_token.as_deref(),
    };

    let result = buy_product(request, id, state.gateway(), state.store.as_ref()).await;
    respond(&session, purchase_outcome(&result, MEMBERSHIP_PAGE)).await
}
