//! The GraphQL API under `/web-api`.

use std::sync::Arc;

use async_graphql::{Context, EmptySubscription, ErrorExtensions, Schema};

use crate::error::AppError;
use crate::models::user::User;
use crate::state::AppState;

pub mod guards;
pub mod input;
pub mod mutation;
pub mod query;

use self::mutation::MutationRoot;
use self::query::QueryRoot;

pub const SUCCESS_MESSAGE: &str = "success";

pub type AppSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

pub fn build_schema() -> AppSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription).finish()
}

/// The shared state attached to every request.
pub fn app_state<'c>(ctx: &Context<'c>) -> &'c AppState {
    ctx.data_unchecked::<Arc<AppState>>()
}

pub fn current_user<'c>(ctx: &Context<'c>) -> async_graphql::Result<&'c User> {
    ctx.data_opt::<User>()
        .ok_or_else(|| AppError::Unauthorized.extend())
}
