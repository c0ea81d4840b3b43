use async_graphql::{Context, Object, Result, ResultExt, ID};

use crate::graphql::guards::{LoggedIn, Staff};
use crate::graphql::input::parse_id;
use crate::graphql::app_state;
use crate::models::event::Event;
use crate::models::money::{Product, Transaction, TransactionCategory};
use crate::models::sig::Sig;
use crate::models::user::{User, UserFilter};

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// The user making the request, if logged in
    pub async fn user(&self, ctx: &Context<'_>) -> Option<User> {
        ctx.data_opt::<User>().cloned()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn users(
        &self,
        ctx: &Context<'_>,
        email: Option<String>,
        is_active: Option<bool>,
        is_staff: Option<bool>,
        is_superuser: Option<bool>,
    ) -> Result<Vec<User>> {
        let filter = UserFilter {
            email,
            is_active,
            is_staff,
            is_superuser,
        };
        User::all(&filter, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn user_by_id(&self, ctx: &Context<'_>, id: ID) -> Result<User> {
        let id = parse_id(&id, "id").extend()?;
        User::with_id(id, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    /// Every event, earliest first
    #[graphql(guard = "LoggedIn")]
    pub async fn events(&self, ctx: &Context<'_>) -> Result<Vec<Event>> {
        Event::all(app_state(ctx).store.as_ref()).await.extend()
    }

    /// Events that haven't expired yet, soonest first
    #[graphql(guard = "LoggedIn")]
    pub async fn upcoming_events(
        &self,
        ctx: &Context<'_>,
        #[graphql(default = 10)] max_count: u32,
    ) -> Result<Vec<Event>> {
        Event::list_upcoming(max_count as usize, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn event(&self, ctx: &Context<'_>, id: ID) -> Result<Event> {
        let id = parse_id(&id, "id").extend()?;
        Event::with_id(id, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn sigs(&self, ctx: &Context<'_>, is_active: Option<bool>) -> Result<Vec<Sig>> {
        Sig::all(is_active, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn sig(&self, ctx: &Context<'_>, id: String) -> Result<Sig> {
        Sig::get_by_id(&id, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn products(&self, ctx: &Context<'_>) -> Result<Vec<Product>> {
        Product::all(app_state(ctx).store.as_ref()).await.extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn product(&self, ctx: &Context<'_>, id: ID) -> Result<Product> {
        let id = parse_id(&id, "id").extend()?;
        Product::with_id(id, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn categories(&self, ctx: &Context<'_>) -> Result<Vec<TransactionCategory>> {
        TransactionCategory::all(app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn category(&self, ctx: &Context<'_>, id: ID) -> Result<TransactionCategory> {
        let id = parse_id(&id, "id").extend()?;
        TransactionCategory::with_id(id, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    /// The whole ledger, newest first
    #[graphql(guard = "Staff")]
    pub async fn transactions(&self, ctx: &Context<'_>) -> Result<Vec<Transaction>> {
        Transaction::all(app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    #[graphql(guard = "Staff")]
    pub async fn transaction(&self, ctx: &Context<'_>, id: ID) -> Result<Transaction> {
        let id = parse_id(&id, "id").extend()?;
        Transaction::with_id(id, app_state(ctx).store.as_ref())
            .await
            .extend()
    }
}
