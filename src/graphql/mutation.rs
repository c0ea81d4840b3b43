use async_graphql::{Context, Object, Result, ResultExt, ID};

use crate::error::AppError;
use crate::graphql::guards::{LoggedIn, Staff};
use crate::graphql::input::{
    parse_id, EventUpdateInput, NewEventInput, NewProductInput, NewSigInput,
    NewTransactionInput, NewUserInput, ProductUpdateInput, SigUpdateInput, UserUpdateInput,
};
use crate::graphql::{app_state, current_user, SUCCESS_MESSAGE};
use crate::models::event::{Event, EventParticipation};
use crate::models::membership::MembershipType;
use crate::models::money::{Product, Transaction, TransactionCategory};
use crate::models::sig::Sig;
use crate::models::user::User;

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    /// Registers a new user
    #[graphql(guard = "Staff")]
    pub async fn register_user(&self, ctx: &Context<'_>, new_user: NewUserInput) -> Result<User> {
        let state = app_state(ctx);
        let (email, fields) = new_user.into_fields();
        User::register(&email, fields, &state.config.email_domains, state.store.as_ref())
            .await
            .extend()
    }

    #[graphql(guard = "Staff")]
    pub async fn update_user(
        &self,
        ctx: &Context<'_>,
        id: ID,
        update: UserUpdateInput,
    ) -> Result<User> {
        let state = app_state(ctx);
        let id = parse_id(&id, "id").extend()?;
        User::update(
            id,
            update.into(),
            &state.config.email_domains,
            state.store.as_ref(),
        )
        .await
        .extend()
    }

    #[graphql(guard = "Staff")]
    pub async fn delete_user(&self, ctx: &Context<'_>, id: ID) -> Result<&'static str> {
        let id = parse_id(&id, "id").extend()?;
        User::delete(id, app_state(ctx).store.as_ref())
            .await
            .extend()?;

        Ok(SUCCESS_MESSAGE)
    }

    /// Adds a membership term to a user without charging them, for
    /// payments taken in person
    #[graphql(guard = "Staff")]
    pub async fn extend_membership(
        &self,
        ctx: &Context<'_>,
        id: ID,
        membership_type: String,
    ) -> Result<User> {
        let id = parse_id(&id, "id").extend()?;
        let membership = MembershipType::named(&membership_type)
            .ok_or_else(|| {
                AppError::invalid(
                    "membership_type",
                    format!("`{membership_type}` is not a valid membership type."),
                )
            })
            .extend()?;

        User::extend_membership(id, membership.delta(), app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    /// Creates an event hosted by the current user
    #[graphql(guard = "Staff")]
    pub async fn create_event(&self, ctx: &Context<'_>, new_event: NewEventInput) -> Result<Event> {
        let state = app_state(ctx);
        let user = current_user(ctx)?;
        let (fields, flier) = new_event.into_fields().extend()?;

        Event::create_with_flier(
            user.id,
            fields,
            flier,
            &state.config.media,
            state.store.as_ref(),
        )
        .await
        .extend()
    }

    #[graphql(guard = "Staff")]
    pub async fn update_event(
        &self,
        ctx: &Context<'_>,
        id: ID,
        update: EventUpdateInput,
    ) -> Result<Event> {
        let id = parse_id(&id, "id").extend()?;
        Event::update(id, update.into(), app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    #[graphql(guard = "Staff")]
    pub async fn delete_event(&self, ctx: &Context<'_>, id: ID) -> Result<&'static str> {
        let state = app_state(ctx);
        let id = parse_id(&id, "id").extend()?;
        Event::delete(id, &state.config.media, state.store.as_ref())
            .await
            .extend()?;

        Ok(SUCCESS_MESSAGE)
    }

    /// RSVPs the current user for an event
    #[graphql(guard = "LoggedIn")]
    pub async fn join_event(&self, ctx: &Context<'_>, id: ID) -> Result<&'static str> {
        let user = current_user(ctx)?;
        let id = parse_id(&id, "id").extend()?;
        EventParticipation::join(id, user.id, app_state(ctx).store.as_ref())
            .await
            .extend()?;

        Ok(SUCCESS_MESSAGE)
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn leave_event(&self, ctx: &Context<'_>, id: ID) -> Result<&'static str> {
        let user = current_user(ctx)?;
        let id = parse_id(&id, "id").extend()?;
        EventParticipation::leave(id, user.id, app_state(ctx).store.as_ref())
            .await
            .extend()?;

        Ok(SUCCESS_MESSAGE)
    }

    #[graphql(guard = "Staff")]
    pub async fn create_sig(&self, ctx: &Context<'_>, new_sig: NewSigInput) -> Result<Sig> {
        let fields = new_sig.into_fields().extend()?;
        Sig::create_sig(fields, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    #[graphql(guard = "Staff")]
    pub async fn update_sig(
        &self,
        ctx: &Context<'_>,
        id: String,
        update: SigUpdateInput,
    ) -> Result<Sig> {
        let update = update.into_update().extend()?;
        Sig::update(&id, update, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    #[graphql(guard = "Staff")]
    pub async fn set_sig_chair(&self, ctx: &Context<'_>, id: String, chair: ID) -> Result<Sig> {
        let chair = parse_id(&chair, "chair").extend()?;
        Sig::set_chair(&id, chair, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    #[graphql(guard = "Staff")]
    pub async fn delete_sig(&self, ctx: &Context<'_>, id: String) -> Result<&'static str> {
        Sig::delete(&id, app_state(ctx).store.as_ref())
            .await
            .extend()?;

        Ok(SUCCESS_MESSAGE)
    }

    #[graphql(guard = "Staff")]
    pub async fn create_category(
        &self,
        ctx: &Context<'_>,
        name: String,
    ) -> Result<TransactionCategory> {
        TransactionCategory::create(&name, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    #[graphql(guard = "Staff")]
    pub async fn rename_category(
        &self,
        ctx: &Context<'_>,
        id: ID,
        name: String,
    ) -> Result<TransactionCategory> {
        let id = parse_id(&id, "id").extend()?;
        TransactionCategory::rename(id, &name, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    #[graphql(guard = "Staff")]
    pub async fn delete_category(&self, ctx: &Context<'_>, id: ID) -> Result<&'static str> {
        let id = parse_id(&id, "id").extend()?;
        TransactionCategory::delete(id, app_state(ctx).store.as_ref())
            .await
            .extend()?;

        Ok(SUCCESS_MESSAGE)
    }

    #[graphql(guard = "Staff")]
    pub async fn create_product(
        &self,
        ctx: &Context<'_>,
        new_product: NewProductInput,
    ) -> Result<Product> {
        let new_product = new_product.into_new_product().extend()?;
        Product::create(new_product, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    #[graphql(guard = "Staff")]
    pub async fn update_product(
        &self,
        ctx: &Context<'_>,
        id: ID,
        update: ProductUpdateInput,
    ) -> Result<Product> {
        let id = parse_id(&id, "id").extend()?;
        let update = update.into_update().extend()?;
        Product::update(id, update, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    #[graphql(guard = "Staff")]
    pub async fn delete_product(&self, ctx: &Context<'_>, id: ID) -> Result<&'static str> {
        let id = parse_id(&id, "id").extend()?;
        Product::delete(id, app_state(ctx).store.as_ref())
            .await
            .extend()?;

        Ok(SUCCESS_MESSAGE)
    }

    /// Records a payment taken outside the site. The ledger can't be
    /// edited afterwards.
    #[graphql(guard = "Staff")]
    pub async fn create_transaction(
        &self,
        ctx: &Context<'_>,
        new_transaction: NewTransactionInput,
    ) -> Result<Transaction> {
        let new_transaction = new_transaction.into_new_transaction().extend()?;
        Transaction::create_transaction(new_transaction, app_state(ctx).store.as_ref())
            .await
            .extend()
    }
}
