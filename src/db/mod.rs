//! Persistence for the site's entities.
//!
//! The domain models only talk to storage through the repository traits
//! below. [PgStore] backs the running site and [MemoryStore] backs tests
//! and local experiments; both enforce the same uniqueness and reference
//! rules so the domain code behaves identically on either.

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::event::{Event, EventParticipation, EventUpdate, NewEvent};
use crate::models::money::{
    NewProduct, NewTransaction, Product, ProductUpdate, Transaction, TransactionCategory,
};
use crate::models::sig::{NewSig, Sig, SigUpdate};
use crate::models::user::{NewUser, User, UserFilter, UserUpdate};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn user_by_id(&self, id: Uuid) -> AppResult<Option<User>>;

    /// Looks up an already-normalized email.
    async fn user_by_email(&self, email: &str) -> AppResult<Option<User>>;

    async fn users(&self, filter: &UserFilter) -> AppResult<Vec<User>>;

    /// Fails with a conflict if the email is taken.
    async fn insert_user(&self, new_user: NewUser) -> AppResult<User>;

    async fn update_user(&self, id: Uuid, update: UserUpdate) -> AppResult<User>;

    async fn delete_user(&self, id: Uuid) -> AppResult<()>;

    /// Reads and rewrites the expiration in one step, so concurrent
    /// renewals both count.
    async fn extend_membership(
        &self,
        id: Uuid,
        delta: Duration,
        now: OffsetDateTime,
    ) -> AppResult<User>;
}

#[async_trait]
pub trait SigRepository: Send + Sync {
    async fn sig_by_id(&self, id: &str) -> AppResult<Option<Sig>>;

    async fn sigs(&self, is_active: Option<bool>) -> AppResult<Vec<Sig>>;

    async fn insert_sig(&self, new_sig: NewSig) -> AppResult<Sig>;

    async fn update_sig(&self, id: &str, update: SigUpdate) -> AppResult<Sig>;

    async fn delete_sig(&self, id: &str) -> AppResult<()>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn event_by_id(&self, id: Uuid) -> AppResult<Option<Event>>;

    async fn event_by_title(&self, title: &str) -> AppResult<Option<Event>>;

    /// Every event, earliest hosted first.
    async fn events(&self) -> AppResult<Vec<Event>>;

    /// Events not yet expired at `now`, earliest hosted first, at most `limit`.
    async fn upcoming_events(&self, now: OffsetDateTime, limit: usize) -> AppResult<Vec<Event>>;

    async fn count_upcoming_events(&self, now: OffsetDateTime) -> AppResult<usize>;

    async fn insert_event(&self, new_event: NewEvent) -> AppResult<Event>;

    async fn update_event(&self, id: Uuid, update: EventUpdate) -> AppResult<Event>;

    async fn delete_event(&self, id: Uuid) -> AppResult<()>;

    /// Fails with a conflict if the user already joined.
    async fn insert_participation(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<EventParticipation>;

    /// Whether there was a participation to remove.
    async fn delete_participation(&self, event_id: Uuid, user_id: Uuid) -> AppResult<bool>;

    async fn participants(&self, event_id: Uuid) -> AppResult<Vec<User>>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn category_by_id(&self, id: Uuid) -> AppResult<Option<TransactionCategory>>;

    async fn category_by_name(&self, name: &str) -> AppResult<Option<TransactionCategory>>;

    async fn categories(&self) -> AppResult<Vec<TransactionCategory>>;

    async fn insert_category(&self, name: &str) -> AppResult<TransactionCategory>;

    async fn rename_category(&self, id: Uuid, name: &str) -> AppResult<TransactionCategory>;

    async fn delete_category(&self, id: Uuid) -> AppResult<()>;

    async fn product_by_id(&self, id: Uuid) -> AppResult<Option<Product>>;

    async fn product_by_tag(&self, tag: &str) -> AppResult<Option<Product>>;

    async fn products(&self) -> AppResult<Vec<Product>>;

    async fn insert_product(&self, new_product: NewProduct) -> AppResult<Product>;

    async fn update_product(&self, id: Uuid, update: ProductUpdate) -> AppResult<Product>;

    async fn delete_product(&self, id: Uuid) -> AppResult<()>;

    async fn transaction_by_id(&self, id: Uuid) -> AppResult<Option<Transaction>>;

    async fn transaction_by_token(&self, stripe_token: &str) -> AppResult<Option<Transaction>>;

    /// The whole ledger, newest first.
    async fn transactions(&self) -> AppResult<Vec<Transaction>>;

    async fn transactions_for_user(&self, user_id: Uuid) -> AppResult<Vec<Transaction>>;

    /// Fails with a conflict if the token or charge was already recorded.
    async fn insert_transaction(&self, new_transaction: NewTransaction) -> AppResult<Transaction>;

    /// Extends a membership and records its payment together; either both
    /// writes land or neither does.
    async fn record_membership_purchase(
        &self,
        user_id: Uuid,
        delta: Duration,
        now: OffsetDateTime,
        new_transaction: NewTransaction,
    ) -> AppResult<(User, Transaction)>;
}

/// How long a session value lives after it was last written.
pub const SESSION_LIFETIME: Duration = Duration::weeks(2);

/// Per-browser key/value storage behind the session cookie.
///
/// Values written at or before `fresh_after` are treated as gone.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Whether any live value is stored under the session key.
    async fn session_exists(&self, session: &str, fresh_after: OffsetDateTime) -> AppResult<bool>;

    async fn session_get(
        &self,
        session: &str,
        key: &str,
        fresh_after: OffsetDateTime,
    ) -> AppResult<Option<String>>;

    async fn session_set(
        &self,
        session: &str,
        key: &str,
        value: &str,
        now: OffsetDateTime,
    ) -> AppResult<()>;

    /// Removes and returns the value, so it can only be read once.
    async fn session_pop(
        &self,
        session: &str,
        key: &str,
        fresh_after: OffsetDateTime,
    ) -> AppResult<Option<String>>;

    /// Moves every value to a new session key. The old key is left empty.
    async fn session_rename(&self, from: &str, to: &str) -> AppResult<()>;

    async fn session_clear(&self, session: &str) -> AppResult<()>;

    /// Deletes values written at or before `stale_before` and returns how
    /// many went.
    async fn session_sweep(&self, stale_before: OffsetDateTime) -> AppResult<u64>;
}

/// Everything the site needs from storage.
pub trait Store:
    UserRepository + SigRepository + EventRepository + PaymentRepository + SessionStore
{
}

impl<T> Store for T where
    T: UserRepository + SigRepository + EventRepository + PaymentRepository + SessionStore
{
}
