use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::{EventRepository, PaymentRepository, SessionStore, SigRepository, UserRepository};
use crate::error::{AppError, AppResult};
use crate::models::event::{Event, EventParticipation, EventUpdate, NewEvent};
use crate::models::money::{
    NewProduct, NewTransaction, Product, ProductUpdate, Transaction, TransactionCategory,
};
use crate::models::sig::{NewSig, Sig, SigUpdate};
use crate::models::user::{NewUser, User, UserFilter, UserUpdate};

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// The Postgres-backed store the site runs on.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| AppError::configuration(format!("failed to run migrations: {err}")))
    }
}

/// Turns constraint violations into conflicts the caller can report.
fn constraint_error(error: sqlx::Error, conflict: &str) -> AppError {
    if let sqlx::Error::Database(db_error) = &error {
        match db_error.code().as_deref() {
            Some(UNIQUE_VIOLATION) => return AppError::Conflict(conflict.to_owned()),
            Some(FOREIGN_KEY_VIOLATION) => {
                return AppError::Conflict(format!(
                    "{conflict}: it references or is referenced by another record"
                ))
            }
            _ => {}
        }
    }

    AppError::Database(error)
}

fn found<T>(row: Option<T>, what: impl FnOnce() -> String) -> AppResult<T> {
    row.ok_or_else(|| AppError::not_found(what()))
}

const INSERT_TRANSACTION: &str = "INSERT INTO transactions
    (description, category_id, sig_id, cost, user_id, stripe_token,
     customer_id, coupon_id, subscription_id, charge_id)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    RETURNING *";

fn insert_transaction_query(
    new: NewTransaction,
) -> sqlx::query::QueryAs<'static, sqlx::Postgres, Transaction, sqlx::postgres::PgArguments> {
    sqlx::query_as::<_, Transaction>(INSERT_TRANSACTION)
        .bind(new.description)
        .bind(new.category_id)
        .bind(new.sig_id)
        .bind(new.cost)
        .bind(new.user_id)
        .bind(new.stripe_token)
        .bind(new.customer_id)
        .bind(new.coupon_id)
        .bind(new.subscription_id)
        .bind(new.charge_id)
}

#[async_trait]
impl UserRepository for PgStore {
    async fn user_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn users(&self, filter: &UserFilter) -> AppResult<Vec<User>> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users
             WHERE ($1::text IS NULL OR email = $1)
               AND ($2::bool IS NULL OR (is_active IS DISTINCT FROM false) = $2)
               AND ($3::bool IS NULL OR is_staff = $3)
               AND ($4::bool IS NULL OR is_superuser = $4)
             ORDER BY email",
        )
        .bind(&filter.email)
        .bind(filter.is_active)
        .bind(filter.is_staff)
        .bind(filter.is_superuser)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn insert_user(&self, new_user: NewUser) -> AppResult<User> {
        let conflict = format!("Another user already has the email {}", new_user.email);
        sqlx::query_as::<_, User>(
            "INSERT INTO users
                (email, first_name, last_name, is_active, is_staff, is_superuser, password_hash)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(new_user.email)
        .bind(new_user.first_name)
        .bind(new_user.last_name)
        .bind(new_user.is_active)
        .bind(new_user.is_staff)
        .bind(new_user.is_superuser)
        .bind(new_user.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| constraint_error(err, &conflict))
    }

    async fn update_user(&self, id: Uuid, update: UserUpdate) -> AppResult<User> {
        let row = sqlx::query_as::<_, User>(
            "UPDATE users SET
                email = COALESCE($2, email),
                first_name = COALESCE($3, first_name),
                last_name = COALESCE($4, last_name),
                membership_expiration = CASE WHEN $5 THEN $6 ELSE membership_expiration END,
                is_active = COALESCE($7, is_active),
                is_staff = COALESCE($8, is_staff),
                is_superuser = COALESCE($9, is_superuser)
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(update.email)
        .bind(update.first_name)
        .bind(update.last_name)
        .bind(update.membership_expiration.is_some())
        .bind(update.membership_expiration.flatten())
        .bind(update.is_active)
        .bind(update.is_staff)
        .bind(update.is_superuser)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| constraint_error(err, "Another user already has that email"))?;

        found(row, || format!("user {id}"))
    }

    async fn delete_user(&self, id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|err| constraint_error(err, "This user can't be deleted"))?;

        Ok(())
    }

    async fn extend_membership(
        &self,
        id: Uuid,
        delta: Duration,
        now: OffsetDateTime,
    ) -> AppResult<User> {
        let mut tx = self.pool.begin().await?;
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut tx)
            .await?;
        let user = found(user, || format!("user {id}"))?;

        let user = sqlx::query_as::<_, User>(
            "UPDATE users SET membership_expiration = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(user.extended_expiration(delta, now))
        .fetch_one(&mut tx)
        .await?;
        tx.commit().await?;

        Ok(user)
    }
}

#[async_trait]
impl SigRepository for PgStore {
    async fn sig_by_id(&self, id: &str) -> AppResult<Option<Sig>> {
        sqlx::query_as::<_, Sig>("SELECT * FROM sigs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn sigs(&self, is_active: Option<bool>) -> AppResult<Vec<Sig>> {
        sqlx::query_as::<_, Sig>(
            "SELECT * FROM sigs WHERE ($1::bool IS NULL OR is_active = $1) ORDER BY id",
        )
        .bind(is_active)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn insert_sig(&self, new_sig: NewSig) -> AppResult<Sig> {
        let conflict = format!("A SIG with id {} already exists", new_sig.id);
        sqlx::query_as::<_, Sig>(
            "INSERT INTO sigs (id, is_active, founder_id, chair_id, description)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(new_sig.id)
        .bind(new_sig.is_active)
        .bind(new_sig.founder_id)
        .bind(new_sig.chair_id)
        .bind(new_sig.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| constraint_error(err, &conflict))
    }

    async fn update_sig(&self, id: &str, update: SigUpdate) -> AppResult<Sig> {
        let row = sqlx::query_as::<_, Sig>(
            "UPDATE sigs SET
                chair_id = COALESCE($2, chair_id),
                description = COALESCE($3, description),
                is_active = COALESCE($4, is_active)
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(update.chair_id)
        .bind(update.description)
        .bind(update.is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| constraint_error(err, "The SIG could not be updated"))?;

        found(row, || format!("SIG {id}"))
    }

    async fn delete_sig(&self, id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM sigs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|err| constraint_error(err, "This SIG can't be deleted"))?;

        Ok(())
    }
}

#[async_trait]
impl EventRepository for PgStore {
    async fn event_by_id(&self, id: Uuid) -> AppResult<Option<Event>> {
        sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn event_by_title(&self, title: &str) -> AppResult<Option<Event>> {
        sqlx::query_as::<_, Event>(
            "SELECT * FROM events WHERE title = $1 ORDER BY date_hosted LIMIT 1",
        )
        .bind(title)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn events(&self) -> AppResult<Vec<Event>> {
        sqlx::query_as::<_, Event>("SELECT * FROM events ORDER BY date_hosted")
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn upcoming_events(&self, now: OffsetDateTime, limit: usize) -> AppResult<Vec<Event>> {
        sqlx::query_as::<_, Event>(
            "SELECT * FROM events WHERE date_expire >= $1 ORDER BY date_hosted LIMIT $2",
        )
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn count_upcoming_events(&self, now: OffsetDateTime) -> AppResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE date_expire >= $1")
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn insert_event(&self, new_event: NewEvent) -> AppResult<Event> {
        sqlx::query_as::<_, Event>(
            "INSERT INTO events
                (date_hosted, date_expire, creator_id, hosting_sig, title, description,
                 location, presenter, cost, flier, link)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING *",
        )
        .bind(new_event.date_hosted)
        .bind(new_event.date_expire)
        .bind(new_event.creator_id)
        .bind(new_event.hosting_sig)
        .bind(new_event.title)
        .bind(new_event.description)
        .bind(new_event.location)
        .bind(new_event.presenter)
        .bind(new_event.cost)
        .bind(new_event.flier)
        .bind(new_event.link)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| constraint_error(err, "The event could not be created"))
    }

    async fn update_event(&self, id: Uuid, update: EventUpdate) -> AppResult<Event> {
        let row = sqlx::query_as::<_, Event>(
            "UPDATE events SET
                hosting_sig = COALESCE($2, hosting_sig),
                title = COALESCE($3, title),
                description = COALESCE($4, description),
                location = COALESCE($5, location),
                presenter = CASE WHEN $6 THEN $7 ELSE presenter END,
                cost = COALESCE($8, cost),
                date_hosted = COALESCE($9, date_hosted),
                date_expire = COALESCE($10, date_expire),
                flier = CASE WHEN $11 THEN $12 ELSE flier END,
                link = CASE WHEN $13 THEN $14 ELSE link END
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(update.hosting_sig)
        .bind(update.title)
        .bind(update.description)
        .bind(update.location)
        .bind(update.presenter.is_some())
        .bind(update.presenter.flatten())
        .bind(update.cost)
        .bind(update.date_hosted)
        .bind(update.date_expire)
        .bind(update.flier.is_some())
        .bind(update.flier.flatten())
        .bind(update.link.is_some())
        .bind(update.link.flatten())
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| constraint_error(err, "The event could not be updated"))?;

        found(row, || format!("event {id}"))
    }

    async fn delete_event(&self, id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn insert_participation(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<EventParticipation> {
        sqlx::query_as::<_, EventParticipation>(
            "INSERT INTO event_participations (event_id, user_id) VALUES ($1, $2)
             RETURNING event_id, user_id",
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| constraint_error(err, "That user already joined this event"))
    }

    async fn delete_participation(&self, event_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let result =
            sqlx::query("DELETE FROM event_participations WHERE event_id = $1 AND user_id = $2")
                .bind(event_id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn participants(&self, event_id: Uuid) -> AppResult<Vec<User>> {
        sqlx::query_as::<_, User>(
            "SELECT users.* FROM users
             JOIN event_participations ON event_participations.user_id = users.id
             WHERE event_participations.event_id = $1
             ORDER BY users.email",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }
}

#[async_trait]
impl PaymentRepository for PgStore {
    async fn category_by_id(&self, id: Uuid) -> AppResult<Option<TransactionCategory>> {
        sqlx::query_as::<_, TransactionCategory>(
            "SELECT * FROM transaction_categories WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn category_by_name(&self, name: &str) -> AppResult<Option<TransactionCategory>> {
        sqlx::query_as::<_, TransactionCategory>(
            "SELECT * FROM transaction_categories WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn categories(&self) -> AppResult<Vec<TransactionCategory>> {
        sqlx::query_as::<_, TransactionCategory>(
            "SELECT * FROM transaction_categories ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn insert_category(&self, name: &str) -> AppResult<TransactionCategory> {
        sqlx::query_as::<_, TransactionCategory>(
            "INSERT INTO transaction_categories (name) VALUES ($1) RETURNING *",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| constraint_error(err, &format!("A category named {name} already exists")))
    }

    async fn rename_category(&self, id: Uuid, name: &str) -> AppResult<TransactionCategory> {
        let row = sqlx::query_as::<_, TransactionCategory>(
            "UPDATE transaction_categories SET name = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| constraint_error(err, &format!("A category named {name} already exists")))?;

        found(row, || format!("transaction category {id}"))
    }

    async fn delete_category(&self, id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM transaction_categories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|err| constraint_error(err, "This category can't be deleted"))?;

        Ok(())
    }

    async fn product_by_id(&self, id: Uuid) -> AppResult<Option<Product>> {
        sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn product_by_tag(&self, tag: &str) -> AppResult<Option<Product>> {
        sqlx::query_as::<_, Product>("SELECT * FROM products WHERE tag = $1")
            .bind(tag)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn products(&self) -> AppResult<Vec<Product>> {
        sqlx::query_as::<_, Product>("SELECT * FROM products ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn insert_product(&self, new_product: NewProduct) -> AppResult<Product> {
        let conflict = format!("A product tagged {} already exists", new_product.tag);
        sqlx::query_as::<_, Product>(
            "INSERT INTO products (tag, name, cost, description, category_id, sig_id)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING *",
        )
        .bind(new_product.tag)
        .bind(new_product.name)
        .bind(new_product.cost)
        .bind(new_product.description)
        .bind(new_product.category_id)
        .bind(new_product.sig_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| constraint_error(err, &conflict))
    }

    async fn update_product(&self, id: Uuid, update: ProductUpdate) -> AppResult<Product> {
        let row = sqlx::query_as::<_, Product>(
            "UPDATE products SET
                name = COALESCE($2, name),
                cost = COALESCE($3, cost),
                description = COALESCE($4, description),
                category_id = COALESCE($5, category_id),
                sig_id = COALESCE($6, sig_id)
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(update.name)
        .bind(update.cost)
        .bind(update.description)
        .bind(update.category_id)
        .bind(update.sig_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| constraint_error(err, "The product could not be updated"))?;

        found(row, || format!("product {id}"))
    }

    async fn delete_product(&self, id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn transaction_by_id(&self, id: Uuid) -> AppResult<Option<Transaction>> {
        sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn transaction_by_token(&self, stripe_token: &str) -> AppResult<Option<Transaction>> {
        sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE stripe_token = $1")
            .bind(stripe_token)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn transactions(&self) -> AppResult<Vec<Transaction>> {
        sqlx::query_as::<_, Transaction>("SELECT * FROM transactions ORDER BY date_created DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn transactions_for_user(&self, user_id: Uuid) -> AppResult<Vec<Transaction>> {
        sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE user_id = $1 ORDER BY date_created DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn insert_transaction(&self, new_transaction: NewTransaction) -> AppResult<Transaction> {
        insert_transaction_query(new_transaction)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| constraint_error(err, "This payment was already recorded"))
    }

    async fn record_membership_purchase(
        &self,
        user_id: Uuid,
        delta: Duration,
        now: OffsetDateTime,
        new_transaction: NewTransaction,
    ) -> AppResult<(User, Transaction)> {
        let mut tx = self.pool.begin().await?;
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut tx)
            .await?;
        let user = found(user, || format!("user {user_id}"))?;

        let user = sqlx::query_as::<_, User>(
            "UPDATE users SET membership_expiration = $2 WHERE id = $1 RETURNING *",
        )
        .bind(user_id)
        .bind(user.extended_expiration(delta, now))
        .fetch_one(&mut tx)
        .await?;
        let transaction = insert_transaction_query(new_transaction)
            .fetch_one(&mut tx)
            .await
            .map_err(|err| constraint_error(err, "This payment was already recorded"))?;
        tx.commit().await?;

        Ok((user, transaction))
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn session_exists(&self, session: &str, fresh_after: OffsetDateTime) -> AppResult<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM session_values WHERE session_key = $1 AND updated_at > $2
             )",
        )
        .bind(session)
        .bind(fresh_after)
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn session_get(
        &self,
        session: &str,
        key: &str,
        fresh_after: OffsetDateTime,
    ) -> AppResult<Option<String>> {
        sqlx::query_scalar(
            "SELECT value FROM session_values
             WHERE session_key = $1 AND key = $2 AND updated_at > $3",
        )
        .bind(session)
        .bind(key)
        .bind(fresh_after)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn session_set(
        &self,
        session: &str,
        key: &str,
        value: &str,
        now: OffsetDateTime,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO session_values (session_key, key, value, updated_at) VALUES ($1, $2, $3, $4)
             ON CONFLICT (session_key, key)
             DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at",
        )
        .bind(session)
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn session_pop(
        &self,
        session: &str,
        key: &str,
        fresh_after: OffsetDateTime,
    ) -> AppResult<Option<String>> {
        sqlx::query_scalar(
            "DELETE FROM session_values
             WHERE session_key = $1 AND key = $2 AND updated_at > $3
             RETURNING value",
        )
        .bind(session)
        .bind(key)
        .bind(fresh_after)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn session_rename(&self, from: &str, to: &str) -> AppResult<()> {
        sqlx::query("UPDATE session_values SET session_key = $2 WHERE session_key = $1")
            .bind(from)
            .bind(to)
            .execute(&self.pool)
            .await
            .map_err(|err| constraint_error(err, "That session key is taken"))?;

        Ok(())
    }

    async fn session_clear(&self, session: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM session_values WHERE session_key = $1")
            .bind(session)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn session_sweep(&self, stale_before: OffsetDateTime) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM session_values WHERE updated_at <= $1")
            .bind(stale_before)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
