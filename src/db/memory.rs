use std::collections::HashMap;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{EventRepository, PaymentRepository, SessionStore, SigRepository, UserRepository};
use crate::error::{AppError, AppResult};
use crate::models::event::{Event, EventParticipation, EventUpdate, NewEvent};
use crate::models::money::{
    NewProduct, NewTransaction, Product, ProductUpdate, Transaction, TransactionCategory,
};
use crate::models::sig::{NewSig, Sig, SigUpdate};
use crate::models::user::{NewUser, User, UserFilter, UserUpdate};
use crate::util::current_time;

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    sigs: Vec<Sig>,
    events: Vec<Event>,
    participations: Vec<EventParticipation>,
    categories: Vec<TransactionCategory>,
    products: Vec<Product>,
    transactions: Vec<Transaction>,
    sessions: HashMap<String, HashMap<String, SessionValue>>,
}

struct SessionValue {
    value: String,
    updated_at: OffsetDateTime,
}

/// Keeps everything in memory. Enforces the same unique and foreign keys
/// as the Postgres schema.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn conflict(what: impl Into<String>) -> AppError {
    AppError::Conflict(what.into())
}

fn still_referenced(what: &str) -> AppError {
    AppError::Conflict(format!("{what} is still referenced by other records"))
}

impl Tables {
    fn user_mut(&mut self, id: Uuid) -> AppResult<&mut User> {
        self.users
            .iter_mut()
            .find(|user| user.id == id)
            .ok_or_else(|| AppError::not_found(format!("user {id}")))
    }

    fn insert_transaction(&mut self, new: NewTransaction) -> AppResult<Transaction> {
        if self
            .transactions
            .iter()
            .any(|transaction| transaction.stripe_token == new.stripe_token)
        {
            return Err(conflict("a transaction with that token already exists"));
        }
        if let Some(charge_id) = &new.charge_id {
            if self
                .transactions
                .iter()
                .any(|transaction| transaction.charge_id.as_ref() == Some(charge_id))
            {
                return Err(conflict(format!("charge {charge_id} was already recorded")));
            }
        }
        if !self.categories.iter().any(|c| c.id == new.category_id) {
            return Err(AppError::invalid("category", "No such category."));
        }
        if !self.sigs.iter().any(|sig| sig.id == new.sig_id) {
            return Err(AppError::invalid("sig", "No such SIG."));
        }

        let transaction = Transaction {
            id: Uuid::new_v4(),
            date_created: current_time(),
            description: new.description,
            category_id: new.category_id,
            sig_id: new.sig_id,
            cost: new.cost,
            user_id: new.user_id,
            stripe_token: new.stripe_token,
            customer_id: new.customer_id,
            coupon_id: new.coupon_id,
            subscription_id: new.subscription_id,
            charge_id: new.charge_id,
        };
        self.transactions.push(transaction.clone());

        Ok(transaction)
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn user_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|user| user.id == id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|user| user.email == email).cloned())
    }

    async fn users(&self, filter: &UserFilter) -> AppResult<Vec<User>> {
        let tables = self.tables.read().await;
        let mut users: Vec<User> = tables
            .users
            .iter()
            .filter(|user| filter.matches(user))
            .cloned()
            .collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));

        Ok(users)
    }

    async fn insert_user(&self, new_user: NewUser) -> AppResult<User> {
        let mut tables = self.tables.write().await;
        if tables.users.iter().any(|user| user.email == new_user.email) {
            return Err(conflict(format!(
                "Another user already has the email {}",
                new_user.email
            )));
        }

        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            date_joined: current_time(),
            membership_expiration: None,
            is_active: new_user.is_active,
            is_staff: new_user.is_staff,
            is_superuser: new_user.is_superuser,
            password_hash: new_user.password_hash,
        };
        tables.users.push(user.clone());

        Ok(user)
    }

    async fn update_user(&self, id: Uuid, update: UserUpdate) -> AppResult<User> {
        let mut tables = self.tables.write().await;
        if let Some(email) = &update.email {
            if tables.users.iter().any(|user| user.id != id && &user.email == email) {
                return Err(conflict(format!("Another user already has the email {email}")));
            }
        }

        let user = tables.user_mut(id)?;
        if let Some(email) = update.email {
            user.email = email;
        }
        if let Some(first_name) = update.first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = update.last_name {
            user.last_name = last_name;
        }
        if let Some(expiration) = update.membership_expiration {
            user.membership_expiration = expiration;
        }
        if let Some(is_active) = update.is_active {
            user.is_active = Some(is_active);
        }
        if let Some(is_staff) = update.is_staff {
            user.is_staff = is_staff;
        }
        if let Some(is_superuser) = update.is_superuser {
            user.is_superuser = is_superuser;
        }

        Ok(user.clone())
    }

    async fn delete_user(&self, id: Uuid) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        if tables
            .sigs
            .iter()
            .any(|sig| sig.founder_id == id || sig.chair_id == id)
            || tables.events.iter().any(|event| event.creator_id == id)
        {
            return Err(still_referenced("This user"));
        }

        tables.users.retain(|user| user.id != id);
        tables.participations.retain(|p| p.user_id != id);
        for transaction in &mut tables.transactions {
            if transaction.user_id == Some(id) {
                transaction.user_id = None;
            }
        }

        Ok(())
    }

    async fn extend_membership(
        &self,
        id: Uuid,
        delta: Duration,
        now: OffsetDateTime,
    ) -> AppResult<User> {
        let mut tables = self.tables.write().await;
        let user = tables.user_mut(id)?;
        user.membership_expiration = Some(user.extended_expiration(delta, now));

        Ok(user.clone())
    }
}

#[async_trait]
impl SigRepository for MemoryStore {
    async fn sig_by_id(&self, id: &str) -> AppResult<Option<Sig>> {
        let tables = self.tables.read().await;
        Ok(tables.sigs.iter().find(|sig| sig.id == id).cloned())
    }

    async fn sigs(&self, is_active: Option<bool>) -> AppResult<Vec<Sig>> {
        let tables = self.tables.read().await;
        let mut sigs: Vec<Sig> = tables
            .sigs
            .iter()
            .filter(|sig| is_active.map_or(true, |active| sig.is_active == active))
            .cloned()
            .collect();
        sigs.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(sigs)
    }

    async fn insert_sig(&self, new_sig: NewSig) -> AppResult<Sig> {
        let mut tables = self.tables.write().await;
        if tables.sigs.iter().any(|sig| sig.id == new_sig.id) {
            return Err(conflict(format!("A SIG with id {} already exists", new_sig.id)));
        }

        let sig = Sig {
            id: new_sig.id,
            is_active: new_sig.is_active,
            date_created: current_time(),
            founder_id: new_sig.founder_id,
            chair_id: new_sig.chair_id,
            description: new_sig.description,
        };
        tables.sigs.push(sig.clone());

        Ok(sig)
    }

    async fn update_sig(&self, id: &str, update: SigUpdate) -> AppResult<Sig> {
        let mut tables = self.tables.write().await;
        let sig = tables
            .sigs
            .iter_mut()
            .find(|sig| sig.id == id)
            .ok_or_else(|| AppError::not_found(format!("SIG {id}")))?;
        if let Some(chair_id) = update.chair_id {
            sig.chair_id = chair_id;
        }
        if let Some(description) = update.description {
            sig.description = description;
        }
        if let Some(is_active) = update.is_active {
            sig.is_active = is_active;
        }

        Ok(sig.clone())
    }

    async fn delete_sig(&self, id: &str) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        if tables.events.iter().any(|event| event.hosting_sig == id)
            || tables.products.iter().any(|product| product.sig_id == id)
            || tables.transactions.iter().any(|t| t.sig_id == id)
        {
            return Err(still_referenced("This SIG"));
        }
        tables.sigs.retain(|sig| sig.id != id);

        Ok(())
    }
}

#[async_trait]
impl EventRepository for MemoryStore {
    async fn event_by_id(&self, id: Uuid) -> AppResult<Option<Event>> {
        let tables = self.tables.read().await;
        Ok(tables.events.iter().find(|event| event.id == id).cloned())
    }

    async fn event_by_title(&self, title: &str) -> AppResult<Option<Event>> {
        let tables = self.tables.read().await;
        Ok(tables.events.iter().find(|event| event.title == title).cloned())
    }

    async fn events(&self) -> AppResult<Vec<Event>> {
        let tables = self.tables.read().await;
        let mut events = tables.events.clone();
        events.sort_by_key(|event| event.date_hosted);

        Ok(events)
    }

    async fn upcoming_events(&self, now: OffsetDateTime, limit: usize) -> AppResult<Vec<Event>> {
        let mut events: Vec<Event> = self
            .events()
            .await?
            .into_iter()
            .filter(|event| event.is_active_at(now))
            .collect();
        events.truncate(limit);

        Ok(events)
    }

    async fn count_upcoming_events(&self, now: OffsetDateTime) -> AppResult<usize> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .iter()
            .filter(|event| event.is_active_at(now))
            .count())
    }

    async fn insert_event(&self, new_event: NewEvent) -> AppResult<Event> {
        let mut tables = self.tables.write().await;
        if !tables.sigs.iter().any(|sig| sig.id == new_event.hosting_sig) {
            return Err(AppError::invalid("hosting_sig", "No such SIG."));
        }
        if !tables.users.iter().any(|user| user.id == new_event.creator_id) {
            return Err(AppError::invalid("creator", "No such user."));
        }

        let event = Event {
            id: Uuid::new_v4(),
            date_created: current_time(),
            date_hosted: new_event.date_hosted,
            date_expire: new_event.date_expire,
            creator_id: new_event.creator_id,
            hosting_sig: new_event.hosting_sig,
            title: new_event.title,
            description: new_event.description,
            location: new_event.location,
            presenter: new_event.presenter,
            cost: new_event.cost,
            flier: new_event.flier,
            link: new_event.link,
        };
        tables.events.push(event.clone());

        Ok(event)
    }

    async fn update_event(&self, id: Uuid, update: EventUpdate) -> AppResult<Event> {
        let mut tables = self.tables.write().await;
        let event = tables
            .events
            .iter_mut()
            .find(|event| event.id == id)
            .ok_or_else(|| AppError::not_found(format!("event {id}")))?;
        if let Some(hosting_sig) = update.hosting_sig {
            event.hosting_sig = hosting_sig;
        }
        if let Some(title) = update.title {
            event.title = title;
        }
        if let Some(description) = update.description {
            event.description = description;
        }
        if let Some(location) = update.location {
            event.location = location;
        }
        if let Some(presenter) = update.presenter {
            event.presenter = presenter;
        }
        if let Some(cost) = update.cost {
            event.cost = cost;
        }
        if let Some(date_hosted) = update.date_hosted {
            event.date_hosted = date_hosted;
        }
        if let Some(date_expire) = update.date_expire {
            event.date_expire = date_expire;
        }
        if let Some(flier) = update.flier {
            event.flier = flier;
        }
        if let Some(link) = update.link {
            event.link = link;
        }

        Ok(event.clone())
    }

    async fn delete_event(&self, id: Uuid) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        tables.events.retain(|event| event.id != id);
        tables.participations.retain(|p| p.event_id != id);

        Ok(())
    }

    async fn insert_participation(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<EventParticipation> {
        let mut tables = self.tables.write().await;
        let participation = EventParticipation { event_id, user_id };
        if tables.participations.contains(&participation) {
            return Err(conflict("That user already joined this event"));
        }
        tables.participations.push(participation.clone());

        Ok(participation)
    }

    async fn delete_participation(&self, event_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.participations.len();
        tables
            .participations
            .retain(|p| !(p.event_id == event_id && p.user_id == user_id));

        Ok(tables.participations.len() != before)
    }

    async fn participants(&self, event_id: Uuid) -> AppResult<Vec<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .participations
            .iter()
            .filter(|p| p.event_id == event_id)
            .filter_map(|p| tables.users.iter().find(|user| user.id == p.user_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn category_by_id(&self, id: Uuid) -> AppResult<Option<TransactionCategory>> {
        let tables = self.tables.read().await;
        Ok(tables.categories.iter().find(|c| c.id == id).cloned())
    }

    async fn category_by_name(&self, name: &str) -> AppResult<Option<TransactionCategory>> {
        let tables = self.tables.read().await;
        Ok(tables.categories.iter().find(|c| c.name == name).cloned())
    }

    async fn categories(&self) -> AppResult<Vec<TransactionCategory>> {
        let tables = self.tables.read().await;
        let mut categories = tables.categories.clone();
        categories.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(categories)
    }

    async fn insert_category(&self, name: &str) -> AppResult<TransactionCategory> {
        let mut tables = self.tables.write().await;
        if tables.categories.iter().any(|c| c.name == name) {
            return Err(conflict(format!("A category named {name} already exists")));
        }

        let category = TransactionCategory {
            id: Uuid::new_v4(),
            name: name.to_owned(),
        };
        tables.categories.push(category.clone());

        Ok(category)
    }

    async fn rename_category(&self, id: Uuid, name: &str) -> AppResult<TransactionCategory> {
        let mut tables = self.tables.write().await;
        if tables.categories.iter().any(|c| c.id != id && c.name == name) {
            return Err(conflict(format!("A category named {name} already exists")));
        }
        let category = tables
            .categories
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| AppError::not_found(format!("transaction category {id}")))?;
        category.name = name.to_owned();

        Ok(category.clone())
    }

    async fn delete_category(&self, id: Uuid) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        if tables.products.iter().any(|p| p.category_id == id)
            || tables.transactions.iter().any(|t| t.category_id == id)
        {
            return Err(still_referenced("This category"));
        }
        tables.categories.retain(|c| c.id != id);

        Ok(())
    }

    async fn product_by_id(&self, id: Uuid) -> AppResult<Option<Product>> {
        let tables = self.tables.read().await;
        Ok(tables.products.iter().find(|p| p.id == id).cloned())
    }

    async fn product_by_tag(&self, tag: &str) -> AppResult<Option<Product>> {
        let tables = self.tables.read().await;
        Ok(tables.products.iter().find(|p| p.tag == tag).cloned())
    }

    async fn products(&self) -> AppResult<Vec<Product>> {
        let tables = self.tables.read().await;
        let mut products = tables.products.clone();
        products.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(products)
    }

    async fn insert_product(&self, new_product: NewProduct) -> AppResult<Product> {
        let mut tables = self.tables.write().await;
        if tables.products.iter().any(|p| p.tag == new_product.tag) {
            return Err(conflict(format!(
                "A product tagged {} already exists",
                new_product.tag
            )));
        }

        let product = Product {
            id: Uuid::new_v4(),
            tag: new_product.tag,
            name: new_product.name,
            date_created: current_time(),
            cost: new_product.cost,
            description: new_product.description,
            category_id: new_product.category_id,
            sig_id: new_product.sig_id,
        };
        tables.products.push(product.clone());

        Ok(product)
    }

    async fn update_product(&self, id: Uuid, update: ProductUpdate) -> AppResult<Product> {
        let mut tables = self.tables.write().await;
        let product = tables
            .products
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| AppError::not_found(format!("product {id}")))?;
        if let Some(name) = update.name {
            product.name = name;
        }
        if let Some(cost) = update.cost {
            product.cost = cost;
        }
        if let Some(description) = update.description {
            product.description = description;
        }
        if let Some(category_id) = update.category_id {
            product.category_id = category_id;
        }
        if let Some(sig_id) = update.sig_id {
            product.sig_id = sig_id;
        }

        Ok(product.clone())
    }

    async fn delete_product(&self, id: Uuid) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        tables.products.retain(|p| p.id != id);

        Ok(())
    }

    async fn transaction_by_id(&self, id: Uuid) -> AppResult<Option<Transaction>> {
        let tables = self.tables.read().await;
        Ok(tables.transactions.iter().find(|t| t.id == id).cloned())
    }

    async fn transaction_by_token(&self, stripe_token: &str) -> AppResult<Option<Transaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .iter()
            .find(|t| t.stripe_token == stripe_token)
            .cloned())
    }

    async fn transactions(&self) -> AppResult<Vec<Transaction>> {
        let tables = self.tables.read().await;
        let mut transactions = tables.transactions.clone();
        transactions.reverse();

        Ok(transactions)
    }

    async fn transactions_for_user(&self, user_id: Uuid) -> AppResult<Vec<Transaction>> {
        Ok(self
            .transactions()
            .await?
            .into_iter()
            .filter(|t| t.user_id == Some(user_id))
            .collect())
    }

    async fn insert_transaction(&self, new_transaction: NewTransaction) -> AppResult<Transaction> {
        let mut tables = self.tables.write().await;
        tables.insert_transaction(new_transaction)
    }

    async fn record_membership_purchase(
        &self,
        user_id: Uuid,
        delta: Duration,
        now: OffsetDateTime,
        new_transaction: NewTransaction,
    ) -> AppResult<(User, Transaction)> {
        let mut tables = self.tables.write().await;
        let expiration = {
            let user = tables.user_mut(user_id)?;
            user.extended_expiration(delta, now)
        };
        let transaction = tables.insert_transaction(new_transaction)?;
        let user = tables.user_mut(user_id)?;
        user.membership_expiration = Some(expiration);

        Ok((user.clone(), transaction))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn session_exists(&self, session: &str, fresh_after: OffsetDateTime) -> AppResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables.sessions.get(session).map_or(false, |values| {
            values.values().any(|value| value.updated_at > fresh_after)
        }))
    }

    async fn session_get(
        &self,
        session: &str,
        key: &str,
        fresh_after: OffsetDateTime,
    ) -> AppResult<Option<String>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .get(session)
            .and_then(|values| values.get(key))
            .filter(|value| value.updated_at > fresh_after)
            .map(|value| value.value.clone()))
    }

    async fn session_set(
        &self,
        session: &str,
        key: &str,
        value: &str,
        now: OffsetDateTime,
    ) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        tables.sessions.entry(session.to_owned()).or_default().insert(
            key.to_owned(),
            SessionValue {
                value: value.to_owned(),
                updated_at: now,
            },
        );

        Ok(())
    }

    async fn session_pop(
        &self,
        session: &str,
        key: &str,
        fresh_after: OffsetDateTime,
    ) -> AppResult<Option<String>> {
        let mut tables = self.tables.write().await;
        let values = match tables.sessions.get_mut(session) {
            Some(values) => values,
            None => return Ok(None),
        };
        if !values.get(key).map_or(false, |value| value.updated_at > fresh_after) {
            return Ok(None);
        }

        Ok(values.remove(key).map(|value| value.value))
    }

    async fn session_rename(&self, from: &str, to: &str) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        if let Some(values) = tables.sessions.remove(from) {
            tables.sessions.entry(to.to_owned()).or_default().extend(values);
        }

        Ok(())
    }

    async fn session_clear(&self, session: &str) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        tables.sessions.remove(session);

        Ok(())
    }

    async fn session_sweep(&self, stale_before: OffsetDateTime) -> AppResult<u64> {
        let mut tables = self.tables.write().await;
        let mut swept = 0;
        for values in tables.sessions.values_mut() {
            let before = values.len();
            values.retain(|_, value| value.updated_at > stale_before);
            swept += (before - values.len()) as u64;
        }
        tables.sessions.retain(|_, values| !values.is_empty());

        Ok(swept)
    }
}
