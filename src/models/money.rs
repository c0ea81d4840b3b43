use std::fmt;
use std::str::FromStr;

use async_graphql::{
    ComplexObject, Context, InputValueError, InputValueResult, Result, ResultExt, Scalar,
    ScalarType, SimpleObject, Value, ID,
};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::db::{PaymentRepository, SigRepository, UserRepository};
use crate::error::{AppError, AppResult, FieldErrors};
use crate::graphql::app_state;
use crate::models::sig::Sig;
use crate::models::user::User;
use crate::models::DateTime;

pub const MAX_TAG_LENGTH: usize = 50;
pub const MAX_PRODUCT_NAME_LENGTH: usize = 100;
/// Shared by products and ledger entries, since a purchase copies one into
/// the other.
pub const MAX_DESCRIPTION_LENGTH: usize = 500;
pub const MAX_GATEWAY_ID_LENGTH: usize = 100;

/// An amount of US dollars, held as whole cents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// The amount in minor currency units, as the gateway charges it.
    pub fn cents(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let cents = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, cents / 100, cents % 100)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("`{0}` is not an amount of money, expected something like 12.50")]
pub struct ParseMoneyError(String);

impl FromStr for Money {
    type Err = ParseMoneyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let error = || ParseMoneyError(raw.to_owned());
        let trimmed = raw.trim().trim_start_matches('$');
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && fraction.is_empty()
            || fraction.len() > 2
            || !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit())
        {
            return Err(error());
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| error())?
        };
        let fraction: i64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().map_err(|_| error())? * 10,
            _ => fraction.parse().map_err(|_| error())?,
        };
        let cents = whole
            .checked_mul(100)
            .and_then(|cents| cents.checked_add(fraction))
            .ok_or_else(error)?;

        Ok(Money(if negative { -cents } else { cents }))
    }
}

#[Scalar]
impl ScalarType for Money {
    fn parse(value: Value) -> InputValueResult<Self> {
        match &value {
            Value::String(amount) => amount.parse().map_err(InputValueError::custom),
            Value::Number(number) => number
                .as_i64()
                .and_then(|dollars| dollars.checked_mul(100))
                .map(Money)
                .ok_or_else(|| InputValueError::expected_type(value.clone())),
            _ => Err(InputValueError::expected_type(value)),
        }
    }

    fn to_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

/// A named bucket for transactions, like "membership" or "sponsorship".
#[derive(SimpleObject, Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
#[graphql(complex)]
pub struct TransactionCategory {
    #[graphql(skip)]
    pub id: Uuid,
    /// The unique name of the category
    pub name: String,
}

#[ComplexObject]
impl TransactionCategory {
    /// The ID of the category
    pub async fn id(&self) -> ID {
        ID(self.id.to_string())
    }
}

impl TransactionCategory {
    pub const MEMBERSHIP: &'static str = "membership";
    pub const SPONSORSHIP: &'static str = "sponsorship";

    pub async fn with_id<R>(id: Uuid, repo: &R) -> AppResult<Self>
    where
        R: PaymentRepository + ?Sized,
    {
        repo.category_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("transaction category {id}")))
    }

    pub async fn with_name<R>(name: &str, repo: &R) -> AppResult<Self>
    where
        R: PaymentRepository + ?Sized,
    {
        repo.category_by_name(name)
            .await?
            .ok_or_else(|| AppError::not_found(format!("transaction category {name}")))
    }

    pub async fn all<R>(repo: &R) -> AppResult<Vec<Self>>
    where
        R: PaymentRepository + ?Sized,
    {
        repo.categories().await
    }

    pub async fn create<R>(name: &str, repo: &R) -> AppResult<Self>
    where
        R: PaymentRepository + ?Sized,
    {
        let name = Self::checked_name(name)?;
        let category = repo.insert_category(name).await?;
        info!(category = %category.name, "created transaction category");

        Ok(category)
    }

    pub async fn rename<R>(id: Uuid, name: &str, repo: &R) -> AppResult<Self>
    where
        R: PaymentRepository + ?Sized,
    {
        let name = Self::checked_name(name)?;
        Self::with_id(id, repo).await?;

        repo.rename_category(id, name).await
    }

    pub async fn delete<R>(id: Uuid, repo: &R) -> AppResult<()>
    where
        R: PaymentRepository + ?Sized,
    {
        Self::with_id(id, repo).await?;
        repo.delete_category(id).await
    }

    fn checked_name(name: &str) -> AppResult<&str> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > 50 {
            Err(AppError::invalid(
                "name",
                "A category name must be between 1 and 50 characters.",
            ))
        } else {
            Ok(name)
        }
    }
}

/// Something that can be bought through the site, like a membership.
#[derive(SimpleObject, Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
#[graphql(complex)]
pub struct Product {
    #[graphql(skip)]
    pub id: Uuid,
    /// The stable short name the site looks the product up by
    pub tag: String,
    /// The display name of the product
    pub name: String,
    #[graphql(skip)]
    pub date_created: OffsetDateTime,
    /// How much the product costs
    pub cost: Money,
    /// What the buyer gets
    pub description: String,
    #[graphql(skip)]
    pub category_id: Uuid,
    #[graphql(skip)]
    pub sig_id: String,
}

#[ComplexObject]
impl Product {
    /// The ID of the product
    pub async fn id(&self) -> ID {
        ID(self.id.to_string())
    }

    /// When the product was created
    pub async fn date_created(&self) -> DateTime {
        DateTime(self.date_created)
    }

    /// The category purchases of this product are filed under
    pub async fn category(&self, ctx: &Context<'_>) -> Result<TransactionCategory> {
        TransactionCategory::with_id(self.category_id, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    /// The SIG credited with purchases of this product
    pub async fn sig(&self, ctx: &Context<'_>) -> Result<Sig> {
        Sig::with_id(&self.sig_id, app_state(ctx).store.as_ref())
            .await
            .extend()
    }
}

#[derive(Clone, Debug)]
pub struct NewProduct {
    pub tag: String,
    pub name: String,
    pub cost: Money,
    pub description: String,
    pub category_id: Uuid,
    pub sig_id: String,
}

#[derive(Clone, Debug, Default)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub cost: Option<Money>,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub sig_id: Option<String>,
}

impl Product {
    pub async fn with_id<R>(id: Uuid, repo: &R) -> AppResult<Self>
    where
        R: PaymentRepository + ?Sized,
    {
        repo.product_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("product {id}")))
    }

    pub async fn with_tag<R>(tag: &str, repo: &R) -> AppResult<Self>
    where
        R: PaymentRepository + ?Sized,
    {
        repo.product_by_tag(tag)
            .await?
            .ok_or_else(|| AppError::not_found(format!("product {tag}")))
    }

    pub async fn all<R>(repo: &R) -> AppResult<Vec<Self>>
    where
        R: PaymentRepository + ?Sized,
    {
        repo.products().await
    }

    pub async fn create<R>(new_product: NewProduct, repo: &R) -> AppResult<Self>
    where
        R: PaymentRepository + SigRepository + ?Sized,
    {
        let mut errors = FieldErrors::new();
        if new_product.tag.trim().is_empty() {
            errors.add("tag", "A product must have a tag.");
        }
        if new_product.name.trim().is_empty() {
            errors.add("name", "A product must have a name.");
        }
        check_length(&mut errors, "tag", &new_product.tag, MAX_TAG_LENGTH);
        check_length(&mut errors, "name", &new_product.name, MAX_PRODUCT_NAME_LENGTH);
        check_length(
            &mut errors,
            "description",
            &new_product.description,
            MAX_DESCRIPTION_LENGTH,
        );
        if new_product.cost < Money::ZERO {
            errors.add("cost", "A product can't cost less than nothing.");
        }
        Self::check_references(
            Some(new_product.category_id),
            Some(&new_product.sig_id),
            &mut errors,
            repo,
        )
        .await?;
        errors.into_result()?;

        let product = repo.insert_product(new_product).await?;
        info!(product = %product.tag, cost = %product.cost, "created product");

        Ok(product)
    }

    pub async fn update<R>(id: Uuid, update: ProductUpdate, repo: &R) -> AppResult<Self>
    where
        R: PaymentRepository + SigRepository + ?Sized,
    {
        Self::with_id(id, repo).await?;

        let mut errors = FieldErrors::new();
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                errors.add("name", "A product must have a name.");
            }
            check_length(&mut errors, "name", name, MAX_PRODUCT_NAME_LENGTH);
        }
        if let Some(description) = &update.description {
            check_length(&mut errors, "description", description, MAX_DESCRIPTION_LENGTH);
        }
        if update.cost.map_or(false, |cost| cost < Money::ZERO) {
            errors.add("cost", "A product can't cost less than nothing.");
        }
        Self::check_references(update.category_id, update.sig_id.as_deref(), &mut errors, repo)
            .await?;
        errors.into_result()?;

        repo.update_product(id, update).await
    }

    pub async fn delete<R>(id: Uuid, repo: &R) -> AppResult<()>
    where
        R: PaymentRepository + ?Sized,
    {
        Self::with_id(id, repo).await?;
        repo.delete_product(id).await
    }

    async fn check_references<R>(
        category_id: Option<Uuid>,
        sig_id: Option<&str>,
        errors: &mut FieldErrors,
        repo: &R,
    ) -> AppResult<()>
    where
        R: PaymentRepository + SigRepository + ?Sized,
    {
        if let Some(category_id) = category_id {
            if repo.category_by_id(category_id).await?.is_none() {
                errors.add("category", format!("No category with id {category_id}."));
            }
        }
        if let Some(sig_id) = sig_id {
            if repo.sig_by_id(sig_id).await?.is_none() {
                errors.add("sig", format!("No SIG with id {sig_id}."));
            }
        }

        Ok(())
    }
}

/// An entry in the payment ledger. Entries are never changed once written.
#[derive(SimpleObject, Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
#[graphql(complex)]
pub struct Transaction {
    #[graphql(skip)]
    pub id: Uuid,
    #[graphql(skip)]
    pub date_created: OffsetDateTime,
    /// What was paid for
    pub description: String,
    #[graphql(skip)]
    pub category_id: Uuid,
    #[graphql(skip)]
    pub sig_id: String,
    /// How much was paid
    pub cost: Money,
    #[graphql(skip)]
    pub user_id: Option<Uuid>,
    /// The single-use token the payment widget handed over
    pub stripe_token: String,
    /// The gateway's customer, if one was created
    pub customer_id: Option<String>,
    /// A coupon applied to the charge
    pub coupon_id: Option<String>,
    /// A subscription the charge belongs to
    pub subscription_id: Option<String>,
    /// The gateway's id for the charge
    pub charge_id: Option<String>,
}

#[ComplexObject]
impl Transaction {
    /// The ID of the transaction
    pub async fn id(&self) -> ID {
        ID(self.id.to_string())
    }

    /// When the payment was recorded
    pub async fn date_created(&self) -> DateTime {
        DateTime(self.date_created)
    }

    /// The category the payment is filed under
    pub async fn category(&self, ctx: &Context<'_>) -> Result<TransactionCategory> {
        TransactionCategory::with_id(self.category_id, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    /// The SIG credited with the payment
    pub async fn sig(&self, ctx: &Context<'_>) -> Result<Sig> {
        Sig::with_id(&self.sig_id, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    /// Who paid, unless their account has since been deleted
    pub async fn user(&self, ctx: &Context<'_>) -> Result<Option<User>> {
        match self.user_id {
            Some(user_id) => app_state(ctx).store.user_by_id(user_id).await.extend(),
            None => Ok(None),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NewTransaction {
    pub description: String,
    pub category_id: Uuid,
    pub sig_id: String,
    pub cost: Money,
    pub user_id: Option<Uuid>,
    pub stripe_token: String,
    pub customer_id: Option<String>,
    pub coupon_id: Option<String>,
    pub subscription_id: Option<String>,
    pub charge_id: Option<String>,
}

impl NewTransaction {
    /// A ledger entry for buying `product`.
    pub fn for_product(product: &Product, user_id: Uuid, stripe_token: &str) -> Self {
        Self {
            description: product.description.clone(),
            category_id: product.category_id,
            sig_id: product.sig_id.clone(),
            cost: product.cost,
            user_id: Some(user_id),
            stripe_token: stripe_token.to_owned(),
            customer_id: None,
            coupon_id: None,
            subscription_id: None,
            charge_id: None,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        let mut errors = FieldErrors::new();
        if !self.cost.is_positive() {
            errors.add("cost", "A transaction must cost more than nothing.");
        }
        if self.stripe_token.trim().is_empty() {
            errors.add("stripe_token", "A transaction must have a payment token.");
        }
        check_length(&mut errors, "stripe_token", &self.stripe_token, MAX_GATEWAY_ID_LENGTH);
        check_length(&mut errors, "description", &self.description, MAX_DESCRIPTION_LENGTH);
        for (field, id) in [
            ("customer_id", &self.customer_id),
            ("coupon_id", &self.coupon_id),
            ("subscription_id", &self.subscription_id),
            ("charge_id", &self.charge_id),
        ] {
            if let Some(id) = id {
                check_length(&mut errors, field, id, MAX_GATEWAY_ID_LENGTH);
            }
        }

        errors.into_result()
    }
}

impl Transaction {
    pub async fn with_id<R>(id: Uuid, repo: &R) -> AppResult<Self>
    where
        R: PaymentRepository + ?Sized,
    {
        repo.transaction_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("transaction {id}")))
    }

    pub async fn with_token<R>(stripe_token: &str, repo: &R) -> AppResult<Self>
    where
        R: PaymentRepository + ?Sized,
    {
        repo.transaction_by_token(stripe_token)
            .await?
            .ok_or_else(|| AppError::not_found("transaction for that token"))
    }

    pub async fn all<R>(repo: &R) -> AppResult<Vec<Self>>
    where
        R: PaymentRepository + ?Sized,
    {
        repo.transactions().await
    }

    /// Appends an entry to the ledger. The cost must be positive and each
    /// token and charge can only be recorded once.
    pub async fn create_transaction<R>(new_transaction: NewTransaction, repo: &R) -> AppResult<Self>
    where
        R: PaymentRepository + SigRepository + UserRepository + ?Sized,
    {
        new_transaction.validate()?;

        let mut errors = FieldErrors::new();
        if repo.category_by_id(new_transaction.category_id).await?.is_none() {
            errors.add(
                "category",
                format!("No category with id {}.", new_transaction.category_id),
            );
        }
        if repo.sig_by_id(&new_transaction.sig_id).await?.is_none() {
            errors.add("sig", format!("No SIG with id {}.", new_transaction.sig_id));
        }
        if let Some(user_id) = new_transaction.user_id {
            if repo.user_by_id(user_id).await?.is_none() {
                errors.add("user", format!("No user with id {user_id}."));
            }
        }
        errors.into_result()?;

        let transaction = repo.insert_transaction(new_transaction).await?;
        info!(
            transaction = %transaction.id,
            cost = %transaction.cost,
            sig = %transaction.sig_id,
            "recorded transaction"
        );

        Ok(transaction)
    }
}

fn check_length(errors: &mut FieldErrors, field: &str, value: &str, max: usize) {
    if value.chars().count() > max {
        errors.add(field, format!("The {field} may be at most {max} characters."));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dollar_amounts() {
        assert_eq!("12.50".parse::<Money>().unwrap(), Money::from_cents(1250));
        assert_eq!("12.5".parse::<Money>().unwrap(), Money::from_cents(1250));
        assert_eq!("$20".parse::<Money>().unwrap(), Money::from_cents(2000));
        assert_eq!(".99".parse::<Money>().unwrap(), Money::from_cents(99));
        assert_eq!("-3.05".parse::<Money>().unwrap(), Money::from_cents(-305));
    }

    #[test]
    fn rejects_malformed_amounts() {
        for raw in ["", ".", "1.234", "twelve", "1,000.00", "1.-5"] {
            assert!(raw.parse::<Money>().is_err(), "{raw} should not parse");
        }
    }

    #[test]
    fn displays_two_decimal_places() {
        assert_eq!(Money::from_cents(1250).to_string(), "12.50");
        assert_eq!(Money::from_cents(7).to_string(), "0.07");
        assert_eq!(Money::from_cents(-305).to_string(), "-3.05");
    }

    #[test]
    fn transactions_must_cost_something() {
        let mut transaction = crate::tests::mock::mock_new_transaction();
        transaction.cost = Money::ZERO;

        match transaction.validate() {
            Err(AppError::Validation(errors)) => assert!(errors.contains("cost")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn ledger_fields_fit_their_columns() {
        let mut transaction = crate::tests::mock::mock_new_transaction();
        transaction.description = "d".repeat(MAX_DESCRIPTION_LENGTH);
        transaction.stripe_token = "t".repeat(MAX_GATEWAY_ID_LENGTH);
        assert!(transaction.validate().is_ok());

        transaction.description.push('d');
        transaction.stripe_token.push('t');
        transaction.charge_id = Some("c".repeat(MAX_GATEWAY_ID_LENGTH + 1));
        match transaction.validate() {
            Err(AppError::Validation(errors)) => {
                assert!(errors.contains("description"));
                assert!(errors.contains("stripe_token"));
                assert!(errors.contains("charge_id"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
