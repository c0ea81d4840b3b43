//! Buying things through the payment gateway, memberships in particular.
//!
//! A purchase is a single linear flow: check the buyer and the request,
//! find the product, charge the card, then write the results locally. The
//! gateway has already taken the money by the time anything is written, so
//! a failed local write is reported loudly for manual reconciliation
//! instead of being retried or hidden.

use axum::http::StatusCode;
use time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::{PaymentRepository, SigRepository, UserRepository};
use crate::error::{AppError, AppResult};
use crate::gateway::{Charge, ChargeRequest, GatewayError, PaymentGateway};
use crate::models::money::{Money, NewProduct, NewTransaction, Product, Transaction, TransactionCategory};
use crate::models::user::User;
use crate::outcome::{Flash, Outcome};
use crate::util::current_time;

pub const MEMBERSHIP_PAGE: &str = "/payments/membership";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MembershipType {
    pub name: &'static str,
    /// The tag of the product sold for this type.
    pub tag: &'static str,
    pub weeks: i64,
    pub display_name: &'static str,
}

pub const MEMBERSHIP_TYPES: [MembershipType; 2] = [
    MembershipType {
        name: "semester",
        tag: "membership-semester",
        weeks: 24,
        display_name: "Semester Membership",
    },
    MembershipType {
        name: "year",
        tag: "membership-year",
        weeks: 52,
        display_name: "Year Membership",
    },
];

impl MembershipType {
    pub fn named(name: &str) -> Option<Self> {
        MEMBERSHIP_TYPES
            .iter()
            .copied()
            .find(|membership| membership.name == name.trim())
    }

    pub fn delta(&self) -> Duration {
        Duration::weeks(self.weeks)
    }

    /// Makes sure the membership category and one product per membership
    /// type exist, credited to `sig_id`. Existing products keep their price.
    pub async fn seed<R>(sig_id: &str, costs: [Money; 2], repo: &R) -> AppResult<Vec<Product>>
    where
        R: PaymentRepository + SigRepository + ?Sized,
    {
        let category = match repo.category_by_name(TransactionCategory::MEMBERSHIP).await? {
            Some(category) => category,
            None => TransactionCategory::create(TransactionCategory::MEMBERSHIP, repo).await?,
        };

        let mut products = Vec::new();
        for (membership, cost) in MEMBERSHIP_TYPES.iter().zip(costs) {
            let product = match repo.product_by_tag(membership.tag).await? {
                Some(product) => product,
                None => {
                    Product::create(
                        NewProduct {
                            tag: membership.tag.to_owned(),
                            name: membership.display_name.to_owned(),
                            cost,
                            description: format!("ACM {}", membership.display_name),
                            category_id: category.id,
                            sig_id: sig_id.to_owned(),
                        },
                        repo,
                    )
                    .await?
                }
            };
            products.push(product);
        }

        Ok(products)
    }
}

/// A completed purchase.
#[derive(Clone, Debug)]
pub struct Receipt {
    pub product: Product,
    pub transaction: Transaction,
    /// The buyer after any membership extension.
    pub user: User,
}

#[derive(Debug, thiserror::Error)]
pub enum PurchaseError {
    #[error("Invalid User")]
    NotAuthenticated,
    #[error("No payment token was received.")]
    MissingToken,
    #[error("The payment gateway is not configured.")]
    MisconfiguredGateway,
    #[error("`{0}` is not a valid membership type.")]
    UnknownMembershipType(String),
    #[error("No product with tag {0} exists.")]
    ProductMissing(String),
    #[error("No product with id {0} exists.")]
    UnknownProduct(Uuid),
    #[error("This payment was already processed.")]
    TokenAlreadyUsed,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// The card was charged but recording the purchase failed.
    #[error("Charge {charge_id} succeeded but could not be recorded: {source}")]
    ReconciliationRequired { charge_id: String, source: AppError },
    #[error(transparent)]
    Store(AppError),
}

impl PurchaseError {
    pub fn is_server_error(&self) -> bool {
        match self {
            PurchaseError::NotAuthenticated
            | PurchaseError::MissingToken
            | PurchaseError::UnknownMembershipType(_)
            | PurchaseError::UnknownProduct(_)
            | PurchaseError::TokenAlreadyUsed => false,
            PurchaseError::Gateway(error) => !error.is_recoverable(),
            PurchaseError::Store(error) => error.is_server_error(),
            PurchaseError::MisconfiguredGateway
            | PurchaseError::ProductMissing(_)
            | PurchaseError::ReconciliationRequired { .. } => true,
        }
    }

    /// What the buyer sees. Recoverable gateway failures send them back to
    /// `retry_page` to try again.
    pub fn outcome<T>(&self, retry_page: &str) -> Outcome<T> {
        match self {
            PurchaseError::NotAuthenticated => {
                Outcome::client_error(StatusCode::NOT_FOUND, self.to_string())
            }
            PurchaseError::MissingToken | PurchaseError::UnknownMembershipType(_) => {
                Outcome::client_error(StatusCode::BAD_REQUEST, self.to_string())
            }
            PurchaseError::UnknownProduct(_) => {
                Outcome::client_error(StatusCode::NOT_FOUND, self.to_string())
            }
            PurchaseError::TokenAlreadyUsed => {
                Outcome::client_error(StatusCode::CONFLICT, self.to_string())
            }
            PurchaseError::Gateway(GatewayError::Connection(_)) => Outcome::redirect_with(
                retry_page,
                Flash::error(
                    "We couldn't reach the payment processor. You have not been charged, \
                     please try again.",
                ),
            ),
            PurchaseError::Gateway(GatewayError::Card(message)) => Outcome::redirect_with(
                retry_page,
                Flash::error(format!("Your payment was declined: {message}")),
            ),
            PurchaseError::Gateway(GatewayError::Api(_)) => {
                Outcome::server_error(StatusCode::BAD_GATEWAY, "server error")
            }
            PurchaseError::ReconciliationRequired { charge_id, .. } => Outcome::server_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!(
                    "Your payment went through but we could not record it. Please contact an \
                     officer with reference {charge_id}."
                ),
            ),
            PurchaseError::Store(error) => Outcome::from(error),
            PurchaseError::MisconfiguredGateway
            | PurchaseError::ProductMissing(_)
            | PurchaseError::Gateway(GatewayError::Authentication(_)) => {
                Outcome::server_error(StatusCode::INTERNAL_SERVER_ERROR, "server error")
            }
        }
    }

    fn log(&self) {
        match self {
            PurchaseError::ReconciliationRequired { charge_id, source } => {
                error!(charge = %charge_id, "charge succeeded but recording it failed, reconciliation required: {source}")
            }
            error if error.is_server_error() => error!("purchase failed: {error}"),
            PurchaseError::Gateway(error) => warn!("purchase declined: {error}"),
            _ => {}
        }
    }
}

impl From<AppError> for PurchaseError {
    fn from(error: AppError) -> Self {
        PurchaseError::Store(error)
    }
}

/// The parts of a purchase request every purchase needs.
pub struct PurchaseRequest<'a> {
    pub user: Option<&'a User>,
    pub token: Option<&'a str>,
}

impl<'a> PurchaseRequest<'a> {
    fn validate(
        &self,
        gateway: Option<&'a dyn PaymentGateway>,
    ) -> Result<(&'a User, &'a str, &'a dyn PaymentGateway), PurchaseError> {
        let user = self.user.ok_or(PurchaseError::NotAuthenticated)?;
        let token = self
            .token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(PurchaseError::MissingToken)?;
        let gateway = gateway.ok_or(PurchaseError::MisconfiguredGateway)?;

        Ok((user, token, gateway))
    }
}

/// Buys a membership of the named type and extends the buyer's membership.
pub async fn purchase_membership<R>(
    request: PurchaseRequest<'_>,
    membership_type: &str,
    gateway: Option<&dyn PaymentGateway>,
    repo: &R,
) -> Result<Receipt, PurchaseError>
where
    R: PaymentRepository + UserRepository + ?Sized,
{
    let result = try_purchase_membership(request, membership_type, gateway, repo).await;
    if let Err(error) = &result {
        error.log();
    }

    result
}

/// Buys any product. Only a ledger entry is written.
pub async fn purchase_product<R>(
    request: PurchaseRequest<'_>,
    product_id: Uuid,
    gateway: Option<&dyn PaymentGateway>,
    repo: &R,
) -> Result<Receipt, PurchaseError>
where
    R: PaymentRepository + UserRepository + ?Sized,
{
    let result = try_purchase_product(request, product_id, gateway, repo).await;
    if let Err(error) = &result {
        error.log();
    }

    result
}

async fn try_purchase_membership<R>(
    request: PurchaseRequest<'_>,
    membership_type: &str,
    gateway: Option<&dyn PaymentGateway>,
    repo: &R,
) -> Result<Receipt, PurchaseError>
where
    R: PaymentRepository + UserRepository + ?Sized,
{
    let (user, token, gateway) = request.validate(gateway)?;
    let membership = MembershipType::named(membership_type)
        .ok_or_else(|| PurchaseError::UnknownMembershipType(membership_type.to_owned()))?;
    let product = repo
        .product_by_tag(membership.tag)
        .await?
        .ok_or_else(|| PurchaseError::ProductMissing(membership.tag.to_owned()))?;

    let charge = charge(gateway, &product, user, token, repo).await?;
    let transaction = transaction_for(&product, user, token, &charge);
    let (user, transaction) = repo
        .record_membership_purchase(user.id, membership.delta(), current_time(), transaction)
        .await
        .map_err(|source| PurchaseError::ReconciliationRequired {
            charge_id: charge.id.clone(),
            source,
        })?;
    info!(
        user = %user.id,
        membership = membership.name,
        expiration = ?user.membership_expiration,
        charge = %charge.id,
        "sold membership"
    );

    Ok(Receipt {
        product,
        transaction,
        user,
    })
}

async fn try_purchase_product<R>(
    request: PurchaseRequest<'_>,
    product_id: Uuid,
    gateway: Option<&dyn PaymentGateway>,
    repo: &R,
) -> Result<Receipt, PurchaseError>
where
    R: PaymentRepository + UserRepository + ?Sized,
{
    let (user, token, gateway) = request.validate(gateway)?;
    let product = repo
        .product_by_id(product_id)
        .await?
        .ok_or(PurchaseError::UnknownProduct(product_id))?;

    let charge = charge(gateway, &product, user, token, repo).await?;
    let transaction = repo
        .insert_transaction(transaction_for(&product, user, token, &charge))
        .await
        .map_err(|source| PurchaseError::ReconciliationRequired {
            charge_id: charge.id.clone(),
            source,
        })?;
    info!(user = %user.id, product = %product.tag, charge = %charge.id, "sold product");

    Ok(Receipt {
        product,
        transaction,
        user: user.clone(),
    })
}

async fn charge<R>(
    gateway: &dyn PaymentGateway,
    product: &Product,
    user: &User,
    token: &str,
    repo: &R,
) -> Result<Charge, PurchaseError>
where
    R: PaymentRepository + ?Sized,
{
    // anything the ledger would refuse must be refused before the card is charged
    NewTransaction::for_product(product, user.id, token).validate()?;
    if repo.transaction_by_token(token).await?.is_some() {
        return Err(PurchaseError::TokenAlreadyUsed);
    }

    let charge = gateway
        .create_charge(ChargeRequest::usd(
            product.cost,
            product.description.clone(),
            token,
        ))
        .await?;
    info!(user = %user.id, product = %product.tag, amount = %product.cost, charge = %charge.id, "charged card");

    Ok(charge)
}

fn transaction_for(product: &Product, user: &User, token: &str, charge: &Charge) -> NewTransaction {
    NewTransaction {
        customer_id: charge.customer.clone(),
        charge_id: Some(charge.id.clone()),
        ..NewTransaction::for_product(product, user.id, token)
    }
}

/// The outcome of a purchase for the page that made it.
pub fn purchase_outcome(result: &Result<Receipt, PurchaseError>, retry_page: &str) -> Outcome<()> {
    match result {
        Ok(receipt) => Outcome::redirect_with(
            "/",
            Flash::success(format!(
                "Thank you for your purchase of {}!",
                receipt.product.name
            )),
        ),
        Err(error) => error.outcome(retry_page),
    }
}
