//! Input objects for the mutations, and their conversion into the
//! domain's own field structs.

use async_graphql::{InputObject, MaybeUndefined, ID};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::event::{EventFields, EventUpdate, FlierUpload};
use crate::models::money::{Money, NewProduct, NewTransaction, ProductUpdate};
use crate::models::sig::{SigFields, SigUpdate};
use crate::models::user::{RegistrationFields, UserUpdate};
use crate::models::DateTime;

/// Parses a GraphQL ID, naming `field` if it isn't a valid id.
pub fn parse_id(id: &ID, field: &str) -> AppResult<Uuid> {
    Uuid::parse_str(id.as_str())
        .map_err(|_| AppError::invalid(field, format!("`{}` is not a valid id.", id.as_str())))
}

fn parse_optional_id(id: Option<&ID>, field: &str) -> AppResult<Option<Uuid>> {
    id.map(|id| parse_id(id, field)).transpose()
}

/// Undefined leaves a value alone, null clears it.
fn maybe<T>(value: MaybeUndefined<T>) -> Option<Option<T>> {
    match value {
        MaybeUndefined::Undefined => None,
        MaybeUndefined::Null => Some(None),
        MaybeUndefined::Value(value) => Some(Some(value)),
    }
}

#[derive(InputObject)]
pub struct NewUserInput {
    pub email: String,
    #[graphql(default)]
    pub first_name: String,
    #[graphql(default)]
    pub last_name: String,
    pub is_active: Option<bool>,
    pub is_staff: Option<bool>,
    pub is_superuser: Option<bool>,
}

impl NewUserInput {
    pub fn into_fields(self) -> (String, RegistrationFields) {
        (
            self.email,
            RegistrationFields {
                first_name: self.first_name,
                last_name: self.last_name,
                is_active: self.is_active,
                is_staff: self.is_staff,
                is_superuser: self.is_superuser,
            },
        )
    }
}

#[derive(InputObject)]
pub struct UserUpdateInput {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub membership_expiration: MaybeUndefined<DateTime>,
    pub is_active: Option<bool>,
    pub is_staff: Option<bool>,
    pub is_superuser: Option<bool>,
}

impl From<UserUpdateInput> for UserUpdate {
    fn from(input: UserUpdateInput) -> Self {
        UserUpdate {
            email: input.email,
            first_name: input.first_name,
            last_name: input.last_name,
            membership_expiration: maybe(input.membership_expiration)
                .map(|expiration| expiration.map(Into::into)),
            is_active: input.is_active,
            is_staff: input.is_staff,
            is_superuser: input.is_superuser,
        }
    }
}

#[derive(InputObject)]
pub struct NewSigInput {
    pub id: Option<String>,
    pub founder: Option<ID>,
    pub chair: Option<ID>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

impl NewSigInput {
    pub fn into_fields(self) -> AppResult<SigFields> {
        Ok(SigFields {
            id: self.id,
            founder: parse_optional_id(self.founder.as_ref(), "founder")?,
            chair: parse_optional_id(self.chair.as_ref(), "chair")?,
            description: self.description,
            is_active: self.is_active,
        })
    }
}

#[derive(InputObject)]
pub struct SigUpdateInput {
    pub chair: Option<ID>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

impl SigUpdateInput {
    pub fn into_update(self) -> AppResult<SigUpdate> {
        Ok(SigUpdate {
            chair_id: parse_optional_id(self.chair.as_ref(), "chair")?,
            description: self.description,
            is_active: self.is_active,
        })
    }
}

/// A file sent inline as base64.
#[derive(InputObject)]
pub struct FileUpload {
    pub file_name: String,
    pub content: String,
}

impl FileUpload {
    pub fn decode(&self) -> AppResult<FlierUpload> {
        FlierUpload::from_base64(&self.file_name, &self.content)
    }
}

#[derive(InputObject)]
pub struct NewEventInput {
    pub hosting_sig: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub presenter: Option<String>,
    pub cost: Option<Money>,
    pub date_hosted: Option<DateTime>,
    pub date_expire: Option<DateTime>,
    pub link: Option<String>,
    pub flier: Option<FileUpload>,
}

impl NewEventInput {
    pub fn into_fields(self) -> AppResult<(EventFields, Option<FlierUpload>)> {
        let flier = self.flier.as_ref().map(FileUpload::decode).transpose()?;
        let fields = EventFields {
            hosting_sig: self.hosting_sig,
            title: self.title,
            description: self.description,
            location: self.location,
            presenter: self.presenter,
            cost: self.cost,
            date_hosted: self.date_hosted.map(Into::into),
            date_expire: self.date_expire.map(Into::into),
            flier: None,
            link: self.link,
        };

        Ok((fields, flier))
    }
}

#[derive(InputObject)]
pub struct EventUpdateInput {
    pub hosting_sig: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub presenter: MaybeUndefined<String>,
    pub cost: Option<Money>,
    pub date_hosted: Option<DateTime>,
    pub date_expire: Option<DateTime>,
    pub link: MaybeUndefined<String>,
}

impl From<EventUpdateInput> for EventUpdate {
    fn from(input: EventUpdateInput) -> Self {
        EventUpdate {
            hosting_sig: input.hosting_sig,
            title: input.title,
            description: input.description,
            location: input.location,
            presenter: maybe(input.presenter),
            cost: input.cost,
            date_hosted: input.date_hosted.map(Into::into),
            date_expire: input.date_expire.map(Into::into),
            flier: None,
            link: maybe(input.link),
        }
    }
}

#[derive(InputObject)]
pub struct NewProductInput {
    pub tag: String,
    pub name: String,
    pub cost: Money,
    pub description: String,
    pub category: ID,
    pub sig: String,
}

impl NewProductInput {
    pub fn into_new_product(self) -> AppResult<NewProduct> {
        Ok(NewProduct {
            category_id: parse_id(&self.category, "category")?,
            tag: self.tag,
            name: self.name,
            cost: self.cost,
            description: self.description,
            sig_id: self.sig,
        })
    }
}

#[derive(InputObject)]
pub struct ProductUpdateInput {
    pub name: Option<String>,
    pub cost: Option<Money>,
    pub description: Option<String>,
    pub category: Option<ID>,
    pub sig: Option<String>,
}

impl ProductUpdateInput {
    pub fn into_update(self) -> AppResult<ProductUpdate> {
        Ok(ProductUpdate {
            category_id: parse_optional_id(self.category.as_ref(), "category")?,
            name: self.name,
            cost: self.cost,
            description: self.description,
            sig_id: self.sig,
        })
    }
}

/// A ledger entry recorded by hand, like a sponsor's cheque.
#[derive(InputObject)]
pub struct NewTransactionInput {
    pub description: String,
    pub category: ID,
    pub sig: String,
    pub cost: Money,
    pub user: Option<ID>,
    pub stripe_token: String,
    pub customer_id: Option<String>,
    pub coupon_id: Option<String>,
    pub subscription_id: Option<String>,
    pub charge_id: Option<String>,
}

impl NewTransactionInput {
    pub fn into_new_transaction(self) -> AppResult<NewTransaction> {
        Ok(NewTransaction {
            category_id: parse_id(&self.category, "category")?,
            user_id: parse_optional_id(self.user.as_ref(), "user")?,
            description: self.description,
            sig_id: self.sig,
            cost: self.cost,
            stripe_token: self.stripe_token,
            customer_id: self.customer_id,
            coupon_id: self.coupon_id,
            subscription_id: self.subscription_id,
            charge_id: self.charge_id,
        })
    }
}
