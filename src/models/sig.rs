use async_graphql::{ComplexObject, Context, Result, ResultExt, SimpleObject};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::db::{SigRepository, UserRepository};
use crate::error::{AppError, AppResult, FieldErrors};
use crate::graphql::app_state;
use crate::models::user::User;
use crate::models::DateTime;

pub const MAX_SIG_ID_LENGTH: usize = 25;

/// A special interest group within the club.
#[derive(SimpleObject, Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
#[graphql(complex)]
pub struct Sig {
    /// The SIG's chosen, unique id
    pub id: String,
    /// Whether the SIG is currently running
    pub is_active: bool,
    #[graphql(skip)]
    pub date_created: OffsetDateTime,
    #[graphql(skip)]
    pub founder_id: Uuid,
    #[graphql(skip)]
    pub chair_id: Uuid,
    /// What the SIG is about
    pub description: String,
}

#[ComplexObject]
impl Sig {
    /// When the SIG was created
    pub async fn date_created(&self) -> DateTime {
        DateTime(self.date_created)
    }

    /// The user who founded the SIG
    pub async fn founder(&self, ctx: &Context<'_>) -> Result<User> {
        User::with_id(self.founder_id, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    /// The SIG's current chair
    pub async fn chair(&self, ctx: &Context<'_>) -> Result<User> {
        User::with_id(self.chair_id, app_state(ctx).store.as_ref())
            .await
            .extend()
    }
}

/// Caller-supplied fields for a new SIG, checked by [Sig::create_sig].
#[derive(Clone, Debug, Default)]
pub struct SigFields {
    pub id: Option<String>,
    pub founder: Option<Uuid>,
    /// Defaults to the founder.
    pub chair: Option<Uuid>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Clone, Debug)]
pub struct NewSig {
    pub id: String,
    pub founder_id: Uuid,
    pub chair_id: Uuid,
    pub description: String,
    pub is_active: bool,
}

#[derive(Clone, Debug, Default)]
pub struct SigUpdate {
    pub chair_id: Option<Uuid>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

impl Sig {
    pub async fn with_id<R>(id: &str, repo: &R) -> AppResult<Self>
    where
        R: SigRepository + ?Sized,
    {
        Self::get_by_id(id, repo).await
    }

    pub async fn get_by_id<R>(id: &str, repo: &R) -> AppResult<Self>
    where
        R: SigRepository + ?Sized,
    {
        repo.sig_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("SIG {id}")))
    }

    pub async fn all<R>(is_active: Option<bool>, repo: &R) -> AppResult<Vec<Self>>
    where
        R: SigRepository + ?Sized,
    {
        repo.sigs(is_active).await
    }

    /// Creates a SIG, active from now unless told otherwise.
    ///
    /// The id, founder and description are required; every missing one is
    /// reported against its own field.
    pub async fn create_sig<R>(fields: SigFields, repo: &R) -> AppResult<Self>
    where
        R: SigRepository + UserRepository + ?Sized,
    {
        let mut errors = FieldErrors::new();

        let id = fields
            .id
            .map(|id| id.trim().to_owned())
            .filter(|id| !id.is_empty());
        match &id {
            None => errors.add("id", "A SIG must have an id."),
            Some(id) if id.chars().count() > MAX_SIG_ID_LENGTH => errors.add(
                "id",
                format!("A SIG id may be at most {MAX_SIG_ID_LENGTH} characters."),
            ),
            Some(_) => {}
        }
        if fields.founder.is_none() {
            errors.add("founder", "A SIG must have a founder.");
        }
        let description = fields
            .description
            .filter(|description| !description.trim().is_empty());
        if description.is_none() {
            errors.add("description", "A SIG must have a description.");
        }

        let (id, founder_id, description) = match (id, fields.founder, description) {
            (Some(id), Some(founder), Some(description)) if errors.is_empty() => {
                (id, founder, description)
            }
            _ => return Err(AppError::Validation(errors)),
        };
        let chair_id = fields.chair.unwrap_or(founder_id);

        let mut errors = FieldErrors::new();
        if repo.user_by_id(founder_id).await?.is_none() {
            errors.add("founder", format!("No user with id {founder_id}."));
        }
        if repo.user_by_id(chair_id).await?.is_none() {
            errors.add("chair", format!("No user with id {chair_id}."));
        }
        errors.into_result()?;

        let sig = repo
            .insert_sig(NewSig {
                id,
                founder_id,
                chair_id,
                description,
                is_active: fields.is_active.unwrap_or(true),
            })
            .await?;
        info!(sig = %sig.id, founder = %sig.founder_id, "created SIG");

        Ok(sig)
    }

    /// Hands the SIG to a new chair.
    pub async fn set_chair<R>(id: &str, chair_id: Uuid, repo: &R) -> AppResult<Self>
    where
        R: SigRepository + UserRepository + ?Sized,
    {
        Self::update(
            id,
            SigUpdate {
                chair_id: Some(chair_id),
                ..SigUpdate::default()
            },
            repo,
        )
        .await
    }

    pub async fn update<R>(id: &str, update: SigUpdate, repo: &R) -> AppResult<Self>
    where
        R: SigRepository + UserRepository + ?Sized,
    {
        Self::get_by_id(id, repo).await?;
        if let Some(chair_id) = update.chair_id {
            if repo.user_by_id(chair_id).await?.is_none() {
                return Err(AppError::invalid(
                    "chair",
                    format!("No user with id {chair_id}."),
                ));
            }
        }
        if let Some(description) = &update.description {
            if description.trim().is_empty() {
                return Err(AppError::invalid(
                    "description",
                    "A SIG must have a description.",
                ));
            }
        }

        let sig = repo.update_sig(id, update).await?;
        info!(sig = %sig.id, chair = %sig.chair_id, active = sig.is_active, "updated SIG");

        Ok(sig)
    }

    pub async fn delete<R>(id: &str, repo: &R) -> AppResult<()>
    where
        R: SigRepository + ?Sized,
    {
        Self::get_by_id(id, repo).await?;
        repo.delete_sig(id).await?;
        info!(sig = %id, "deleted SIG");

        Ok(())
    }
}
