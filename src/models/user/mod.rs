use async_graphql::{ComplexObject, Context, Result, ResultExt, SimpleObject, ID};
use time::{Duration, OffsetDateTime};
use tracing::info;
use uuid::Uuid;

use crate::db::UserRepository;
use crate::error::{AppError, AppResult, FieldErrors};
use crate::graphql::app_state;
use crate::graphql::guards::ensure_self_or_staff;
use crate::models::money::Transaction;
use crate::models::DateTime;
use crate::util::{current_time, normalize_email};

mod domains;

pub use domains::EmailDomains;

pub const MAX_EMAIL_LENGTH: usize = 254;
pub const MAX_NAME_LENGTH: usize = 100;

#[derive(SimpleObject, Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
#[graphql(complex)]
pub struct User {
    #[graphql(skip)]
    pub id: Uuid,
    /// The user's email, which must be unique and at an allowed domain
    pub email: String,
    /// The user's first name
    pub first_name: String,
    /// The user's last name
    pub last_name: String,
    #[graphql(skip)]
    pub date_joined: OffsetDateTime,
    #[graphql(skip)]
    pub membership_expiration: Option<OffsetDateTime>,
    /// Whether the account may log in. A missing flag counts as active.
    pub is_active: Option<bool>,
    /// Whether the user is an officer
    pub is_staff: bool,
    /// Whether the user can administer the whole site
    pub is_superuser: bool,
    #[graphql(skip)]
    pub password_hash: Option<String>,
}

#[ComplexObject]
impl User {
    /// The ID of the user
    pub async fn id(&self) -> ID {
        ID(self.id.to_string())
    }

    /// When the user signed up
    pub async fn date_joined(&self) -> DateTime {
        DateTime(self.date_joined)
    }

    /// When the user's membership runs out, if they ever had one
    pub async fn membership_expiration(&self) -> Option<DateTime> {
        self.membership_expiration.map(DateTime)
    }

    /// Whether the user currently holds a membership
    pub async fn is_member(&self) -> bool {
        self.is_member_at(current_time())
    }

    /// The user's full name
    #[graphql(name = "fullName")]
    pub async fn full_name_field(&self) -> String {
        self.full_name()
    }

    /// Every payment the user has made
    pub async fn transactions(&self, ctx: &Context<'_>) -> Result<Vec<Transaction>> {
        ensure_self_or_staff(ctx, self.id)?;
        app_state(ctx)
            .store
            .transactions_for_user(self.id)
            .await
            .extend()
    }
}

/// The fields of a user about to be inserted. Emails are already
/// normalized and checked against the allowed domains.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: Option<bool>,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub password_hash: Option<String>,
}

/// Optional registration fields, defaulted differently for regular users
/// and superusers.
#[derive(Clone, Debug, Default)]
pub struct RegistrationFields {
    pub first_name: String,
    pub last_name: String,
    pub is_active: Option<bool>,
    pub is_staff: Option<bool>,
    pub is_superuser: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub membership_expiration: Option<Option<OffsetDateTime>>,
    pub is_active: Option<bool>,
    pub is_staff: Option<bool>,
    pub is_superuser: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct UserFilter {
    pub email: Option<String>,
    pub is_active: Option<bool>,
    pub is_staff: Option<bool>,
    pub is_superuser: Option<bool>,
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        self.email.as_deref().map_or(true, |email| user.email == email)
            && self
                .is_active
                .map_or(true, |active| user.can_authenticate() == active)
            && self.is_staff.map_or(true, |staff| user.is_staff == staff)
            && self
                .is_superuser
                .map_or(true, |superuser| user.is_superuser == superuser)
    }
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn short_name(&self) -> &str {
        &self.email
    }

    pub fn is_admin(&self) -> bool {
        self.is_superuser
    }

    pub fn is_member_at(&self, now: OffsetDateTime) -> bool {
        self.membership_expiration
            .map_or(false, |expiration| now <= expiration)
    }

    /// Only an explicit `false` locks a user out.
    pub fn can_authenticate(&self) -> bool {
        self.is_active != Some(false)
    }

    /// The expiration after buying `delta` more membership at `now`.
    ///
    /// Current members keep their remaining time; lapsed or new members
    /// start from `now`.
    pub fn extended_expiration(&self, delta: Duration, now: OffsetDateTime) -> OffsetDateTime {
        match self.membership_expiration {
            Some(expiration) if self.is_member_at(now) => expiration + delta,
            _ => now + delta,
        }
    }

    pub async fn with_id<R>(id: Uuid, repo: &R) -> AppResult<Self>
    where
        R: UserRepository + ?Sized,
    {
        repo.user_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("user {id}")))
    }

    pub async fn with_email<R>(email: &str, repo: &R) -> AppResult<Self>
    where
        R: UserRepository + ?Sized,
    {
        repo.user_by_email(&normalize_email(email))
            .await?
            .ok_or_else(|| AppError::not_found(format!("user {email}")))
    }

    pub async fn all<R>(filter: &UserFilter, repo: &R) -> AppResult<Vec<Self>>
    where
        R: UserRepository + ?Sized,
    {
        repo.users(filter).await
    }

    /// Registers a regular user. The account has no usable password and
    /// can only log in through the identity provider.
    pub async fn register<R>(
        email: &str,
        fields: RegistrationFields,
        domains: &EmailDomains,
        repo: &R,
    ) -> AppResult<Self>
    where
        R: UserRepository + ?Sized,
    {
        let new_user = NewUser {
            email: String::new(),
            first_name: fields.first_name,
            last_name: fields.last_name,
            is_active: fields.is_active,
            is_staff: fields.is_staff.unwrap_or(false),
            is_superuser: fields.is_superuser.unwrap_or(false),
            password_hash: None,
        };

        Self::create(email, new_user, domains, repo).await
    }

    /// Registers an administrator. Staff and superuser default to on and
    /// may not be switched off; a password allows logging in without the
    /// identity provider.
    pub async fn create_superuser<R>(
        email: &str,
        fields: RegistrationFields,
        password: Option<&str>,
        domains: &EmailDomains,
        repo: &R,
    ) -> AppResult<Self>
    where
        R: UserRepository + ?Sized,
    {
        let mut errors = FieldErrors::new();
        if fields.is_staff == Some(false) {
            errors.add("is_staff", "Superuser must have is_staff=true.");
        }
        if fields.is_superuser == Some(false) {
            errors.add("is_superuser", "Superuser must have is_superuser=true.");
        }
        errors.into_result()?;

        let password_hash = password
            .map(|password| {
                bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|err| {
                    AppError::invalid("password", format!("Failed to hash password: {err}"))
                })
            })
            .transpose()?;
        let new_user = NewUser {
            email: String::new(),
            first_name: fields.first_name,
            last_name: fields.last_name,
            is_active: fields.is_active,
            is_staff: true,
            is_superuser: true,
            password_hash,
        };

        Self::create(email, new_user, domains, repo).await
    }

    async fn create<R>(
        email: &str,
        mut new_user: NewUser,
        domains: &EmailDomains,
        repo: &R,
    ) -> AppResult<Self>
    where
        R: UserRepository + ?Sized,
    {
        let email = normalize_email(email);
        domains.ensure_valid(&email)?;
        let mut errors = FieldErrors::new();
        check_length(&mut errors, "email", &email, MAX_EMAIL_LENGTH);
        check_length(&mut errors, "first_name", &new_user.first_name, MAX_NAME_LENGTH);
        check_length(&mut errors, "last_name", &new_user.last_name, MAX_NAME_LENGTH);
        errors.into_result()?;
        if repo.user_by_email(&email).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "Another user already has the email {email}"
            )));
        }

        new_user.email = email;
        let user = repo.insert_user(new_user).await?;
        info!(user = %user.id, email = %user.email, staff = user.is_staff, "registered user");

        Ok(user)
    }

    /// Finds the user that may log in with `email`, if any.
    pub async fn authenticate<R>(email: &str, repo: &R) -> AppResult<Option<Self>>
    where
        R: UserRepository + ?Sized,
    {
        Ok(repo
            .user_by_email(&normalize_email(email))
            .await?
            .filter(User::can_authenticate))
    }

    /// Checks an administrator's password. Accounts without one never match.
    pub async fn login_is_valid<R>(email: &str, password: &str, repo: &R) -> AppResult<Option<Self>>
    where
        R: UserRepository + ?Sized,
    {
        let user = match Self::authenticate(email, repo).await? {
            Some(user) => user,
            None => return Ok(None),
        };
        let hash = match &user.password_hash {
            Some(hash) => hash,
            None => return Ok(None),
        };

        let valid = bcrypt::verify(password, hash).map_err(|err| {
            AppError::configuration(format!("Stored password hash is unreadable: {err}"))
        })?;

        Ok(valid.then(|| user))
    }

    /// Resolves the user stored in a session. Malformed and unknown ids
    /// both resolve to no user, as do deactivated accounts.
    pub async fn lookup_by_id<R>(raw_id: &str, repo: &R) -> AppResult<Option<Self>>
    where
        R: UserRepository + ?Sized,
    {
        let id = match Uuid::parse_str(raw_id) {
            Ok(id) => id,
            Err(_) => return Ok(None),
        };

        Ok(repo.user_by_id(id).await?.filter(User::can_authenticate))
    }

    /// Get-or-create by email for identity provider logins, so repeat
    /// logins never duplicate accounts.
    pub async fn oauth_provision<R>(
        email: &str,
        first_name: &str,
        last_name: &str,
        domains: &EmailDomains,
        repo: &R,
    ) -> AppResult<Self>
    where
        R: UserRepository + ?Sized,
    {
        let normalized = normalize_email(email);
        domains.ensure_valid(&normalized)?;
        if let Some(existing) = repo.user_by_email(&normalized).await? {
            return Ok(existing);
        }

        // provider profiles aren't held to our column widths
        let fields = RegistrationFields {
            first_name: first_name.chars().take(MAX_NAME_LENGTH).collect(),
            last_name: last_name.chars().take(MAX_NAME_LENGTH).collect(),
            ..RegistrationFields::default()
        };
        match Self::register(&normalized, fields, domains, repo).await {
            // another request created the account between lookup and insert
            Err(AppError::Conflict(_)) => Self::with_email(&normalized, repo).await,
            result => result,
        }
    }

    /// Adds `delta` to the user's membership and saves it immediately.
    pub async fn extend_membership<R>(id: Uuid, delta: Duration, repo: &R) -> AppResult<Self>
    where
        R: UserRepository + ?Sized,
    {
        let user = repo.extend_membership(id, delta, current_time()).await?;
        info!(
            user = %user.id,
            expiration = ?user.membership_expiration,
            "extended membership"
        );

        Ok(user)
    }

    pub async fn update<R>(
        id: Uuid,
        mut update: UserUpdate,
        domains: &EmailDomains,
        repo: &R,
    ) -> AppResult<Self>
    where
        R: UserRepository + ?Sized,
    {
        let current = Self::with_id(id, repo).await?;
        let mut errors = FieldErrors::new();
        if let Some(first_name) = &update.first_name {
            check_length(&mut errors, "first_name", first_name, MAX_NAME_LENGTH);
        }
        if let Some(last_name) = &update.last_name {
            check_length(&mut errors, "last_name", last_name, MAX_NAME_LENGTH);
        }
        errors.into_result()?;
        if let Some(email) = update.email.take() {
            let email = normalize_email(&email);
            domains.ensure_valid(&email)?;
            let mut errors = FieldErrors::new();
            check_length(&mut errors, "email", &email, MAX_EMAIL_LENGTH);
            errors.into_result()?;
            if email != current.email && repo.user_by_email(&email).await?.is_some() {
                return Err(AppError::Conflict(format!(
                    "Another user already has the email {email}"
                )));
            }
            update.email = Some(email);
        }

        repo.update_user(id, update).await
    }

    pub async fn delete<R>(id: Uuid, repo: &R) -> AppResult<()>
    where
        R: UserRepository + ?Sized,
    {
        Self::with_id(id, repo).await?;
        repo.delete_user(id).await?;
        info!(user = %id, "deleted user");

        Ok(())
    }
}

fn check_length(errors: &mut FieldErrors, field: &str, value: &str, max: usize) {
    if value.chars().count() > max {
        errors.add(field, format!("The {field} may be at most {max} characters."));
    }
}
