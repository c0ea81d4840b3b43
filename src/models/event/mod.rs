use async_graphql::{ComplexObject, Context, Result, ResultExt, SimpleObject, ID};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::config::MediaConfig;
use crate::db::{EventRepository, SigRepository, UserRepository};
use crate::error::{AppError, AppResult, FieldErrors};
use crate::graphql::app_state;
use crate::models::money::Money;
use crate::models::sig::Sig;
use crate::models::user::User;
use crate::models::DateTime;
use crate::util::current_time;

pub mod flier;
mod participation;

pub use flier::{flier_path, FlierUpload};
pub use participation::EventParticipation;

pub const MAX_TITLE_LENGTH: usize = 256;
pub const MAX_DESCRIPTION_LENGTH: usize = 1000;
pub const MAX_LOCATION_LENGTH: usize = 256;
pub const MAX_PRESENTER_LENGTH: usize = 256;
pub const MAX_LINK_LENGTH: usize = 200;

/// The URL prefix stored media is served under.
pub const MEDIA_URL: &str = "/media_files/";

/// Something a SIG is hosting.
#[derive(SimpleObject, Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
#[graphql(complex)]
pub struct Event {
    #[graphql(skip)]
    pub id: Uuid,
    #[graphql(skip)]
    pub date_created: OffsetDateTime,
    #[graphql(skip)]
    pub date_hosted: OffsetDateTime,
    #[graphql(skip)]
    pub date_expire: OffsetDateTime,
    #[graphql(skip)]
    pub creator_id: Uuid,
    /// The id of the hosting SIG
    pub hosting_sig: String,
    /// The name of the event
    pub title: String,
    /// What the event is about
    pub description: String,
    /// Where the event happens
    pub location: String,
    /// Who is presenting, if anyone
    pub presenter: Option<String>,
    /// How much it costs to attend
    pub cost: Money,
    /// Where the flier is stored, relative to the media root
    pub flier: Option<String>,
    /// An optional link for more information
    pub link: Option<String>,
}

#[ComplexObject]
impl Event {
    /// The ID of the event
    pub async fn id(&self) -> ID {
        ID(self.id.to_string())
    }

    /// When the event was created
    pub async fn date_created(&self) -> DateTime {
        DateTime(self.date_created)
    }

    /// When the event happens
    pub async fn date_hosted(&self) -> DateTime {
        DateTime(self.date_hosted)
    }

    /// When the event stops being advertised
    pub async fn date_expire(&self) -> DateTime {
        DateTime(self.date_expire)
    }

    /// Whether the event is still being advertised
    pub async fn active(&self) -> bool {
        self.is_active_at(current_time())
    }

    /// The URL the flier can be viewed at
    pub async fn flier_url(&self) -> Option<String> {
        self.media_url()
    }

    /// Who created the event
    pub async fn creator(&self, ctx: &Context<'_>) -> Result<User> {
        User::with_id(self.creator_id, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    /// The SIG hosting the event
    pub async fn sig(&self, ctx: &Context<'_>) -> Result<Sig> {
        Sig::with_id(&self.hosting_sig, app_state(ctx).store.as_ref())
            .await
            .extend()
    }

    /// Everyone who said they're coming
    pub async fn participants(&self, ctx: &Context<'_>) -> Result<Vec<User>> {
        EventParticipation::participants(self.id, app_state(ctx).store.as_ref())
            .await
            .extend()
    }
}

/// Caller-supplied fields for a new event.
#[derive(Clone, Debug, Default)]
pub struct EventFields {
    pub hosting_sig: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub presenter: Option<String>,
    pub cost: Option<Money>,
    pub date_hosted: Option<OffsetDateTime>,
    pub date_expire: Option<OffsetDateTime>,
    pub flier: Option<String>,
    pub link: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NewEvent {
    pub creator_id: Uuid,
    pub hosting_sig: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub presenter: Option<String>,
    pub cost: Money,
    pub date_hosted: OffsetDateTime,
    pub date_expire: OffsetDateTime,
    pub flier: Option<String>,
    pub link: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct EventUpdate {
    pub hosting_sig: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub presenter: Option<Option<String>>,
    pub cost: Option<Money>,
    pub date_hosted: Option<OffsetDateTime>,
    pub date_expire: Option<OffsetDateTime>,
    pub flier: Option<Option<String>>,
    pub link: Option<Option<String>>,
}

impl Event {
    pub fn is_active_at(&self, now: OffsetDateTime) -> bool {
        self.date_expire >= now
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(current_time())
    }

    pub fn media_url(&self) -> Option<String> {
        self.flier
            .as_ref()
            .map(|flier| format!("{MEDIA_URL}{flier}"))
    }

    pub async fn with_id<R>(id: Uuid, repo: &R) -> AppResult<Self>
    where
        R: EventRepository + ?Sized,
    {
        repo.event_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("event {id}")))
    }

    pub async fn with_title<R>(title: &str, repo: &R) -> AppResult<Self>
    where
        R: EventRepository + ?Sized,
    {
        repo.event_by_title(title)
            .await?
            .ok_or_else(|| AppError::not_found(format!("event {title}")))
    }

    pub async fn all<R>(repo: &R) -> AppResult<Vec<Self>>
    where
        R: EventRepository + ?Sized,
    {
        repo.events().await
    }

    /// Up to `max_count` unexpired events, soonest first.
    pub async fn list_upcoming<R>(max_count: usize, repo: &R) -> AppResult<Vec<Self>>
    where
        R: EventRepository + ?Sized,
    {
        repo.upcoming_events(current_time(), max_count).await
    }

    pub async fn count_upcoming<R>(repo: &R) -> AppResult<usize>
    where
        R: EventRepository + ?Sized,
    {
        repo.count_upcoming_events(current_time()).await
    }

    /// The checks an event submitted through a form must pass: both dates
    /// present and in the future, and the expiration no earlier than the
    /// hosting date. Every failure is reported, not just the first.
    pub fn validate_form(fields: &EventFields, now: OffsetDateTime) -> AppResult<()> {
        let mut errors = FieldErrors::new();

        match fields.date_expire {
            None => errors.add("date_expire", "Please fill out the expiration date field."),
            Some(expire) if expire < now => errors.add(
                "date_expire",
                "The expiration date shouldn't be before the current date!",
            ),
            Some(_) => {}
        }
        match fields.date_hosted {
            None => errors.add("date_hosted", "Please fill out the host date field."),
            Some(hosted) if hosted < now => errors.add(
                "date_hosted",
                "The host date shouldn't be before the current date!",
            ),
            Some(_) => {}
        }
        if let (Some(hosted), Some(expire)) = (fields.date_hosted, fields.date_expire) {
            if expire < hosted {
                errors.add(
                    "date_expire",
                    "The expiration date shouldn't be before the host date!",
                );
            }
        }

        errors.into_result()
    }

    /// Creates an event. Both dates are required and the event may not
    /// expire before it is hosted, whichever way the event came in.
    pub async fn create_event<R>(creator_id: Uuid, fields: EventFields, repo: &R) -> AppResult<Self>
    where
        R: EventRepository + SigRepository + UserRepository + ?Sized,
    {
        let mut errors = FieldErrors::new();
        if fields.date_hosted.is_none() {
            errors.add("date_hosted", "An event must have a date hosted.");
        }
        if fields.date_expire.is_none() {
            errors.add("date_expire", "An event must have an expiration date.");
        }
        let (date_hosted, date_expire) = match (fields.date_hosted, fields.date_expire) {
            (Some(hosted), Some(expire)) => (hosted, expire),
            _ => return Err(AppError::Validation(errors)),
        };
        if date_expire < date_hosted {
            errors.add(
                "date_expire",
                "An event can't expire before it is hosted.",
            );
        }

        let cost = fields.cost.unwrap_or(Money::ZERO);
        check_text(&mut errors, "title", &fields.title, MAX_TITLE_LENGTH, true);
        check_text(
            &mut errors,
            "description",
            &fields.description,
            MAX_DESCRIPTION_LENGTH,
            true,
        );
        check_text(&mut errors, "location", &fields.location, MAX_LOCATION_LENGTH, true);
        if let Some(presenter) = &fields.presenter {
            check_text(&mut errors, "presenter", presenter, MAX_PRESENTER_LENGTH, false);
        }
        if cost < Money::ZERO {
            errors.add("cost", "An event can't cost less than nothing.");
        }
        if let Some(link) = &fields.link {
            check_link(&mut errors, link);
        }
        if repo.sig_by_id(&fields.hosting_sig).await?.is_none() {
            errors.add("hosting_sig", format!("No SIG with id {}.", fields.hosting_sig));
        }
        if repo.user_by_id(creator_id).await?.is_none() {
            errors.add("creator", format!("No user with id {creator_id}."));
        }
        errors.into_result()?;

        let event = repo
            .insert_event(NewEvent {
                creator_id,
                hosting_sig: fields.hosting_sig,
                title: fields.title.trim().to_owned(),
                description: fields.description,
                location: fields.location,
                presenter: fields.presenter.filter(|presenter| !presenter.trim().is_empty()),
                cost,
                date_hosted,
                date_expire,
                flier: fields.flier,
                link: fields.link.filter(|link| !link.trim().is_empty()),
            })
            .await?;
        info!(event = %event.id, title = %event.title, sig = %event.hosting_sig, "created event");

        Ok(event)
    }

    /// Stores the uploaded flier, then creates the event pointing at it.
    /// The flier is removed again if the event is refused.
    pub async fn create_with_flier<R>(
        creator_id: Uuid,
        mut fields: EventFields,
        upload: Option<FlierUpload>,
        media: &MediaConfig,
        repo: &R,
    ) -> AppResult<Self>
    where
        R: EventRepository + SigRepository + UserRepository + ?Sized,
    {
        let saved = match (upload, fields.date_hosted) {
            (Some(upload), Some(date_hosted)) => Some(upload.save(media, date_hosted).await?),
            _ => None,
        };
        if saved.is_some() {
            fields.flier = saved.clone();
        }

        let result = Self::create_event(creator_id, fields, repo).await;
        if let (Err(_), Some(path)) = (&result, &saved) {
            flier::remove(media, path).await;
        }

        result
    }

    pub async fn update<R>(id: Uuid, update: EventUpdate, repo: &R) -> AppResult<Self>
    where
        R: EventRepository + SigRepository + ?Sized,
    {
        let current = Self::with_id(id, repo).await?;

        let mut errors = FieldErrors::new();
        let hosted = update.date_hosted.unwrap_or(current.date_hosted);
        let expire = update.date_expire.unwrap_or(current.date_expire);
        if expire < hosted {
            errors.add("date_expire", "An event can't expire before it is hosted.");
        }
        if let Some(title) = &update.title {
            check_text(&mut errors, "title", title, MAX_TITLE_LENGTH, true);
        }
        if let Some(description) = &update.description {
            check_text(
                &mut errors,
                "description",
                description,
                MAX_DESCRIPTION_LENGTH,
                true,
            );
        }
        if let Some(location) = &update.location {
            check_text(&mut errors, "location", location, MAX_LOCATION_LENGTH, true);
        }
        if let Some(Some(presenter)) = &update.presenter {
            check_text(&mut errors, "presenter", presenter, MAX_PRESENTER_LENGTH, false);
        }
        if update.cost.map_or(false, |cost| cost < Money::ZERO) {
            errors.add("cost", "An event can't cost less than nothing.");
        }
        if let Some(Some(link)) = &update.link {
            check_link(&mut errors, link);
        }
        if let Some(sig) = &update.hosting_sig {
            if repo.sig_by_id(sig).await?.is_none() {
                errors.add("hosting_sig", format!("No SIG with id {sig}."));
            }
        }
        errors.into_result()?;

        let event = repo.update_event(id, update).await?;
        info!(event = %event.id, "updated event");

        Ok(event)
    }

    /// Deletes the event along with its stored flier.
    pub async fn delete<R>(id: Uuid, media: &MediaConfig, repo: &R) -> AppResult<()>
    where
        R: EventRepository + ?Sized,
    {
        let event = Self::with_id(id, repo).await?;
        repo.delete_event(id).await?;
        if let Some(flier) = &event.flier {
            flier::remove(media, flier).await;
        }
        info!(event = %id, "deleted event");

        Ok(())
    }
}

fn check_text(errors: &mut FieldErrors, field: &str, value: &str, max: usize, required: bool) {
    if required && value.trim().is_empty() {
        errors.add(field, format!("Please fill out the {field} field."));
    } else if value.chars().count() > max {
        errors.add(field, format!("The {field} may be at most {max} characters."));
    }
}

/// Links must be absolute web addresses.
fn check_link(errors: &mut FieldErrors, link: &str) {
    let link = link.trim();
    if link.is_empty() {
        return;
    }
    if link.chars().count() > MAX_LINK_LENGTH {
        errors.add("link", format!("The link may be at most {MAX_LINK_LENGTH} characters."));
        return;
    }
    match url::Url::parse(link) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        _ => errors.add("link", "Enter a valid URL."),
    }
}
