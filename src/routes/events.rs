use std::sync::Arc;

use axum::extract::Multipart;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Extension;
use time::format_description::well_known::Rfc3339;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::error::{AppError, AppResult, FieldErrors};
use crate::models::event::{Event, EventFields, FlierUpload};
use crate::models::money::Money;
use crate::models::sig::Sig;
use crate::models::user::User;
use crate::outcome::{Flash, Outcome};
use crate::routes::respond;
use crate::routes::session::Session;
use crate::state::AppState;
use crate::templates::{
    error_lines, render, render_with_status, CreateEventPage, EventCard, EventFormValues,
    EventsPage, Nav,
};
use crate::util::current_time;

const FORM_DATETIME_FORMATS: [&[FormatItem<'static>]; 3] = [
    format_description!("[year]-[month]-[day]T[hour]:[minute]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]"),
];

/// Every event, earliest first.
pub async fn list(
    Extension(state): Extension<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Response {
    let outcome = list_page(&state, &session)
        .await
        .unwrap_or_else(Outcome::from);
    respond(&session, outcome).await
}

async fn list_page(state: &AppState, session: &Session) -> AppResult<Outcome<Response>> {
    let user = session.current_user().await?;
    let events = Event::all(state.store.as_ref()).await?;
    let page = EventsPage {
        nav: Nav::new(user.as_ref()),
        flashes: session.take_flashes().await?,
        events: events.iter().map(EventCard::from).collect(),
    };

    Ok(Outcome::Success(render(&page)?))
}

pub async fn create_page(
    Extension(state): Extension<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Response {
    let outcome = blank_form(&state, &session)
        .await
        .unwrap_or_else(Outcome::from);
    respond(&session, outcome).await
}

pub async fn create(
    Extension(state): Extension<Arc<AppState>>,
    Extension(session): Extension<Session>,
    multipart: Multipart,
) -> Response {
    let outcome = submit_event(&state, &session, multipart)
        .await
        .unwrap_or_else(Outcome::from);
    respond(&session, outcome).await
}

/// Event creation is hidden from everyone but superusers.
async fn superuser(session: &Session) -> AppResult<Option<User>> {
    Ok(session
        .current_user()
        .await?
        .filter(|user| user.is_superuser))
}

fn not_found() -> Outcome<Response> {
    Outcome::client_error(StatusCode::NOT_FOUND, "Page not found")
}

async fn blank_form(state: &AppState, session: &Session) -> AppResult<Outcome<Response>> {
    match superuser(session).await? {
        Some(user) => form_page(
            state,
            session,
            &user,
            EventFormValues::default(),
            &FieldErrors::new(),
            StatusCode::OK,
        )
        .await
        .map(Outcome::Success),
        None => Ok(not_found()),
    }
}

async fn form_page(
    state: &AppState,
    session: &Session,
    user: &User,
    values: EventFormValues,
    errors: &FieldErrors,
    status: StatusCode,
) -> AppResult<Response> {
    let page = CreateEventPage {
        nav: Nav::new(Some(user)),
        flashes: session.take_flashes().await?,
        sigs: Sig::all(Some(true), state.store.as_ref()).await?,
        values,
        errors: error_lines(errors),
    };

    render_with_status(status, &page)
}

async fn submit_event(
    state: &AppState,
    session: &Session,
    multipart: Multipart,
) -> AppResult<Outcome<Response>> {
    let user = match superuser(session).await? {
        Some(user) => user,
        None => return Ok(not_found()),
    };

    let EventSubmission { values, flier } = EventSubmission::read(multipart).await?;
    let (fields, mut errors) = values.to_fields();
    if let Err(AppError::Validation(form_errors)) = Event::validate_form(&fields, current_time()) {
        errors.merge(form_errors);
    }
    let upload = match flier {
        Some((file_name, content)) if !content.is_empty() => {
            match FlierUpload::new(&file_name, content) {
                Ok(upload) => Some(upload),
                Err(AppError::Validation(flier_errors)) => {
                    errors.merge(flier_errors);
                    None
                }
                Err(err) => return Err(err),
            }
        }
        _ => None,
    };
    if !errors.is_empty() {
        return form_page(state, session, &user, values, &errors, StatusCode::BAD_REQUEST)
            .await
            .map(Outcome::Success);
    }

    match Event::create_with_flier(
        user.id,
        fields,
        upload,
        &state.config.media,
        state.store.as_ref(),
    )
    .await
    {
        Ok(event) => Ok(Outcome::redirect_with(
            "/",
            Flash::success(format!("{} has been created.", event.title)),
        )),
        Err(AppError::Validation(errors)) => {
            form_page(state, session, &user, values, &errors, StatusCode::BAD_REQUEST)
                .await
                .map(Outcome::Success)
        }
        Err(err) => Err(err),
    }
}

struct EventSubmission {
    values: EventFormValues,
    flier: Option<(String, Vec<u8>)>,
}

impl EventSubmission {
    async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut values = EventFormValues::default();
        let mut flier = None;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| AppError::invalid("form", err.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_owned();
            if name == "flier" {
                let file_name = field.file_name().unwrap_or_default().to_owned();
                let content = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::invalid("flier", err.to_string()))?;
                flier = Some((file_name, content.to_vec()));
                continue;
            }

            let text = field
                .text()
                .await
                .map_err(|err| AppError::invalid(&name, err.to_string()))?;
            match name.as_str() {
                "hosting_sig" => values.hosting_sig = text,
                "title" => values.title = text,
                "description" => values.description = text,
                "location" => values.location = text,
                "presenter" => values.presenter = text,
                "cost" => values.cost = text,
                "date_hosted" => values.date_hosted = text,
                "date_expire" => values.date_expire = text,
                "link" => values.link = text,
                _ => {}
            }
        }

        Ok(Self { values, flier })
    }
}

impl EventFormValues {
    /// The typed fields, plus errors for any value that didn't parse.
    fn to_fields(&self) -> (EventFields, FieldErrors) {
        let mut errors = FieldErrors::new();
        let mut date = |field: &str, raw: &str| match parse_form_datetime(raw) {
            Ok(date) => date,
            Err(()) => {
                errors.add(field, "Enter a valid date and time.");
                None
            }
        };
        let date_hosted = date("date_hosted", &self.date_hosted);
        let date_expire = date("date_expire", &self.date_expire);

        let cost = match self.cost.trim() {
            "" => None,
            raw => match raw.trim_start_matches('$').parse::<Money>() {
                Ok(cost) => Some(cost),
                Err(_) => {
                    errors.add("cost", "Enter an amount like 5.00.");
                    None
                }
            },
        };

        let optional = |raw: &str| Some(raw.trim().to_owned()).filter(|value| !value.is_empty());
        let fields = EventFields {
            hosting_sig: self.hosting_sig.trim().to_owned(),
            title: self.title.clone(),
            description: self.description.clone(),
            location: self.location.clone(),
            presenter: optional(&self.presenter),
            cost,
            date_hosted,
            date_expire,
            flier: None,
            link: optional(&self.link),
        };

        (fields, errors)
    }
}

/// Reads a `datetime-local` input, taken as UTC. A blank value is `None`.
fn parse_form_datetime(raw: &str) -> Result<Option<OffsetDateTime>, ()> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if let Ok(date) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(Some(date));
    }

    FORM_DATETIME_FORMATS
        .iter()
        .find_map(|format| PrimitiveDateTime::parse(raw, format).ok())
        .map(|date| Some(date.assume_utc()))
        .ok_or(())
}
