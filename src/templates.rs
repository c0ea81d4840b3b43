//! Server-rendered pages.

use askama::Template;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::error::{AppResult, FieldErrors};
use crate::models::event::Event;
use crate::models::membership::{MembershipType, MEMBERSHIP_TYPES};
use crate::models::money::{Money, Product};
use crate::models::sig::Sig;
use crate::models::user::User;
use crate::outcome::Flash;
use crate::util::current_time;

const DISPLAY_FORMAT: &[FormatItem<'static>] = format_description!(
    "[month repr:long] [day padding:none], [year] [hour repr:12 padding:none]:[minute] [period]"
);

pub fn render(template: &impl Template) -> AppResult<Response> {
    Ok(Html(template.render()?).into_response())
}

pub fn render_with_status(status: StatusCode, template: &impl Template) -> AppResult<Response> {
    Ok((status, Html(template.render()?)).into_response())
}

fn display_time(time: OffsetDateTime) -> String {
    time.format(DISPLAY_FORMAT).unwrap_or_default()
}

fn display_cost(cost: Money) -> String {
    if cost == Money::ZERO {
        "Free".to_owned()
    } else {
        format!("${cost}")
    }
}

/// What the navigation bar shows about the current user.
pub struct Nav {
    pub logged_in: bool,
    pub display_name: String,
    pub is_member: bool,
    pub is_superuser: bool,
}

impl Nav {
    pub fn new(user: Option<&User>) -> Self {
        match user {
            Some(user) => Self {
                logged_in: true,
                display_name: user.short_name().to_owned(),
                is_member: user.is_member_at(current_time()),
                is_superuser: user.is_superuser,
            },
            None => Self {
                logged_in: false,
                display_name: String::new(),
                is_member: false,
                is_superuser: false,
            },
        }
    }
}

/// An event as the pages show it. Empty strings are left out.
pub struct EventCard {
    pub title: String,
    pub description: String,
    pub location: String,
    pub presenter: String,
    pub sig: String,
    pub cost: String,
    pub date_hosted: String,
    pub date_expire: String,
    pub flier_url: String,
    pub link: String,
    pub active: bool,
}

impl From<&Event> for EventCard {
    fn from(event: &Event) -> Self {
        Self {
            title: event.title.clone(),
            description: event.description.clone(),
            location: event.location.clone(),
            presenter: event.presenter.clone().unwrap_or_default(),
            sig: event.hosting_sig.clone(),
            cost: display_cost(event.cost),
            date_hosted: display_time(event.date_hosted),
            date_expire: display_time(event.date_expire),
            flier_url: event.media_url().unwrap_or_default(),
            link: event.link.clone().unwrap_or_default(),
            active: event.is_active(),
        }
    }
}

pub struct ProductRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub cost: String,
    pub cents: i64,
}

impl From<&Product> for ProductRow {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id.to_string(),
            name: product.name.clone(),
            description: product.description.clone(),
            cost: display_cost(product.cost),
            cents: product.cost.cents(),
        }
    }
}

pub struct MembershipOption {
    pub name: &'static str,
    pub display_name: &'static str,
    pub weeks: i64,
    pub cost: String,
    pub cents: i64,
}

impl MembershipOption {
    /// The membership types that have a product to sell.
    pub fn available(products: &[Product]) -> Vec<Self> {
        MEMBERSHIP_TYPES
            .iter()
            .filter_map(|membership: &MembershipType| {
                products
                    .iter()
                    .find(|product| product.tag == membership.tag)
                    .map(|product| Self {
                        name: membership.name,
                        display_name: membership.display_name,
                        weeks: membership.weeks,
                        cost: display_cost(product.cost),
                        cents: product.cost.cents(),
                    })
            })
            .collect()
    }
}

pub struct ErrorLine {
    pub field: String,
    pub reason: String,
}

pub fn error_lines(errors: &FieldErrors) -> Vec<ErrorLine> {
    errors
        .fields()
        .flat_map(|field| {
            errors.get(field).iter().map(move |reason| ErrorLine {
                field: field.to_owned(),
                reason: reason.clone(),
            })
        })
        .collect()
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexPage {
    pub nav: Nav,
    pub flashes: Vec<Flash>,
    pub events: Vec<EventCard>,
    pub total_upcoming: usize,
}

#[derive(Template)]
#[template(path = "events.html")]
pub struct EventsPage {
    pub nav: Nav,
    pub flashes: Vec<Flash>,
    pub events: Vec<EventCard>,
}

/// The raw values of the event form, kept to refill it after an error.
#[derive(Debug, Default)]
pub struct EventFormValues {
    pub hosting_sig: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub presenter: String,
    pub cost: String,
    pub date_hosted: String,
    pub date_expire: String,
    pub link: String,
}

#[derive(Template)]
#[template(path = "create-event.html")]
pub struct CreateEventPage {
    pub nav: Nav,
    pub flashes: Vec<Flash>,
    pub sigs: Vec<Sig>,
    pub values: EventFormValues,
    pub errors: Vec<ErrorLine>,
}

#[derive(Template)]
#[template(path = "membership.html")]
pub struct MembershipPage {
    pub nav: Nav,
    pub flashes: Vec<Flash>,
    pub memberships: Vec<MembershipOption>,
    pub products: Vec<ProductRow>,
    pub stripe_public_key: String,
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginPage {
    pub nav: Nav,
    pub flashes: Vec<Flash>,
    pub google_enabled: bool,
    pub next: String,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorPage {
    pub nav: Nav,
    pub flashes: Vec<Flash>,
    pub status: u16,
    pub message: String,
}
