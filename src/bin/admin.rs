//! # ACM Admin
//!
//! Maintenance tasks run against the site's database:
//!
//! ```text
//! acm-admin migrate
//! acm-admin create-superuser <email> <first name> <last name> [password]
//! acm-admin seed-memberships <sig id> <semester cost> <year cost>
//! acm-admin sweep-sessions
//! acm-admin print-schema
//! ```
//!
//! The password for `create-superuser` may also come from
//! `SUPERUSER_PASSWORD`. Without one the account can only log in through
//! Google.

use std::env;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use acm_general::config::Config;
use acm_general::db::{PgStore, SessionStore, SESSION_LIFETIME};
use acm_general::graphql::build_schema;
use acm_general::models::membership::MembershipType;
use acm_general::models::money::Money;
use acm_general::models::user::{RegistrationFields, User};
use acm_general::util::current_time;

const USAGE: &str = "usage: acm-admin <migrate | create-superuser | seed-memberships | sweep-sessions | print-schema>";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or_default();

    match command {
        "print-schema" => {
            println!("{}", build_schema().sdl());
            Ok(())
        }
        "migrate" => {
            connect().await?;
            println!("Migrations are up to date.");
            Ok(())
        }
        "create-superuser" => create_superuser(&args[1..]).await,
        "seed-memberships" => seed_memberships(&args[1..]).await,
        "sweep-sessions" => sweep_sessions().await,
        "" => bail!(USAGE),
        unknown => bail!("Unknown command \"{}\". {}", unknown, USAGE),
    }
}

/// Connects and brings the schema up to date, which every command needs.
async fn connect() -> Result<(Config, PgStore)> {
    let config = Config::from_env()?;
    let store = PgStore::connect(&config.database_url)
        .await
        .context("Failed to connect to the database")?;
    store.migrate().await.context("Failed to run migrations")?;

    Ok((config, store))
}

async fn create_superuser(args: &[String]) -> Result<()> {
    let (email, first_name, last_name) = match args {
        [email, first_name, last_name, ..] => (email, first_name, last_name),
        _ => bail!("usage: acm-admin create-superuser <email> <first name> <last name> [password]"),
    };
    let password = args.get(3).cloned().or_else(|| env::var("SUPERUSER_PASSWORD").ok());

    let (config, store) = connect().await?;
    let fields = RegistrationFields {
        first_name: first_name.clone(),
        last_name: last_name.clone(),
        is_active: Some(true),
        is_staff: None,
        is_superuser: None,
    };
    let user = User::create_superuser(
        email,
        fields,
        password.as_deref(),
        &config.email_domains,
        &store,
    )
    .await
    .with_context(|| format!("Failed to create superuser {email}"))?;

    println!("Created superuser {} ({}).", user.email, user.id);
    if password.is_none() {
        println!("No password was set, so this account can only log in through Google.");
    }

    Ok(())
}

async fn seed_memberships(args: &[String]) -> Result<()> {
    let (sig_id, semester, year) = match args {
        [sig_id, semester, year, ..] => (sig_id, semester, year),
        _ => bail!("usage: acm-admin seed-memberships <sig id> <semester cost> <year cost>"),
    };
    let costs = [
        semester.parse::<Money>().context("Invalid semester cost")?,
        year.parse::<Money>().context("Invalid year cost")?,
    ];

    let (_, store) = connect().await?;
    let products = MembershipType::seed(sig_id, costs, &store)
        .await
        .context("Failed to seed membership products")?;
    for product in products {
        println!("{}: {} ({})", product.tag, product.name, product.cost);
    }

    Ok(())
}

async fn sweep_sessions() -> Result<()> {
    let (_, store) = connect().await?;
    let swept = store
        .session_sweep(current_time() - SESSION_LIFETIME)
        .await
        .context("Failed to sweep sessions")?;
    println!("Removed {swept} expired session values.");

    Ok(())
}
