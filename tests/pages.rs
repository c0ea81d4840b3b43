//! Browsing the site end to end over an in-memory store.

mod common;

use std::sync::Arc;

use acm_general::db::MemoryStore;
use acm_general::models::user::User;
use acm_general::routes::router;
use acm_general::state::AppState;
use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{app_state, domains, fields, FakeIdentity};

/// Keeps the session cookie between requests like a browser would.
struct Browser {
    app: Router,
    cookie: Option<String>,
}

struct Page {
    status: StatusCode,
    location: Option<String>,
    body: String,
}

impl Browser {
    fn new(state: Arc<AppState>) -> Self {
        Self {
            app: router(state),
            cookie: None,
        }
    }

    async fn send(&mut self, builder: axum::http::request::Builder, body: Body) -> Page {
        let builder = match &self.cookie {
            Some(cookie) => builder.header(COOKIE, cookie),
            None => builder,
        };
        let response = self
            .app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        if let Some(set_cookie) = response.headers().get(SET_COOKIE) {
            let pair = set_cookie.to_str().unwrap().split(';').next().unwrap();
            self.cookie = Some(pair.to_owned());
        }
        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .map(|location| location.to_str().unwrap().to_owned());
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();

        Page {
            status,
            location,
            body: String::from_utf8(bytes.to_vec()).unwrap(),
        }
    }

    async fn get(&mut self, path: &str) -> Page {
        self.send(Request::get(path), Body::empty()).await
    }

    async fn post_form(&mut self, path: &str, form: &str) -> Page {
        let builder = Request::post(path).header(CONTENT_TYPE, "application/x-www-form-urlencoded");
        self.send(builder, Body::from(form.to_owned())).await
    }

    async fn graphql(&mut self, query: &str) -> Value {
        let builder = Request::post("/web-api").header(CONTENT_TYPE, "application/json");
        let body = Body::from(json!({ "query": query }).to_string());
        let page = self.send(builder, body).await;
        assert_eq!(page.status, StatusCode::OK);

        serde_json::from_str(&page.body).unwrap()
    }
}

async fn store_with_admin() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    User::create_superuser(
        "admin@mst.edu",
        fields("Ada", "Admin"),
        Some("hunter22"),
        &domains(),
        store.as_ref(),
    )
    .await
    .unwrap();
    store
}

#[tokio::test]
async fn the_homepage_starts_a_session() {
    let mut browser = Browser::new(app_state(Arc::new(MemoryStore::new()), None, None));

    let page = browser.get("/").await;
    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains("Log in"));
    assert!(browser
        .cookie
        .as_deref()
        .unwrap()
        .starts_with("acm_session="));
}

#[tokio::test]
async fn event_creation_is_hidden_from_visitors() {
    let mut browser = Browser::new(app_state(Arc::new(MemoryStore::new()), None, None));

    let page = browser.get("/events/create").await;
    assert_eq!(page.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wrong_passwords_go_back_to_the_login_page() {
    let mut browser = Browser::new(app_state(store_with_admin().await, None, None));

    let page = browser
        .post_form(
            "/accounts/login",
            "email=admin%40mst.edu&password=wrong&next=%2Fevents%2F",
        )
        .await;
    assert_eq!(page.status, StatusCode::SEE_OTHER);
    assert_eq!(
        page.location.as_deref(),
        Some("/accounts/login?next=%2Fevents%2F")
    );

    let page = browser.get("/accounts/login?next=%2Fevents%2F").await;
    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains("Invalid email or password."));

    let again = browser.get("/accounts/login").await;
    assert!(!again.body.contains("Invalid email or password."));
}

#[tokio::test]
async fn administrators_log_in_with_a_password() {
    let mut browser = Browser::new(app_state(store_with_admin().await, None, None));

    let page = browser
        .post_form(
            "/accounts/login",
            "email=admin%40mst.edu&password=hunter22&next=%2Fevents%2F",
        )
        .await;
    assert_eq!(page.status, StatusCode::SEE_OTHER);
    assert_eq!(page.location.as_deref(), Some("/events/"));

    let page = browser.get("/events/").await;
    assert!(page.body.contains("You have been logged in, admin@mst.edu."));

    let page = browser.get("/events/create").await;
    assert_eq!(page.status, StatusCode::OK);

    let response = browser.graphql("{ user { email isSuperuser } }").await;
    assert_eq!(response["data"]["user"]["email"], "admin@mst.edu");
    assert_eq!(response["data"]["user"]["isSuperuser"], true);

    let page = browser.get("/accounts/logout").await;
    assert_eq!(page.location.as_deref(), Some("/"));
    let response = browser.graphql("{ user { email } }").await;
    assert_eq!(response["data"]["user"], Value::Null);
}

#[tokio::test]
async fn login_redirects_stay_on_the_site() {
    let mut browser = Browser::new(app_state(store_with_admin().await, None, None));

    let page = browser
        .post_form(
            "/accounts/login",
            "email=admin%40mst.edu&password=hunter22&next=https%3A%2F%2Fevil.example",
        )
        .await;
    assert_eq!(page.location.as_deref(), Some("/"));
}

#[tokio::test]
async fn google_logins_provision_an_account() {
    let store = Arc::new(MemoryStore::new());
    let identity = FakeIdentity::new("grace@MST.EDU");
    let mut browser = Browser::new(app_state(store.clone(), None, Some(identity)));

    let page = browser.get("/social-auth/google?next=%2Fpayments%2Fmembership").await;
    assert_eq!(page.status, StatusCode::SEE_OTHER);
    let location = page.location.unwrap();
    let state = location
        .strip_prefix("https://accounts.example.com/auth?state=")
        .unwrap()
        .to_owned();

    let page = browser
        .get(&format!("/social-auth/google/callback?code=good-code&state={state}"))
        .await;
    assert_eq!(page.status, StatusCode::SEE_OTHER);
    assert_eq!(page.location.as_deref(), Some("/payments/membership"));

    let grace = User::with_email("grace@mst.edu", store.as_ref()).await.unwrap();
    assert_eq!(grace.full_name(), "Grace Hopper");
    assert!(grace.password_hash.is_none());

    let response = browser.graphql("{ user { email } }").await;
    assert_eq!(response["data"]["user"]["email"], "grace@mst.edu");

    let page = browser.get("/social-auth/google").await;
    assert_eq!(page.location.as_deref(), Some("/"));
    let page = browser.get("/").await;
    assert!(page.body.contains("You are already logged in."));
}

#[tokio::test]
async fn forged_callbacks_are_refused() {
    let store = Arc::new(MemoryStore::new());
    let identity = FakeIdentity::new("grace@mst.edu");
    let mut browser = Browser::new(app_state(store.clone(), None, Some(identity)));

    browser.get("/social-auth/google").await;
    let page = browser
        .get("/social-auth/google/callback?code=good-code&state=forged")
        .await;
    assert_eq!(page.location.as_deref(), Some("/"));

    let page = browser.get("/").await;
    assert!(page
        .body
        .contains("Something is wrong with your session, please refresh the page."));
    assert!(User::with_email("grace@mst.edu", store.as_ref()).await.is_err());
}

#[tokio::test]
async fn outside_accounts_cannot_log_in_through_google() {
    let store = Arc::new(MemoryStore::new());
    let identity = FakeIdentity::new("grace@navy.mil");
    let mut browser = Browser::new(app_state(store.clone(), None, Some(identity)));

    let page = browser.get("/social-auth/google").await;
    let state = page
        .location
        .unwrap()
        .rsplit('=')
        .next()
        .unwrap()
        .to_owned();
    let page = browser
        .get(&format!("/social-auth/google/callback?code=good-code&state={state}"))
        .await;
    assert_eq!(page.location.as_deref(), Some("/"));

    let response = browser.graphql("{ user { email } }").await;
    assert_eq!(response["data"]["user"], Value::Null);
}

#[tokio::test]
async fn google_login_without_settings_is_a_server_error() {
    let mut browser = Browser::new(app_state(Arc::new(MemoryStore::new()), None, None));

    let page = browser.get("/social-auth/google").await;
    assert_eq!(page.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(page.body.contains("server error"));
}

#[tokio::test]
async fn anonymous_purchases_are_not_found() {
    let mut browser = Browser::new(app_state(Arc::new(MemoryStore::new()), None, None));

    let page = browser
        .post_form("/payments/membership", "stripeToken=tok_1&type=semester")
        .await;
    assert_eq!(page.status, StatusCode::NOT_FOUND);

    let page = browser
        .post_form("/payments/productHandler/not-a-uuid", "stripeToken=tok_1")
        .await;
    assert_eq!(page.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn the_api_requires_a_login() {
    let mut browser = Browser::new(app_state(Arc::new(MemoryStore::new()), None, None));

    let response = browser.graphql("{ events { title } }").await;
    assert_eq!(response["errors"][0]["extensions"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn made_up_session_cookies_are_replaced() {
    let state = app_state(store_with_admin().await, None, None);
    let mut victim = Browser::new(state.clone());
    victim.cookie = Some("acm_session=attackerchosen1".to_owned());

    victim.get("/").await;
    assert_ne!(victim.cookie.as_deref(), Some("acm_session=attackerchosen1"));
    victim
        .post_form("/accounts/login", "email=admin%40mst.edu&password=hunter22")
        .await;

    let mut attacker = Browser::new(state);
    attacker.cookie = Some("acm_session=attackerchosen1".to_owned());
    let response = attacker.graphql("{ user { email } }").await;
    assert_eq!(response["data"]["user"], Value::Null);
}

#[tokio::test]
async fn logging_in_issues_a_new_session_key() {
    let state = app_state(store_with_admin().await, None, None);
    let mut attacker = Browser::new(state.clone());
    attacker
        .post_form("/accounts/login", "email=admin%40mst.edu&password=wrong")
        .await;
    let planted = attacker.cookie.clone().unwrap();

    let mut victim = Browser::new(state);
    victim.cookie = Some(planted.clone());
    let page = victim
        .post_form("/accounts/login", "email=admin%40mst.edu&password=hunter22")
        .await;
    assert_eq!(page.status, StatusCode::SEE_OTHER);
    assert_ne!(victim.cookie.as_deref(), Some(planted.as_str()));

    let response = victim.graphql("{ user { email } }").await;
    assert_eq!(response["data"]["user"]["email"], "admin@mst.edu");
    let response = attacker.graphql("{ user { email } }").await;
    assert_eq!(response["data"]["user"], Value::Null);
}

#[tokio::test]
async fn logging_out_issues_a_new_session_key() {
    let mut browser = Browser::new(app_state(store_with_admin().await, None, None));
    browser
        .post_form("/accounts/login", "email=admin%40mst.edu&password=hunter22")
        .await;
    let logged_in = browser.cookie.clone().unwrap();

    let page = browser.get("/accounts/logout").await;
    assert_eq!(page.location.as_deref(), Some("/"));
    assert_ne!(browser.cookie.as_deref(), Some(logged_in.as_str()));

    let page = browser.get("/").await;
    assert!(page.body.contains("Successfully logged out."));
}
