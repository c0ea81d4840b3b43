//! Error handling for the site.
//!
//! In development, prefer adding a variant to [AppError] over forcing a
//! failure into `Validation` or a generic server error. Each variant knows
//! its HTTP status and how it renders for API callers.

use std::collections::BTreeMap;
use std::fmt;

use async_graphql::ErrorExtensions;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::gateway::GatewayError;

/// Validation failures keyed by the offending field.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(reason.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn merge(&mut self, other: FieldErrors) {
        for (field, reasons) in other.0 {
            self.0.entry(field).or_default().extend(reasons);
        }
    }

    /// The reasons recorded against `field`, empty if it passed.
    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// `Ok(())` if nothing was recorded, else the collected errors.
    pub fn into_result(self) -> AppResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self))
        }
    }

    fn to_json(&self) -> Value {
        json!(self.0)
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, reasons) in &self.0 {
            for reason in reasons {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{field}: {reason}")?;
                first = false;
            }
        }

        Ok(())
    }
}

/// The error enum for all error handling across the site.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// \[500\] The deployment is missing or has malformed settings.
    ///
    /// Never recoverable by the caller, so the detail is only logged.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// \[400\] Caller-supplied data broke an entity rule.
    #[error("invalid input ({0})")]
    Validation(FieldErrors),
    /// \[404\] A lookup by key found nothing.
    #[error("{0} not found")]
    NotFound(String),
    /// \[409\] A uniqueness rule would be broken.
    #[error("conflict: {0}")]
    Conflict(String),
    /// \[401\] The endpoint requires a logged-in user.
    #[error("login required")]
    Unauthorized,
    /// \[403\] The current user may not perform the action.
    #[error("access forbidden")]
    Forbidden,
    /// The payment gateway refused or failed a request.
    ///
    /// Connection and card failures are the user's to retry; credential
    /// failures are a deployment problem.
    #[error("payment gateway error: {0}")]
    Gateway(#[from] GatewayError),
    /// \[500\] An error occurred while talking to the database.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// \[500\] Reading or writing a stored file failed.
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),
    /// \[500\] A page failed to render.
    #[error("template error: {0}")]
    Template(#[from] askama::Error),
}

/// The return type for all fallible domain operations.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.add(field, reason);
        AppError::Validation(errors)
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn configuration(detail: impl Into<String>) -> Self {
        AppError::Configuration(detail.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Gateway(GatewayError::Connection(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Gateway(GatewayError::Card(_)) => StatusCode::PAYMENT_REQUIRED,
            AppError::Gateway(GatewayError::Authentication(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Gateway(GatewayError::Api(_)) => StatusCode::BAD_GATEWAY,
            AppError::Configuration(_)
            | AppError::Database(_)
            | AppError::Io(_)
            | AppError::Template(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }

    /// A short machine-readable name for API callers.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "CONFIGURATION",
            AppError::Validation(_) => "VALIDATION",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::Gateway(GatewayError::Connection(_)) => "GATEWAY_UNREACHABLE",
            AppError::Gateway(GatewayError::Card(_)) => "CARD_DECLINED",
            AppError::Gateway(GatewayError::Authentication(_)) => "GATEWAY_MISCONFIGURED",
            AppError::Gateway(GatewayError::Api(_)) => "GATEWAY_ERROR",
            AppError::Database(_) | AppError::Io(_) | AppError::Template(_) => "SERVER_ERROR",
        }
    }

    /// The message shown to users. Server-side details stay in the logs.
    pub fn public_message(&self) -> String {
        if self.is_server_error() {
            "server error".to_owned()
        } else {
            self.to_string()
        }
    }

    pub fn as_json(&self) -> (StatusCode, Value) {
        let status = self.status();
        let mut body = json!({
            "message": self.public_message(),
            "code": self.code(),
            "statusCode": status.as_u16(),
        });
        if let AppError::Validation(errors) = self {
            body["errors"] = errors.to_json();
        }

        (status, body)
    }

    /// Logs server-class errors; everything else is the caller's problem.
    pub fn log(&self) {
        if self.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();
        let (status, body) = self.as_json();

        (status, Json(body)).into_response()
    }
}

impl ErrorExtensions for AppError {
    fn extend(&self) -> async_graphql::Error {
        self.log();
        let code = self.code();
        let errors = match self {
            AppError::Validation(errors) => Some(errors.clone()),
            _ => None,
        };

        async_graphql::Error::new(self.public_message()).extend_with(|_, extensions| {
            extensions.set("code", code);
            if let Some(errors) = &errors {
                for field in errors.fields() {
                    extensions.set(field, errors.get(field).join("; "));
                }
            }
        })
    }
}
