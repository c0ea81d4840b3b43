//! What a page handler decided to do, before it becomes an HTTP response.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// A one-time message shown on the next page the user loads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

impl Flash {
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(FlashLevel::Success, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(FlashLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(FlashLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(FlashLevel::Error, message)
    }

    fn new(level: FlashLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self.level {
            FlashLevel::Success => "success",
            FlashLevel::Info => "info",
            FlashLevel::Warning => "warning",
            FlashLevel::Error => "danger",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    Success(T),
    ClientError { status: StatusCode, message: String },
    ServerError { status: StatusCode, message: String },
    Redirect { target: String, flash: Option<Flash> },
}

impl<T> Outcome<T> {
    pub fn redirect(target: impl Into<String>) -> Self {
        Outcome::Redirect {
            target: target.into(),
            flash: None,
        }
    }

    pub fn redirect_with(target: impl Into<String>, flash: Flash) -> Self {
        Outcome::Redirect {
            target: target.into(),
            flash: Some(flash),
        }
    }

    pub fn client_error(status: StatusCode, message: impl Into<String>) -> Self {
        Outcome::ClientError {
            status,
            message: message.into(),
        }
    }

    pub fn server_error(status: StatusCode, message: impl Into<String>) -> Self {
        Outcome::ServerError {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Outcome::Success(_) => StatusCode::OK,
            Outcome::ClientError { status, .. } | Outcome::ServerError { status, .. } => *status,
            Outcome::Redirect { .. } => StatusCode::SEE_OTHER,
        }
    }
}

impl<T> From<AppError> for Outcome<T> {
    fn from(error: AppError) -> Self {
        error.log();
        Outcome::from(&error)
    }
}

impl<T> From<&AppError> for Outcome<T> {
    fn from(error: &AppError) -> Self {
        let status = error.status();
        if error.is_server_error() {
            Outcome::server_error(status, error.public_message())
        } else {
            Outcome::client_error(status, error.public_message())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_split_into_client_and_server_outcomes() {
        let missing: Outcome<()> = AppError::not_found("product 7").into();
        let broken: Outcome<()> = AppError::configuration("no key").into();

        assert_eq!(
            missing,
            Outcome::client_error(StatusCode::NOT_FOUND, "product 7 not found")
        );
        assert_eq!(
            broken,
            Outcome::server_error(StatusCode::INTERNAL_SERVER_ERROR, "server error")
        );
    }

    #[test]
    fn flashes_round_trip_through_json() {
        let flash = Flash::warning("Your card was declined.");
        let json = serde_json::to_string(&flash).unwrap();

        assert!(json.contains("\"warning\""));
        assert_eq!(serde_json::from_str::<Flash>(&json).unwrap(), flash);
    }
}
