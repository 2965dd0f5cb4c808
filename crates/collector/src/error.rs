//! The crate-wide error type and its mapping onto the HTTP JSON envelope.
//!
//! Every fallible operation in this crate returns [`Error`]; the HTTP layer
//! is the only place that converts it into a response body, via
//! [`IntoResponse`].

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unauthorized: {0}")]
    Auth(String),

    #[error("bad request: {0}")]
    BadData(String),

    #[error("upstream collaborator error: {0}")]
    Upstream(String),
}

impl Error {
    /// The `errorType` field of the response envelope.
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::BadData(_) => "bad_data",
            Error::Auth(_) => "user_error",
            Error::Config(_) | Error::Sql(_) | Error::Io(_) | Error::Upstream(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadData(_) => StatusCode::BAD_REQUEST,
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::Config(_) | Error::Sql(_) | Error::Io(_) | Error::Upstream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Upstream(_) | Error::Sql(_))
    }
}

/// `{status, data?, errorType?, error?, warnings?}` — the envelope every
/// handler response and error both share.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "errorType")]
    pub error_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success",
            data: Some(data),
            error_type: None,
            error: None,
            warnings: Vec::new(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        tracing::warn!(error = %self, retryable = self.is_retryable(), "request failed");
        let status = self.status_code();
        let body = Envelope::<()> {
            status: "error",
            data: None,
            error_type: Some(self.error_type()),
            error: Some(self.to_string()),
            warnings: Vec::new(),
        };
        (status, Json(body)).into_response()
    }
}
