//! Error handler for the bridge.

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::event::EventKind;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Failures raised while talking to the forum or scheduling work.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("forum request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("cannot encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("cookie cannot be written as a header")]
    Header(#[from] axum::http::header::InvalidHeaderValue),

    #[error("queue `{0}` is full")]
    QueueFull(String),

    #[error("queue `{0}` is closed")]
    QueueClosed(String),
}

/// Invalid or incomplete configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing `{0}` configuration entry")]
    Missing(&'static str),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("cannot open configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("`{0}` events answer with cookies and cannot be deferred")]
    NotDeferrable(EventKind),
}

/// Errors returned by the HTTP surface.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    fn into_http(self) -> std::result::Result<Response, axum::http::Error> {
        let body = serde_json::to_string(&self).unwrap_or_default();
        Response::builder()
            .status(self.status)
            .header(header::CONTENT_TYPE, "application/problem+json")
            .body(body.into())
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| issue.code.to_string()),
            })
        })
        .collect()
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were validation errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(errors) => response.errors(errors),
            ServerError::Axum(rejection) => response
                .details(&rejection.body_text())
                .status(rejection.status()),
            ServerError::Bridge(err) => {
                tracing::error!(error = %err, "server returned 500 status");
                ResponseError::default()
            },
        };

        response.into_http().unwrap_or_else(|_| {
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                .into_response()
        })
    }
}
