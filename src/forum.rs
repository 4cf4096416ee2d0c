//! Flarum REST API client.

use std::time::Instant;

use reqwest::{Client, Method, header};
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Users collection.
pub const USERS_ENDPOINT: &str = "/api/users";
/// Credentials exchange.
pub const TOKEN_ENDPOINT: &str = "/api/token";

/// Composes and sends requests to the forum API.
///
/// Every request authenticates as the forum administrator through the API
/// key. Responses are returned as generic JSON, whatever their status.
#[derive(Clone)]
pub struct ForumClient {
    http: Client,
    api_url: String,
    authorization: String,
}

impl std::fmt::Debug for ForumClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForumClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl ForumClient {
    /// Create a new [`ForumClient`].
    pub fn new(api_url: &str, api_key: &str, admin_user_id: u64) -> Self {
        Self {
            http: Client::new(),
            api_url: api_url.trim_end_matches('/').to_owned(),
            authorization: format!("Token {api_key}; userId={admin_user_id}"),
        }
    }

    /// Send one JSON request and parse the JSON answer.
    pub async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: &impl Serialize,
    ) -> Result<Value> {
        let body = serde_json::to_string(body)?;
        let url = format!("{}{endpoint}", self.api_url);
        let label = endpoint_label(endpoint);
        let start = Instant::now();

        let response = self
            .http
            .request(method.clone(), &url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, body.len())
            .header(header::AUTHORIZATION, &self.authorization)
            .body(body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                metrics::counter!("forum_requests_total", "endpoint" => label, "status" => "error")
                    .increment(1);
                return Err(err.into());
            },
        };

        let status = response.status();
        let labels = [
            ("endpoint", label),
            ("status", status.as_u16().to_string()),
        ];
        metrics::counter!("forum_requests_total", &labels).increment(1);
        metrics::histogram!("forum_request_duration_seconds", &labels)
            .record(start.elapsed().as_secs_f64());

        if status.is_success() {
            tracing::debug!(%method, endpoint, status = status.as_u16(), "forum request sent");
        } else {
            tracing::warn!(%method, endpoint, status = status.as_u16(), "forum rejected request");
        }

        let bytes = response.bytes().await?;
        Ok(parse_body(&bytes))
    }

    pub async fn post(&self, endpoint: &str, body: &impl Serialize) -> Result<Value> {
        self.send(Method::POST, endpoint, body).await
    }
}

/// Endpoint with resource ids collapsed, e.g. `/api/users/{id}`.
fn endpoint_label(endpoint: &str) -> String {
    endpoint
        .split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Anything that is not JSON becomes [`Value::Null`].
fn parse_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap_or_else(|err| {
        if !bytes.is_empty() {
            tracing::debug!(error = %err, "forum answered with a non-JSON body");
        }
        Value::Null
    })
}
