//! In-process forum API recording every request.
//!
//! MUST NEVER be used in production.

use std::sync::{Arc, Mutex};

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use crate::bridge::Bridge;
use crate::config::{Configuration, Forum};
use crate::event::LocalUser;

/// Address nothing listens on.
pub const UNREACHABLE: &str = "http://127.0.0.1:1";
pub const API_KEY: &str = "secret-key";
pub const ROOT_DOMAIN: &str = "example.com";

/// Request received by [`MockForum`].
#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub raw: Bytes,
    pub body: Value,
}

#[derive(Clone)]
struct MockState {
    requests: Arc<Mutex<Vec<Recorded>>>,
    token: Option<String>,
    status: StatusCode,
}

/// Fake Flarum API listening on a random local port.
pub struct MockForum {
    pub url: String,
    state: MockState,
}

impl MockForum {
    /// Forum issuing `tok123` on token exchange.
    pub async fn start() -> Self {
        Self::with_token("tok123").await
    }

    /// Forum issuing `token` on token exchange.
    pub async fn with_token(token: &str) -> Self {
        Self::spawn(Some(token), StatusCode::OK).await
    }

    /// Forum whose token exchange omits the `token` field.
    pub async fn without_token() -> Self {
        Self::spawn(None, StatusCode::OK).await
    }

    /// Forum answering every request with `status`.
    pub async fn rejecting(status: StatusCode) -> Self {
        Self::spawn(None, status).await
    }

    async fn spawn(token: Option<&str>, status: StatusCode) -> Self {
        let state = MockState {
            requests: Arc::default(),
            token: token.map(str::to_owned),
            status,
        };
        let app = Router::new().fallback(record).with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }
}

async fn record(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    raw: Bytes,
) -> (StatusCode, Json<Value>) {
    let body = serde_json::from_slice(&raw).unwrap_or(Value::Null);
    state.requests.lock().unwrap().push(Recorded {
        method,
        path: uri.path().to_owned(),
        headers,
        raw,
        body,
    });

    if state.status != StatusCode::OK {
        return (
            state.status,
            Json(json!({ "errors": [{ "status": state.status.as_str(), "code": "validation_error" }] })),
        );
    }

    let reply = match (uri.path(), &state.token) {
        ("/api/token", Some(token)) => json!({ "token": token, "userId": "7" }),
        ("/api/token", None) => json!({ "userId": "7" }),
        _ => json!({ "data": { "type": "users", "id": "7" } }),
    };
    (StatusCode::OK, Json(reply))
}

/// Forum configuration targeting `url`.
pub fn forum_config(url: &str) -> Forum {
    Forum {
        url: url.to_owned(),
        api_key: API_KEY.to_owned(),
        root_domain: ROOT_DOMAIN.to_owned(),
        credential_lifetime_seconds: 3600,
        ..Default::default()
    }
}

pub fn config(url: &str) -> Configuration {
    let mut config = Configuration::default();
    config.forum = forum_config(url);
    config
}

pub fn bridge(url: &str) -> Bridge {
    Bridge::new(&forum_config(url)).unwrap()
}

pub fn alice() -> LocalUser {
    LocalUser {
        id: 7,
        name: "alice".into(),
        email: "a@x.com".into(),
        password: "p@ss".into(),
        is_activated: false,
    }
}
