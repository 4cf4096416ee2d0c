//! Lifecycle event endpoints.
//!
//! Forum failures never change the status code: the host action already
//! happened and must not be undone by the forum.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::Valid;
use crate::AppState;
use crate::dispatch::Dispatched;
use crate::error::ServerError;
use crate::event::{LifecycleEvent, LocalUser};

#[derive(Debug, Deserialize, Validate)]
pub struct Activation {
    id: u64,
}

#[derive(Deserialize, Validate)]
pub struct Credentials {
    #[serde(default)]
    id: u64,
    #[validate(length(min = 1, max = 255, message = "Name must not be empty."))]
    name: String,
    #[validate(length(min = 1, message = "Password must not be empty."))]
    password: String,
}

#[derive(Debug, Serialize)]
struct Accepted {
    queued: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        // `POST /events/registered` goes to `registered`.
        .route("/registered", post(registered))
        // `POST /events/activated` goes to `activated`.
        .route("/activated", post(activated))
        // `POST /events/login` goes to `login`.
        .route("/login", post(login))
        // `POST /events/logout` goes to `logout`.
        .route("/logout", post(logout))
}

pub async fn registered(
    State(state): State<AppState>,
    Valid(user): Valid<LocalUser>,
) -> Result<Response, ServerError> {
    reply(state.dispatcher.dispatch(LifecycleEvent::Registered(user)).await)
}

pub async fn activated(
    State(state): State<AppState>,
    Valid(body): Valid<Activation>,
) -> Result<Response, ServerError> {
    let user = LocalUser {
        id: body.id,
        is_activated: true,
        ..Default::default()
    };

    reply(state.dispatcher.dispatch(LifecycleEvent::Activated(user)).await)
}

pub async fn login(
    State(state): State<AppState>,
    Valid(body): Valid<Credentials>,
) -> Result<Response, ServerError> {
    let user = LocalUser {
        id: body.id,
        name: body.name,
        password: body.password,
        ..Default::default()
    };

    reply(state.dispatcher.dispatch(LifecycleEvent::Login(user)).await)
}

pub async fn logout(State(state): State<AppState>) -> Result<Response, ServerError> {
    reply(state.dispatcher.dispatch(LifecycleEvent::Logout).await)
}

fn reply(dispatched: Dispatched) -> Result<Response, ServerError> {
    match dispatched {
        Dispatched::Queued(_) => {
            Ok((StatusCode::ACCEPTED, Json(Accepted { queued: true })).into_response())
        },
        Dispatched::Done(outcome) => {
            let mut headers = HeaderMap::new();
            for cookie in &outcome.cookies {
                headers.append(header::SET_COOKIE, cookie.to_header()?);
            }

            Ok((StatusCode::OK, headers, Json(outcome)).into_response())
        },
    }
}
