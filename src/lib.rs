//! Mirror a host application's account lifecycle to a Flarum forum.

#![forbid(unsafe_code)]
pub mod bridge;
pub mod config;
pub mod cookie;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod forum;
pub mod queue;
mod router;
pub mod telemetry;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use bridge::Bridge;
use config::Configuration;
use dispatch::Dispatcher;
use error::ConfigError;
use queue::{Queue, Worker};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: axum::http::Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub dispatcher: Dispatcher,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Build the bridge and, when some events are deferred, start the queue.
    ///
    /// The returned [`Worker`] must be shut down once the server stopped.
    pub fn new(
        config: Arc<Configuration>,
        metrics: Option<PrometheusHandle>,
    ) -> Result<(Self, Option<Worker>), ConfigError> {
        let bridge = Bridge::new(&config.forum)?;

        let (dispatcher, worker) = if config.queue.deferred.is_empty() {
            (Dispatcher::inline(bridge), None)
        } else {
            let (queue, worker) =
                Queue::start(&config.queue.name, config.queue.capacity, bridge.clone());
            let deferred = config.queue.deferred.iter().copied();
            (Dispatcher::with_queue(bridge, queue, deferred), Some(worker))
        };

        Ok((
            Self {
                config,
                dispatcher,
                metrics,
            },
            worker,
        ))
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
            header::SET_COOKIE,
        ]));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `GET /metrics` goes to `metrics`.
        .route("/metrics", get(router::status::metrics))
        .nest("/events", router::events::router())
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}
