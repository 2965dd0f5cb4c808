//! The read-only HTTP API: route wiring, the parametric query builder,
//! and shared request-parsing helpers.
//!
//! Grounded on the teacher's `basilica-api/src/server.rs` router
//! assembly (`Router::new().route(...).layer(...)`, `CorsLayer`,
//! `TimeoutLayer`) and `basilica-validator/src/api/rental_routes.rs`
//! handler signatures.

pub mod query_builder;
pub mod response;
pub mod routes;

use std::time::Duration;

use axum::{http::HeaderValue, middleware, routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::app::AppState;
use crate::auth::auth_middleware;

/// HTTP read/write timeout (spec §5).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the API's route table, unprefixed — the caller nests this under
/// `/api` (see [`crate::app::App::run`]). `/health` is reachable without
/// the trusted-header middleware (it is a plain liveness probe); every
/// other endpoint requires `X-Grafana-User` to be present.
pub fn router(state: AppState) -> Router<AppState> {
    let authenticated = Router::new()
        .route("/projects", get(routes::projects::list_projects))
        .route("/units", get(routes::units::list_units))
        .route("/units/admin", get(routes::units::list_units_admin))
        .route("/usage/current", get(routes::usage::current_usage))
        .route(
            "/usage/current/admin",
            get(routes::usage::current_usage_admin),
        )
        .route("/usage/global", get(routes::usage::global_usage))
        .route(
            "/usage/global/admin",
            get(routes::usage::global_usage_admin),
        )
        .layer(middleware::from_fn_with_state(
            state.admin_list.clone(),
            auth_middleware,
        ));

    // `/health` and `/metrics` are reachable without the trusted-header
    // middleware and outside the JSON content-type override below: a
    // liveness probe and a Prometheus scrape both expect their own
    // content type, not `application/json`.
    let json_api = Router::new()
        .route("/health", get(routes::health::health))
        .merge(authenticated)
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(json_api)
        .route("/metrics", get(routes::metrics::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
}
