//! Axum router wiring.
//!
//! Application routes are wrapped by the tracking middleware; ops and
//! discovery endpoints are added after the layer and stay untimed.

use axum::{middleware, routing::get, Router};

use crate::{app_state::AppState, middleware::track_requests, ops};

pub fn build_router(state: AppState, app_routes: Router<AppState>) -> Router {
    Router::new()
        .merge(app_routes)
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .route("/healthz", get(ops::healthz))
        .route("/metrics", get(ops::metrics))
        .route("/discovery/:provider", get(ops::discovery))
        .with_state(state)
}
