//! Operational HTTP endpoints.
//!
//! - `/healthz`               : liveness
//! - `/metrics`               : Prometheus text format
//! - `/discovery/:provider`   : discovery JSON (`counter`, `gauge`, `endpoint`)

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use reqmeter_core::discovery::DISCOVERY_KEY;

use crate::app_state::AppState;
use crate::error::{Result, WebError};

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    let body = state.registry().render_prometheus();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

pub async fn discovery(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Response> {
    let source = state
        .discovery(&provider)
        .ok_or_else(|| WebError::NotFound(format!("discovery provider {provider}")))?;
    let doc = source
        .value(DISCOVERY_KEY)?
        .ok_or_else(|| WebError::NotFound(format!("{provider} has no {DISCOVERY_KEY} value")))?;

    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], doc).into_response())
}
