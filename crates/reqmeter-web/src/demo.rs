//! Demo routes served by the binary and used by the integration tests.

use std::convert::Infallible;
use std::time::Duration;

use axum::{body::Body, extract::Path, response::IntoResponse, routing::get, Extension, Router};
use bytes::Bytes;
use futures_util::stream;
use reqmeter_core::error::Result;
use reqmeter_core::lifecycle::{RouteHandler, RouteTable, TimedSpec};

use crate::app_state::AppState;
use crate::error::WebError;
use crate::middleware::Deferred;

const MAX_SLEEP_MS: u64 = 10_000;
const MAX_CHUNKS: u32 = 1_000;

/// Route table matching [`routes`]; patterns are axum's `MatchedPath` form.
pub fn route_table() -> Result<RouteTable> {
    RouteTable::builder()
        .route("GET", "/api/hello")
        .handler(
            RouteHandler::new("GET", "/api/slow/:ms")
                .timed(TimedSpec::named("demo.slow").histogram(true).percentiles(&[0.5, 0.95]))
                .timed(TimedSpec::long_task("demo.slow.active")),
        )
        .route("GET", "/api/fail")
        .route("GET", "/api/stream/:n")
        .build()
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/hello", get(hello))
        .route("/api/slow/:ms", get(slow))
        .route("/api/fail", get(fail))
        .route("/api/stream/:n", get(stream_chunks))
}

async fn hello() -> &'static str {
    "hello"
}

async fn slow(Path(ms): Path<u64>) -> String {
    let ms = ms.min(MAX_SLEEP_MS);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    format!("slept {ms}ms")
}

async fn fail() -> std::result::Result<&'static str, WebError> {
    Err(WebError::Internal("demo failure".into()))
}

/// Body is produced after the handler returns; the request completes when
/// the last chunk is sent.
async fn stream_chunks(Path(n): Path<u32>) -> impl IntoResponse {
    let chunks = (0..n.min(MAX_CHUNKS))
        .map(|i| Ok::<_, Infallible>(Bytes::from(format!("chunk {i}\n"))));
    (Extension(Deferred), Body::from_stream(stream::iter(chunks)))
}
