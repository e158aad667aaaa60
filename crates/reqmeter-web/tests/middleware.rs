#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use reqmeter_core::clock::ManualClock;
use reqmeter_core::recorder::STATUS_COUNTER;
use reqmeter_core::tags::Tags;
use reqmeter_web::app_state::AppState;
use reqmeter_web::{config, demo, router};
use tower::ServiceExt;

const CONFIG: &str = r#"
version: 1
metrics:
  apdex:
    enabled: true
    millis: 100
  endpoint:
    pattern: "/api/s.*"
"#;

fn build_app(yaml: &str) -> (AppState, Router) {
    let cfg = config::load_from_str(yaml).expect("config");
    let clock = Arc::new(ManualClock::new());
    let state = AppState::with_clock(cfg, demo::route_table().unwrap(), clock).unwrap();
    let app = router::build_router(state.clone(), demo::routes());
    (state, app)
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).expect("request")
}

async fn body_string(res: axum::response::Response) -> String {
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn count(state: &AppState, name: &str, tags: &[(&str, &str)]) -> u64 {
    state
        .registry()
        .find_counter(name, &Tags::of(tags))
        .map(|c| c.count())
        .unwrap_or(0)
}

const BASE: &str = "http.server.requests";

#[tokio::test]
async fn matched_route_is_tagged_with_pattern() {
    let (state, app) = build_app(CONFIG);
    let res = app.oneshot(get("/api/hello")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_string(res).await, "hello");

    assert_eq!(
        count(&state, BASE, &[("method", "GET"), ("uri", "/api/hello"), ("response", "ok")]),
        1
    );
    assert_eq!(count(&state, BASE, &[("uri", "root"), ("response", "ok")]), 1);
    assert_eq!(count(&state, BASE, &[("uri", "root"), ("apdex", "satisfied")]), 1);
    assert_eq!(count(&state, STATUS_COUNTER, &[("status", "2XX")]), 1);
}

#[tokio::test]
async fn path_params_use_the_route_pattern() {
    let (state, app) = build_app(CONFIG);
    let res = app.oneshot(get("/api/slow/0")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let reg = state.registry();
    let tags = Tags::of(&[("method", "GET"), ("uri", "/api/slow/:ms")]);
    assert_eq!(reg.find_timer(BASE, &tags).unwrap().count(), 1);
    assert_eq!(reg.find_timer("demo.slow", &tags).unwrap().count(), 1);
}

#[tokio::test]
async fn handler_error_counts_as_nok() {
    let (state, app) = build_app(CONFIG);
    let res = app.oneshot(get("/api/fail")).await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_string(res).await;
    assert!(body.contains("\"error\":\"INTERNAL\""));

    assert_eq!(count(&state, BASE, &[("uri", "root"), ("response", "nok")]), 1);
    assert_eq!(count(&state, BASE, &[("uri", "root"), ("response", "ok")]), 0);
    assert_eq!(count(&state, STATUS_COUNTER, &[("status", "5XX")]), 1);
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let (state, app) = build_app(CONFIG);
    let res = app.oneshot(get("/nowhere")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        count(&state, BASE, &[("method", "GET"), ("uri", "NOT_FOUND"), ("response", "ok")]),
        1
    );
    assert_eq!(count(&state, STATUS_COUNTER, &[("status", "4XX")]), 1);
}

#[tokio::test]
async fn deferred_body_finalizes_when_stream_ends() {
    let (state, app) = build_app(CONFIG);
    let res = app.oneshot(get("/api/stream/3")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Headers are out but the body has not been consumed yet.
    assert_eq!(count(&state, BASE, &[("uri", "root"), ("apdex", "total")]), 0);

    let body = body_string(res).await;
    assert_eq!(body, "chunk 0\nchunk 1\nchunk 2\n");
    assert_eq!(count(&state, BASE, &[("uri", "root"), ("response", "ok")]), 1);
    assert_eq!(count(&state, BASE, &[("uri", "root"), ("apdex", "total")]), 1);
}

#[tokio::test]
async fn dropped_deferred_body_is_a_failure() {
    let (state, app) = build_app(CONFIG);
    let res = app.oneshot(get("/api/stream/3")).await.unwrap();
    drop(res);
    assert_eq!(count(&state, BASE, &[("uri", "root"), ("response", "nok")]), 1);
}

#[tokio::test]
async fn ops_endpoints_are_untimed() {
    let (state, app) = build_app(CONFIG);
    let before = state.registry().len();

    let res = app.clone().oneshot(get("/healthz")).await.unwrap();
    assert_eq!(body_string(res).await, "ok");

    let res = app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let text = body_string(res).await;
    assert!(text.contains("# TYPE http_server_requests_window gauge"));
    assert!(text.contains("http_server_routes 4"));

    assert_eq!(state.registry().len(), before);
    assert_eq!(count(&state, BASE, &[("uri", "root"), ("response", "ok")]), 0);
}

#[tokio::test]
async fn discovery_endpoints() {
    let (_state, app) = build_app(CONFIG);

    let res = app.clone().oneshot(get("/discovery/endpoint")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let expected = concat!(
        r#"{"data":[{"{#ENDPOINTNAME}":"/api/slow/:ms","{#ENDPOINTMETHOD}":"GET"},"#,
        r#"{"{#ENDPOINTNAME}":"/api/stream/:n","{#ENDPOINTMETHOD}":"GET"}]}"#,
    );
    assert_eq!(body_string(res).await, expected);

    let res = app.clone().oneshot(get("/discovery/gauge")).await.unwrap();
    assert_eq!(body_string(res).await, r#"{"data":[{"{#GAUGENAME}":"httpServerRoutes"}]}"#);

    let res = app.clone().oneshot(get("/discovery/counter")).await.unwrap();
    assert!(body_string(res)
        .await
        .contains(r#"{"{#COUNTERNAME}":"httpServerRequests.apdex.total.uri.root"}"#));

    let res = app.oneshot(get("/discovery/timers")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn without_auto_timing_only_declared_routes_are_recorded() {
    let (state, app) = build_app("version: 1\nmetrics:\n  auto_time_requests: false\n");

    let res = app.clone().oneshot(get("/api/hello")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(count(&state, BASE, &[("uri", "root"), ("response", "ok")]), 0);
    assert_eq!(count(&state, STATUS_COUNTER, &[("status", "2XX")]), 0);

    let res = app.clone().oneshot(get("/api/slow/0")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(count(&state, BASE, &[("uri", "root"), ("response", "ok")]), 1);

    let res = app.oneshot(get("/metrics")).await.unwrap();
    let text = body_string(res).await;
    assert!(text.contains("# TYPE demo_slow_duration_micros histogram"));
    let p95 = concat!(
        "demo_slow_duration_micros_percentile",
        r#"{method="GET",uri="/api/slow/:ms",quantile="0.95"} 0"#,
    );
    assert!(text.contains(p95));
}

#[tokio::test]
async fn disabled_metrics_pass_through() {
    let (state, app) = build_app("version: 1\nmetrics:\n  enabled: false\n");
    let res = app.oneshot(get("/api/hello")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let root_ok = Tags::of(&[("uri", "root"), ("response", "ok")]);
    assert!(state.registry().find_counter(BASE, &root_ok).is_none());
}
