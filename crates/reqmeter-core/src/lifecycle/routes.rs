//! Static route table with per-route timer specifications.
//!
//! The table doubles as the default [`HandlerResolver`]: the host server
//! reports which route pattern matched, the table maps `(method, pattern)` to
//! the registered handler.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{MeterError, Result};
use crate::lifecycle::filter::HandlerResolver;
use crate::tags::Tags;

/// What the host server knows about one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    /// Route pattern that matched, when the server matched one.
    pub matched_pattern: Option<String>,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            matched_pattern: None,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.matched_pattern = Some(pattern.into());
        self
    }
}

/// Extra timer attached to a route.
///
/// A plain spec records one more completed-duration timer at finalize; a
/// long-task spec tracks the request as an active task from context creation
/// until finalize.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedSpec {
    name: Option<String>,
    long_task: bool,
    extra_tags: Tags,
    histogram: bool,
    percentiles: Vec<f64>,
}

impl TimedSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            long_task: false,
            extra_tags: Tags::empty(),
            histogram: false,
            percentiles: Vec::new(),
        }
    }

    /// Spec that records under the recorder's base name.
    pub fn unnamed() -> Self {
        Self {
            name: None,
            long_task: false,
            extra_tags: Tags::empty(),
            histogram: false,
            percentiles: Vec::new(),
        }
    }

    pub fn long_task(name: impl Into<String>) -> Self {
        Self {
            long_task: true,
            ..Self::named(name)
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_tags = self.extra_tags.and(key, value);
        self
    }

    pub fn histogram(mut self, on: bool) -> Self {
        self.histogram = on;
        self
    }

    /// Quantiles to publish, each in `(0, 1]`. Checked when the route table
    /// is built.
    pub fn percentiles(mut self, quantiles: &[f64]) -> Self {
        self.percentiles = quantiles.to_vec();
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_long_task(&self) -> bool {
        self.long_task
    }

    pub fn extra_tags(&self) -> &Tags {
        &self.extra_tags
    }

    pub fn publishes_histogram(&self) -> bool {
        self.histogram
    }

    pub fn published_percentiles(&self) -> &[f64] {
        &self.percentiles
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteHandler {
    method: String,
    pattern: String,
    timers: Vec<TimedSpec>,
}

impl RouteHandler {
    pub fn new(method: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            pattern: pattern.into(),
            timers: Vec::new(),
        }
    }

    pub fn timed(mut self, spec: TimedSpec) -> Self {
        self.timers.push(spec);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn timers(&self) -> &[TimedSpec] {
        &self.timers
    }

    pub fn long_task_timers(&self) -> impl Iterator<Item = &TimedSpec> {
        self.timers.iter().filter(|t| t.long_task)
    }

    pub fn plain_timers(&self) -> impl Iterator<Item = &TimedSpec> {
        self.timers.iter().filter(|t| !t.long_task)
    }
}

/// Immutable, validated set of routes. Iteration follows declaration order.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<RouteHandler>>,
    index: HashMap<(String, String), usize>,
}

impl RouteTable {
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteHandler> {
        self.routes.iter().map(|r| r.as_ref())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn get(&self, method: &str, pattern: &str) -> Option<Arc<RouteHandler>> {
        self.index
            .get(&(method.to_ascii_uppercase(), pattern.to_string()))
            .and_then(|&i| self.routes.get(i))
            .cloned()
    }
}

impl HandlerResolver for RouteTable {
    fn resolve(&self, request: &RequestInfo) -> Result<Option<Arc<RouteHandler>>> {
        let Some(pattern) = request.matched_pattern.as_deref() else {
            return Ok(None);
        };
        if let Some(h) = self.get(&request.method, pattern) {
            return Ok(Some(h));
        }
        // HEAD is served by the GET handler.
        if request.method.eq_ignore_ascii_case("HEAD") {
            if let Some(h) = self.get("GET", pattern) {
                return Ok(Some(h));
            }
        }
        Err(MeterError::Resolve(format!(
            "no handler for {} {}",
            request.method, pattern
        )))
    }
}

#[derive(Debug, Default)]
pub struct RouteTableBuilder {
    routes: Vec<RouteHandler>,
}

impl RouteTableBuilder {
    /// Route without extra timers.
    pub fn route(self, method: &str, pattern: &str) -> Self {
        self.handler(RouteHandler::new(method, pattern))
    }

    pub fn handler(mut self, handler: RouteHandler) -> Self {
        self.routes.push(handler);
        self
    }

    pub fn build(self) -> Result<RouteTable> {
        let mut table = RouteTable::default();
        for route in self.routes {
            if route.pattern.is_empty() {
                return Err(MeterError::InvalidRoute(format!(
                    "{} route with empty pattern",
                    route.method
                )));
            }
            if route.long_task_timers().any(|t| t.name.is_none()) {
                return Err(MeterError::InvalidRoute(format!(
                    "long task timer on {} {} requires a name",
                    route.method, route.pattern
                )));
            }
            let bad_quantile = route
                .timers
                .iter()
                .flat_map(|t| t.percentiles.iter())
                .find(|q| **q <= 0.0 || !(0.0..=1.0).contains(*q));
            if let Some(q) = bad_quantile {
                return Err(MeterError::InvalidRoute(format!(
                    "percentile {q} on {} {} is outside (0, 1]",
                    route.method, route.pattern
                )));
            }
            let key = (route.method.clone(), route.pattern.clone());
            if table.index.contains_key(&key) {
                return Err(MeterError::InvalidRoute(format!(
                    "duplicate route {} {}",
                    key.0, key.1
                )));
            }
            table.index.insert(key, table.routes.len());
            table.routes.push(Arc::new(route));
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn table() -> RouteTable {
        RouteTable::builder()
            .route("GET", "/api/users/:id")
            .handler(
                RouteHandler::new("post", "/api/users")
                    .timed(TimedSpec::named("users.create").tag("tier", "gold")),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn resolves_matched_pattern() {
        let t = table();
        let req = RequestInfo::new("GET", "/api/users/7").with_pattern("/api/users/:id");
        let h = t.resolve(&req).unwrap().unwrap();
        assert_eq!(h.pattern(), "/api/users/:id");

        let post = RequestInfo::new("POST", "/api/users").with_pattern("/api/users");
        let h = t.resolve(&post).unwrap().unwrap();
        assert_eq!(h.plain_timers().count(), 1);
    }

    #[test]
    fn head_falls_back_to_get() {
        let req = RequestInfo::new("HEAD", "/api/users/7").with_pattern("/api/users/:id");
        assert!(table().resolve(&req).unwrap().is_some());
    }

    #[test]
    fn unmatched_request_has_no_handler() {
        let req = RequestInfo::new("GET", "/nope");
        assert!(table().resolve(&req).unwrap().is_none());
    }

    #[test]
    fn unknown_pattern_is_a_resolution_error() {
        let req = RequestInfo::new("DELETE", "/api/users/7").with_pattern("/api/users/:id");
        let err = table().resolve(&req).unwrap_err();
        assert_eq!(err.code().as_str(), "RESOLVE");
    }

    #[test]
    fn rejects_unnamed_long_task() {
        let mut spec = TimedSpec::long_task("x");
        spec.name = None;
        let err = RouteTable::builder()
            .handler(RouteHandler::new("GET", "/slow").timed(spec))
            .build()
            .unwrap_err();
        assert_eq!(err.code().as_str(), "INVALID_ROUTE");
    }

    #[test]
    fn rejects_out_of_range_percentiles() {
        for q in [0.0, 1.5, f64::NAN] {
            let spec = TimedSpec::named("r").percentiles(&[0.5, q]);
            let err = RouteTable::builder()
                .handler(RouteHandler::new("GET", "/r").timed(spec))
                .build()
                .unwrap_err();
            assert_eq!(err.code().as_str(), "INVALID_ROUTE");
        }
        let spec = TimedSpec::named("r").percentiles(&[0.5, 1.0]);
        let ok = RouteTable::builder()
            .handler(RouteHandler::new("GET", "/r").timed(spec))
            .build()
            .unwrap();
        let h = ok.get("GET", "/r").unwrap();
        assert_eq!(h.timers()[0].published_percentiles(), &[0.5, 1.0]);
    }

    #[test]
    fn rejects_duplicates() {
        let err = RouteTable::builder()
            .route("GET", "/a")
            .route("get", "/a")
            .build()
            .unwrap_err();
        assert_eq!(err.code().as_str(), "INVALID_ROUTE");
    }
}
