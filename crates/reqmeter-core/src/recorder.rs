//! Metrics recorder.
//!
//! Owns two families of meters under one base name:
//!
//! - fine-grained meters keyed by the resolved request tags (a timer and a
//!   windowed ok/nok counter per tag combination, registered on first use);
//! - the application root aggregate tagged `uri=root`, registered eagerly:
//!   timer, ok/nok counters, a 1-minute request rate and the Apdex buckets.
//!
//! A cumulative `http.response.status{status=NXX}` counter tracks status
//! families. Registration problems are logged and skipped; they never reach
//! the request.
//!
//! With `auto_time_requests` off, only routes that declare a plain timer are
//! recorded; long-task timers run either way.

use std::sync::Arc;
use std::time::Duration;

use crate::apdex::{ApdexClass, ApdexThresholds};
use crate::error::Result;
use crate::lifecycle::context::TimingContext;
use crate::lifecycle::filter::{Outcome, TagsProvider};
use crate::lifecycle::routes::{RequestInfo, RouteHandler};
use crate::meter::{Counter, Timer};
use crate::registry::MeterRegistry;
use crate::tags::Tags;

pub const DEFAULT_BASE_NAME: &str = "http.server.requests";
/// `uri` value of the application root aggregate.
pub const ROOT_URI: &str = "root";
pub const STATUS_COUNTER: &str = "http.response.status";

const RESPONSE_WINDOW_DESC: &str = "App response window counter";
const REQUEST_WINDOW_DESC: &str = "Window counter of request responses";
const APDEX_WINDOW_DESC: &str = "App apdex window counter";
const RATE_WINDOW_DESC: &str = "App request rate window counter";
const STATUS_DESC: &str = "Responses by status family";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderSettings {
    pub base_name: String,
    pub apdex: Option<ApdexThresholds>,
    /// Publish histogram buckets on the request timers.
    pub histogram: bool,
    /// Time every request, not only routes with a plain timer.
    pub auto_time_requests: bool,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            base_name: DEFAULT_BASE_NAME.to_string(),
            apdex: None,
            histogram: false,
            auto_time_requests: true,
        }
    }
}

struct ApdexCounters {
    thresholds: ApdexThresholds,
    satisfied: Arc<Counter>,
    tolerating: Arc<Counter>,
    total: Arc<Counter>,
}

impl ApdexCounters {
    fn record(&self, elapsed: Duration) {
        self.total.increment();
        match self.thresholds.classify(elapsed) {
            ApdexClass::Satisfied => self.satisfied.increment(),
            ApdexClass::Tolerating => self.tolerating.increment(),
            ApdexClass::Frustrated => {}
        }
    }
}

pub struct RequestMetrics {
    registry: Arc<MeterRegistry>,
    settings: RecorderSettings,
    tags: Arc<dyn TagsProvider>,
    root_timer: Arc<Timer>,
    root_ok: Arc<Counter>,
    root_nok: Arc<Counter>,
    root_rate: Arc<Counter>,
    apdex: Option<ApdexCounters>,
}

impl RequestMetrics {
    /// Registers the root aggregate. Fails on a kind clash with meters that
    /// already live in `registry`.
    pub fn new(
        registry: Arc<MeterRegistry>,
        settings: RecorderSettings,
        tags: Arc<dyn TagsProvider>,
    ) -> Result<Self> {
        let base = settings.base_name.as_str();
        let root = Tags::of(&[("uri", ROOT_URI)]);

        let root_timer = registry.timer(base, &root, settings.histogram)?;
        let response = |value: &str| {
            registry.counter(base, &root.clone().and("response", value), RESPONSE_WINDOW_DESC)
        };
        let root_ok = response("ok")?;
        let root_nok = response("nok")?;
        let root_rate = registry.counter(
            &format!("{base}.uri.{ROOT_URI}.1.min.request.rate"),
            &Tags::empty(),
            RATE_WINDOW_DESC,
        )?;

        let apdex = match settings.apdex {
            Some(thresholds) => {
                let bucket = |name: &str| {
                    registry.counter(base, &root.clone().and("apdex", name), APDEX_WINDOW_DESC)
                };
                Some(ApdexCounters {
                    thresholds,
                    satisfied: bucket("satisfied")?,
                    tolerating: bucket("tolerating")?,
                    total: bucket("total")?,
                })
            }
            None => None,
        };

        Ok(Self {
            registry,
            settings,
            tags,
            root_timer,
            root_ok,
            root_nok,
            root_rate,
            apdex,
        })
    }

    pub fn registry(&self) -> &Arc<MeterRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    pub fn base_name(&self) -> &str {
        &self.settings.base_name
    }

    /// Whether a request finalized against `handler` records request meters.
    pub fn times(&self, handler: Option<&RouteHandler>) -> bool {
        self.settings.auto_time_requests
            || handler.is_some_and(|h| h.plain_timers().next().is_some())
    }

    /// Build the timing context for a newly seen request and start its
    /// long-task timers.
    pub fn start(&self, request: RequestInfo, handler: Option<Arc<RouteHandler>>) -> TimingContext {
        let sample = Timer::start(self.registry.clock());
        let mut long_tasks = Vec::new();
        if let Some(h) = handler.as_deref() {
            let base_tags = self.tags.long_request_tags(&request, Some(h));
            for spec in h.long_task_timers() {
                let Some(name) = spec.name() else { continue };
                let tags = base_tags.clone().extend(spec.extra_tags());
                if let Some(ltt) = skip_on_error(self.registry.long_task_timer(name, &tags)) {
                    long_tasks.push(ltt.start());
                }
            }
        }
        TimingContext::new(request, handler, sample, long_tasks)
    }

    /// Finalize `ctx`. Only the first call per context records; later calls
    /// return `None`.
    pub fn record(&self, ctx: &TimingContext, outcome: &Outcome) -> Option<Duration> {
        if !ctx.try_complete() {
            return None;
        }
        let elapsed = ctx.elapsed();
        for mut sample in ctx.take_long_tasks() {
            sample.stop();
        }
        if !self.times(ctx.handler()) {
            return Some(elapsed);
        }

        let base = self.settings.base_name.as_str();
        let tags = self.tags.request_tags(ctx.request(), ctx.handler(), outcome);
        let response = if outcome.is_failure() { "nok" } else { "ok" };

        let timer = self.registry.timer(base, &tags, self.settings.histogram);
        if let Some(timer) = skip_on_error(timer) {
            timer.record(elapsed);
        }
        let with_response = tags.clone().and("response", response);
        let counter = self.registry.counter(base, &with_response, REQUEST_WINDOW_DESC);
        if let Some(counter) = skip_on_error(counter) {
            counter.increment();
        }

        if let Some(h) = ctx.handler() {
            for spec in h.plain_timers() {
                let name = spec.name().unwrap_or(base);
                let spec_tags = tags.clone().extend(spec.extra_tags());
                let timer = self.registry.timer_with_percentiles(
                    name,
                    &spec_tags,
                    spec.publishes_histogram(),
                    spec.published_percentiles(),
                );
                if let Some(timer) = skip_on_error(timer) {
                    timer.record(elapsed);
                }
            }
        }

        self.record_root(elapsed, outcome);

        let family_value = status_family(outcome.status);
        let family = Tags::of(&[("status", family_value.as_str())]);
        let counter = self.registry.counter(STATUS_COUNTER, &family, STATUS_DESC);
        if let Some(counter) = skip_on_error(counter) {
            counter.increment();
        }
        Some(elapsed)
    }

    fn record_root(&self, elapsed: Duration, outcome: &Outcome) {
        self.root_timer.record(elapsed);
        if outcome.is_failure() {
            self.root_nok.increment();
        } else {
            self.root_ok.increment();
        }
        self.root_rate.increment();
        if let Some(apdex) = &self.apdex {
            apdex.record(elapsed);
        }
    }
}

/// `404` -> `4XX`.
pub fn status_family(status: u16) -> String {
    format!("{}XX", status / 100)
}

fn skip_on_error<T>(res: Result<T>) -> Option<T> {
    match res {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(code = e.code().as_str(), error = %e, "skipping meter update");
            None
        }
    }
}
