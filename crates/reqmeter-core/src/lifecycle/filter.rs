//! Request filter: drives the timing context around an opaque chain.
//!
//! A request passes through the filter once per dispatch phase. The first
//! pass creates the context; later passes reuse it. The pass that is not
//! about to suspend again (or that saw the chain fail) finalizes.

use std::error::Error as StdError;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;

use crate::error::Result;
use crate::lifecycle::context::{TimingContext, TimingSlot};
use crate::lifecycle::routes::{RequestInfo, RouteHandler};
use crate::recorder::{RequestMetrics, ROOT_URI};
use crate::tags::Tags;

/// Maps a request to the handler that will serve it.
///
/// `Ok(None)` means no route matched (the request is still timed);
/// `Err` means resolution itself failed and the request goes untimed.
pub trait HandlerResolver: Send + Sync {
    fn resolve(&self, request: &RequestInfo) -> Result<Option<Arc<RouteHandler>>>;
}

/// Final result of one request as seen by the recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: u16,
    /// Innermost error message when the chain failed.
    pub failure: Option<String>,
}

impl Outcome {
    pub fn ok(status: u16) -> Self {
        Self { status, failure: None }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// Tag resolution collaborator.
pub trait TagsProvider: Send + Sync {
    fn request_tags(
        &self,
        request: &RequestInfo,
        handler: Option<&RouteHandler>,
        outcome: &Outcome,
    ) -> Tags;

    fn long_request_tags(&self, request: &RequestInfo, handler: Option<&RouteHandler>) -> Tags;
}

/// `method` plus `uri`, the route pattern when one is known.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpTagsProvider;

impl HttpTagsProvider {
    fn uri(request: &RequestInfo, handler: Option<&RouteHandler>, status: Option<u16>) -> String {
        if let Some(h) = handler {
            return h.pattern().to_string();
        }
        if let Some(p) = &request.matched_pattern {
            return p.clone();
        }
        match status {
            Some(s) if (300..400).contains(&s) => return "REDIRECTION".into(),
            Some(404) => return "NOT_FOUND".into(),
            _ => {}
        }
        if request.path.is_empty() || request.path == "/" {
            ROOT_URI.into()
        } else {
            "UNKNOWN".into()
        }
    }
}

impl TagsProvider for HttpTagsProvider {
    fn request_tags(
        &self,
        request: &RequestInfo,
        handler: Option<&RouteHandler>,
        outcome: &Outcome,
    ) -> Tags {
        Tags::empty()
            .and("method", request.method.as_str())
            .and("uri", Self::uri(request, handler, Some(outcome.status)))
    }

    fn long_request_tags(&self, request: &RequestInfo, handler: Option<&RouteHandler>) -> Tags {
        Tags::empty()
            .and("method", request.method.as_str())
            .and("uri", Self::uri(request, handler, None))
    }
}

/// Result of [`MetricsFilter::enter`].
#[derive(Debug)]
pub enum Pass {
    Timed(Arc<TimingContext>),
    /// Resolution failed: forward the request untouched, record nothing.
    Untimed,
}

impl Pass {
    pub fn context(&self) -> Option<&Arc<TimingContext>> {
        match self {
            Pass::Timed(ctx) => Some(ctx),
            Pass::Untimed => None,
        }
    }
}

/// How one pass through the chain ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The host will dispatch the request again later.
    Suspended,
    Completed { status: u16, failure: Option<String> },
    /// An error or panic propagated out of the chain.
    Failed { failure: String },
}

/// What the filter needs to know about a chain's successful return value.
pub trait ChainResponse {
    /// The chain handed the request to an asynchronous continuation.
    fn async_started(&self) -> bool {
        false
    }

    fn status(&self) -> u16;

    /// Failure recorded by the chain without propagating an error.
    fn failure(&self) -> Option<String> {
        None
    }
}

pub struct MetricsFilter {
    resolver: Arc<dyn HandlerResolver>,
    metrics: Arc<RequestMetrics>,
}

impl MetricsFilter {
    pub fn new(resolver: Arc<dyn HandlerResolver>, metrics: Arc<RequestMetrics>) -> Self {
        Self { resolver, metrics }
    }

    pub fn metrics(&self) -> &Arc<RequestMetrics> {
        &self.metrics
    }

    /// Create or retrieve the context for this pass.
    pub fn enter(&self, request: &RequestInfo, slot: &TimingSlot) -> Pass {
        if let Some(ctx) = slot.get() {
            ctx.resume();
            return Pass::Timed(ctx);
        }
        let handler = match self.resolver.resolve(request) {
            Ok(h) => h,
            Err(e) => {
                tracing::debug!(
                    method = %request.method,
                    path = %request.path,
                    error = %e,
                    "unable to time request"
                );
                return Pass::Untimed;
            }
        };
        let has_long_tasks = handler
            .as_deref()
            .is_some_and(|h| h.long_task_timers().next().is_some());
        if !has_long_tasks && !self.metrics.times(handler.as_deref()) {
            return Pass::Untimed;
        }
        let (ctx, created) = slot.get_or_attach(|| self.metrics.start(request.clone(), handler));
        if !created {
            ctx.resume();
        }
        Pass::Timed(ctx)
    }

    /// Close one pass. Returns the recorded duration when this call finalized.
    pub fn exit(&self, ctx: &TimingContext, outcome: PassOutcome) -> Option<Duration> {
        match outcome {
            PassOutcome::Suspended => {
                ctx.suspend();
                None
            }
            PassOutcome::Completed { status, failure } => {
                self.metrics.record(ctx, &Outcome { status, failure })
            }
            PassOutcome::Failed { failure } => self.metrics.record(
                ctx,
                &Outcome {
                    status: 500,
                    failure: Some(failure),
                },
            ),
        }
    }

    /// Run a synchronous chain inside one pass.
    pub fn filter<R, E, F>(
        &self,
        request: &RequestInfo,
        slot: &TimingSlot,
        chain: F,
    ) -> std::result::Result<R, E>
    where
        R: ChainResponse,
        E: StdError + 'static,
        F: FnOnce() -> std::result::Result<R, E>,
    {
        let Pass::Timed(ctx) = self.enter(request, slot) else {
            return chain();
        };
        match std::panic::catch_unwind(AssertUnwindSafe(chain)) {
            Ok(result) => {
                self.exit(&ctx, pass_outcome(&result));
                result
            }
            Err(payload) => {
                self.exit(
                    &ctx,
                    PassOutcome::Failed {
                        failure: panic_message(payload.as_ref()),
                    },
                );
                std::panic::resume_unwind(payload)
            }
        }
    }

    /// Run an async chain inside one pass. A panic in `chain` is recorded as
    /// a failure and resumed.
    pub async fn filter_async<R, E, Fut>(
        &self,
        request: &RequestInfo,
        slot: &TimingSlot,
        chain: Fut,
    ) -> std::result::Result<R, E>
    where
        R: ChainResponse,
        E: StdError + 'static,
        Fut: Future<Output = std::result::Result<R, E>>,
    {
        let Pass::Timed(ctx) = self.enter(request, slot) else {
            return chain.await;
        };
        match AssertUnwindSafe(chain).catch_unwind().await {
            Ok(result) => {
                self.exit(&ctx, pass_outcome(&result));
                result
            }
            Err(payload) => {
                self.exit(
                    &ctx,
                    PassOutcome::Failed {
                        failure: panic_message(payload.as_ref()),
                    },
                );
                std::panic::resume_unwind(payload)
            }
        }
    }
}

fn pass_outcome<R, E>(result: &std::result::Result<R, E>) -> PassOutcome
where
    R: ChainResponse,
    E: StdError + 'static,
{
    match result {
        Ok(r) if r.async_started() => PassOutcome::Suspended,
        Ok(r) => PassOutcome::Completed {
            status: r.status(),
            failure: r.failure(),
        },
        Err(e) => PassOutcome::Failed {
            failure: root_cause(e).to_string(),
        },
    }
}

/// Innermost error of a `source()` chain.
pub fn root_cause<'a>(err: &'a (dyn StdError + 'static)) -> &'a (dyn StdError + 'static) {
    let mut current = err;
    while let Some(next) = current.source() {
        current = next;
    }
    current
}

pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
