//! Request tracking middleware.
//!
//! Install with `axum::middleware::from_fn_with_state(state, track_requests)`.
//! Each request gets a [`TimingSlot`] in its extensions and goes through one
//! filter pass around `next.run`. Handlers steer finalization through
//! response extensions:
//!
//! - [`Deferred`]: the response body is produced later. The pass suspends and
//!   a guard on the body stream finalizes when the stream ends, fails, or is
//!   dropped.
//! - [`ChainFailure`]: the handler failed; record the request as `nok`.

use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use bytes::Bytes;
use futures_util::{FutureExt, Stream};
use reqmeter_core::lifecycle::filter::panic_message;
use reqmeter_core::lifecycle::{
    MetricsFilter, PassOutcome, RequestInfo, TimingContext, TimingSlot,
};

use crate::app_state::AppState;

/// Response marker: finalize when the body stream finishes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deferred;

/// Response marker: the handler failed with this message.
#[derive(Debug, Clone)]
pub struct ChainFailure(pub String);

pub async fn track_requests(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(filter) = state.filter() else {
        return next.run(req).await;
    };

    let info = request_info(&req);
    let slot = match req.extensions().get::<TimingSlot>() {
        Some(slot) => slot.clone(),
        None => {
            let slot = TimingSlot::new();
            req.extensions_mut().insert(slot.clone());
            slot
        }
    };

    let Some(ctx) = filter.enter(&info, &slot).context().cloned() else {
        return next.run(req).await;
    };

    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => finish(filter, ctx, response),
        Err(payload) => {
            filter.exit(
                &ctx,
                PassOutcome::Failed {
                    failure: panic_message(payload.as_ref()),
                },
            );
            std::panic::resume_unwind(payload)
        }
    }
}

pub fn request_info(req: &Request) -> RequestInfo {
    let info = RequestInfo::new(req.method().as_str(), req.uri().path());
    match req.extensions().get::<MatchedPath>() {
        Some(matched) => info.with_pattern(matched.as_str()),
        None => info,
    }
}

fn finish(filter: Arc<MetricsFilter>, ctx: Arc<TimingContext>, response: Response) -> Response {
    let status = response.status().as_u16();
    let failure = response.extensions().get::<ChainFailure>().map(|f| f.0.clone());

    if failure.is_some() || response.extensions().get::<Deferred>().is_none() {
        filter.exit(&ctx, PassOutcome::Completed { status, failure });
        return response;
    }

    filter.exit(&ctx, PassOutcome::Suspended);
    let (parts, body) = response.into_parts();
    let guarded = GuardedBody {
        inner: body.into_data_stream(),
        guard: BodyGuard {
            filter,
            ctx,
            status,
            done: false,
        },
    };
    Response::from_parts(parts, Body::from_stream(guarded))
}

struct BodyGuard {
    filter: Arc<MetricsFilter>,
    ctx: Arc<TimingContext>,
    status: u16,
    done: bool,
}

impl BodyGuard {
    fn finish(&mut self, failure: Option<String>) {
        if self.done {
            return;
        }
        self.done = true;
        self.filter.exit(
            &self.ctx,
            PassOutcome::Completed {
                status: self.status,
                failure,
            },
        );
    }
}

impl Drop for BodyGuard {
    fn drop(&mut self) {
        self.finish(Some("response body dropped before completion".into()));
    }
}

struct GuardedBody<S> {
    inner: S,
    guard: BodyGuard,
}

impl<S, E> Stream for GuardedBody<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_next(cx);
        match &polled {
            Poll::Ready(None) => this.guard.finish(None),
            Poll::Ready(Some(Err(e))) => this.guard.finish(Some(e.to_string())),
            _ => {}
        }
        polled
    }
}
