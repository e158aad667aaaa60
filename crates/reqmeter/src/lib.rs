//! Top-level facade crate for reqmeter.
//!
//! `core` is the transport-agnostic engine, `web` the axum integration. The
//! prelude pulls in what a host needs to time its own requests:
//!
//! ```no_run
//! use std::sync::Arc;
//! use reqmeter::prelude::*;
//!
//! # fn main() -> reqmeter::core::Result<()> {
//! let registry = Arc::new(MeterRegistry::default());
//! let routes = Arc::new(RouteTable::builder().route("GET", "/items").build()?);
//! let settings = RecorderSettings::default();
//! let metrics = RequestMetrics::new(registry, settings, Arc::new(HttpTagsProvider))?;
//! let filter = MetricsFilter::new(routes, Arc::new(metrics));
//!
//! let request = RequestInfo::new("GET", "/items").with_pattern("/items");
//! let slot = TimingSlot::new();
//! if let Pass::Timed(ctx) = filter.enter(&request, &slot) {
//!     filter.exit(&ctx, PassOutcome::Completed { status: 200, failure: None });
//! }
//! # Ok(())
//! # }
//! ```

pub mod core {
    pub use reqmeter_core::*;
}

pub mod web {
    pub use reqmeter_web::*;
}

pub mod prelude {
    pub use reqmeter_core::apdex::{ApdexSettings, ApdexThresholds};
    pub use reqmeter_core::lifecycle::{
        ChainResponse, HandlerResolver, HttpTagsProvider, MetricsFilter, Pass, PassOutcome,
        RequestInfo, RouteHandler, RouteTable, TimedSpec, TimingSlot,
    };
    pub use reqmeter_core::recorder::{RecorderSettings, RequestMetrics};
    pub use reqmeter_core::registry::MeterRegistry;
    pub use reqmeter_core::tags::Tags;
    pub use reqmeter_web::middleware::{ChainFailure, Deferred};
}
