//! Request lifecycle: routes, per-request timing context, and the filter
//! that ties them to a host server's dispatch phases.

pub mod context;
pub mod filter;
pub mod routes;

pub use context::{Phase, TimingContext, TimingSlot};
pub use filter::{
    ChainResponse, HandlerResolver, HttpTagsProvider, MetricsFilter, Outcome, Pass, PassOutcome,
    TagsProvider,
};
pub use routes::{RequestInfo, RouteHandler, RouteTable, RouteTableBuilder, TimedSpec};
