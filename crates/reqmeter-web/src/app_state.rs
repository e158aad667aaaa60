//! Shared application state.
//!
//! Built once at startup from config and the route table; any construction
//! error is returned so `main` can exit cleanly.

use std::collections::HashMap;
use std::sync::Arc;

use reqmeter_core::clock::{Clock, SystemClock};
use reqmeter_core::discovery::{
    CounterDiscovery, DiscoveryProvider, EndpointDiscovery, GaugeDiscovery,
};
use reqmeter_core::error::Result;
use reqmeter_core::lifecycle::{HttpTagsProvider, MetricsFilter, RouteTable};
use reqmeter_core::meter::Gauge;
use reqmeter_core::recorder::RequestMetrics;
use reqmeter_core::registry::{LogSink, MeterRegistry};
use reqmeter_core::tags::Tags;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: AppConfig,
    registry: Arc<MeterRegistry>,
    routes: Arc<RouteTable>,
    filter: Option<Arc<MetricsFilter>>,
    discovery: HashMap<&'static str, Arc<dyn DiscoveryProvider>>,
}

impl AppState {
    pub fn new(cfg: AppConfig, routes: RouteTable) -> Result<Self> {
        Self::with_clock(cfg, routes, Arc::new(SystemClock::new()))
    }

    /// Same as [`AppState::new`] with an explicit time source.
    pub fn with_clock(cfg: AppConfig, routes: RouteTable, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut registry = MeterRegistry::new(clock, cfg.metrics.window.spec()?);
        registry.add_sink(Arc::new(LogSink));
        let registry = Arc::new(registry);
        let routes = Arc::new(routes);

        registry.gauge(
            "http.server.routes",
            &Tags::empty(),
            Gauge::weak(&routes, |r| r.len() as f64),
        )?;

        let filter = if cfg.metrics.enabled {
            let metrics = RequestMetrics::new(
                Arc::clone(&registry),
                cfg.metrics.recorder_settings()?,
                Arc::new(HttpTagsProvider),
            )?;
            Some(Arc::new(MetricsFilter::new(routes.clone(), Arc::new(metrics))))
        } else {
            tracing::info!("request metrics disabled");
            None
        };

        let mut discovery: HashMap<&'static str, Arc<dyn DiscoveryProvider>> = HashMap::new();
        discovery.insert("counter", Arc::new(CounterDiscovery::new(Arc::clone(&registry))));
        discovery.insert("gauge", Arc::new(GaugeDiscovery::new(Arc::clone(&registry))));
        discovery.insert(
            "endpoint",
            Arc::new(EndpointDiscovery::new(&routes, &cfg.metrics.endpoint.pattern)?),
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                cfg,
                registry,
                routes,
                filter,
                discovery,
            }),
        })
    }

    pub fn cfg(&self) -> &AppConfig {
        &self.inner.cfg
    }

    pub fn registry(&self) -> Arc<MeterRegistry> {
        Arc::clone(&self.inner.registry)
    }

    pub fn routes(&self) -> Arc<RouteTable> {
        Arc::clone(&self.inner.routes)
    }

    /// `None` when request metrics are disabled.
    pub fn filter(&self) -> Option<Arc<MetricsFilter>> {
        self.inner.filter.clone()
    }

    pub fn discovery(&self, provider: &str) -> Option<Arc<dyn DiscoveryProvider>> {
        self.inner.discovery.get(provider).cloned()
    }
}
