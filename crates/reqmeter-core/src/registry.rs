//! Tag-keyed meter registry.
//!
//! Meters live in a `DashMap` keyed by [`MeterId`]. Updates to an existing
//! tag combination only take a shard read lock; the first registration of a
//! combination takes the shard write lock once and allocates the meter. Every
//! registration gets a sequence number so enumeration follows registration
//! order. Nothing is ever unregistered.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::{Clock, SystemClock};
use crate::error::{MeterError, Result};
use crate::meter::{Counter, Gauge, LongTaskTimer, Meter, MeterKind, Timer};
use crate::naming::{snake_case, MeterId};
use crate::tags::Tags;
use crate::window::{RollingCounter, WindowSpec};

/// Push-style export collaborator, notified once per new meter.
pub trait RegistrySink: Send + Sync {
    fn on_register(&self, id: &MeterId, kind: MeterKind, description: &str);
}

/// Sink that reports registrations as tracing events.
#[derive(Debug, Default)]
pub struct LogSink;

impl RegistrySink for LogSink {
    fn on_register(&self, id: &MeterId, kind: MeterKind, description: &str) {
        tracing::debug!(
            meter = %id.hierarchical_name(),
            kind = kind.as_str(),
            description,
            "meter registered"
        );
    }
}

struct Entry {
    meter: Meter,
    seq: u64,
    description: String,
}

/// One row of the registry enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registered {
    pub id: MeterId,
    pub kind: MeterKind,
    pub description: String,
}

impl Registered {
    pub fn hierarchical_name(&self) -> String {
        self.id.hierarchical_name()
    }
}

pub struct MeterRegistry {
    meters: DashMap<MeterId, Entry>,
    seq: AtomicU64,
    clock: Arc<dyn Clock>,
    window: WindowSpec,
    sinks: Vec<Arc<dyn RegistrySink>>,
}

impl Default for MeterRegistry {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock::new()), WindowSpec::default())
    }
}

impl MeterRegistry {
    pub fn new(clock: Arc<dyn Clock>, window: WindowSpec) -> Self {
        Self {
            meters: DashMap::new(),
            seq: AtomicU64::new(1),
            clock,
            window,
            sinks: Vec::new(),
        }
    }

    /// Attach an export sink. Sinks only see meters registered afterwards.
    pub fn add_sink(&mut self, sink: Arc<dyn RegistrySink>) {
        self.sinks.push(sink);
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn window(&self) -> WindowSpec {
        self.window
    }

    pub fn len(&self) -> usize {
        self.meters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meters.is_empty()
    }

    fn get_or_register<F>(
        &self,
        name: &str,
        tags: &Tags,
        kind: MeterKind,
        description: &str,
        make: F,
    ) -> Result<Meter>
    where
        F: FnOnce() -> Meter,
    {
        let id = MeterId::new(name, tags);

        // Fast path: existing combination, shard read lock only.
        let existing = self.meters.get(&id).map(|e| e.meter.clone());
        let (meter, created) = match existing {
            Some(m) => (m, false),
            None => {
                let mut created = false;
                let meter = self
                    .meters
                    .entry(id.clone())
                    .or_insert_with(|| {
                        created = true;
                        Entry {
                            meter: make(),
                            seq: self.seq.fetch_add(1, Ordering::Relaxed),
                            description: description.to_string(),
                        }
                    })
                    .meter
                    .clone();
                (meter, created)
            }
        };

        if meter.kind() != kind {
            return Err(MeterError::KindMismatch {
                name: id.to_string(),
                existing: meter.kind().as_str(),
                requested: kind.as_str(),
            });
        }
        if created {
            for sink in &self.sinks {
                sink.on_register(&id, kind, description);
            }
        }
        Ok(meter)
    }

    /// Counter whose flavor follows its description: anything mentioning
    /// "window" is backed by a decaying rolling window, the rest are
    /// cumulative.
    pub fn counter(&self, name: &str, tags: &Tags, description: &str) -> Result<Arc<Counter>> {
        let windowed = description.to_ascii_lowercase().contains("window");
        let meter = self.get_or_register(name, tags, MeterKind::Counter, description, || {
            let counter = if windowed {
                Counter::windowed(RollingCounter::new(self.window, Arc::clone(&self.clock)))
            } else {
                Counter::cumulative()
            };
            Meter::Counter(Arc::new(counter))
        })?;
        match meter {
            Meter::Counter(c) => Ok(c),
            _ => Err(self.mismatch(name, tags, &meter, MeterKind::Counter)),
        }
    }

    /// Windowed counter regardless of description.
    pub fn windowed_counter(&self, name: &str, tags: &Tags) -> Result<Arc<Counter>> {
        self.counter(name, tags, "window counter")
    }

    pub fn timer(&self, name: &str, tags: &Tags, histogram: bool) -> Result<Arc<Timer>> {
        self.timer_with_percentiles(name, tags, histogram, &[])
    }

    /// Timer that also publishes `percentiles`. Like the histogram flag, they
    /// are fixed by whichever call registers the id first.
    pub fn timer_with_percentiles(
        &self,
        name: &str,
        tags: &Tags,
        histogram: bool,
        percentiles: &[f64],
    ) -> Result<Arc<Timer>> {
        let meter = self.get_or_register(name, tags, MeterKind::Timer, "timer", || {
            Meter::Timer(Arc::new(Timer::with_percentiles(histogram, percentiles)))
        })?;
        match meter {
            Meter::Timer(t) => Ok(t),
            _ => Err(self.mismatch(name, tags, &meter, MeterKind::Timer)),
        }
    }

    pub fn long_task_timer(&self, name: &str, tags: &Tags) -> Result<Arc<LongTaskTimer>> {
        let meter =
            self.get_or_register(name, tags, MeterKind::LongTaskTimer, "long task timer", || {
                Meter::LongTaskTimer(Arc::new(LongTaskTimer::new(Arc::clone(&self.clock))))
            })?;
        match meter {
            Meter::LongTaskTimer(t) => Ok(t),
            _ => Err(self.mismatch(name, tags, &meter, MeterKind::LongTaskTimer)),
        }
    }

    /// Register `gauge`; if the id already holds a gauge, that one is kept.
    pub fn gauge(&self, name: &str, tags: &Tags, gauge: Gauge) -> Result<Arc<Gauge>> {
        let meter = self.get_or_register(name, tags, MeterKind::Gauge, "gauge", || {
            Meter::Gauge(Arc::new(gauge))
        })?;
        match meter {
            Meter::Gauge(g) => Ok(g),
            _ => Err(self.mismatch(name, tags, &meter, MeterKind::Gauge)),
        }
    }

    fn mismatch(&self, name: &str, tags: &Tags, meter: &Meter, requested: MeterKind) -> MeterError {
        MeterError::KindMismatch {
            name: MeterId::new(name, tags).to_string(),
            existing: meter.kind().as_str(),
            requested: requested.as_str(),
        }
    }

    pub fn find(&self, name: &str, tags: &Tags) -> Option<Meter> {
        self.meters
            .get(&MeterId::new(name, tags))
            .map(|e| e.meter.clone())
    }

    pub fn find_counter(&self, name: &str, tags: &Tags) -> Option<Arc<Counter>> {
        match self.find(name, tags)? {
            Meter::Counter(c) => Some(c),
            _ => None,
        }
    }

    pub fn find_timer(&self, name: &str, tags: &Tags) -> Option<Arc<Timer>> {
        match self.find(name, tags)? {
            Meter::Timer(t) => Some(t),
            _ => None,
        }
    }

    /// Every meter of `kind` (all kinds when `None`), in registration order.
    pub fn registered(&self, kind: Option<MeterKind>) -> Vec<Registered> {
        let mut rows: Vec<(u64, Registered)> = self
            .meters
            .iter()
            .filter(|e| kind.map_or(true, |k| e.value().meter.kind() == k))
            .map(|e| {
                (
                    e.value().seq,
                    Registered {
                        id: e.key().clone(),
                        kind: e.value().meter.kind(),
                        description: e.value().description.clone(),
                    },
                )
            })
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, r)| r).collect()
    }

    /// Hierarchical names of every meter of `kind`, in registration order.
    pub fn registered_names(&self, kind: MeterKind) -> Vec<String> {
        self.registered(Some(kind))
            .iter()
            .map(Registered::hierarchical_name)
            .collect()
    }

    /// Render in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut rows: Vec<(String, u64, MeterId, Meter)> = self
            .meters
            .iter()
            .map(|e| {
                let family = family_name(e.key().name(), &e.value().meter);
                (family, e.value().seq, e.key().clone(), e.value().meter.clone())
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut out = String::new();
        let mut current_family: Option<&str> = None;
        for (family, _, id, meter) in &rows {
            if current_family != Some(family.as_str()) {
                let _ = writeln!(out, "# TYPE {} {}", family, prometheus_type(meter));
                current_family = Some(family.as_str());
            }
            render_meter(&mut out, family, id, meter);
        }
        out
    }
}

/// Helper to escape label values.
fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn label_str(id: &MeterId) -> String {
    id.tags()
        .iter()
        .map(|t| format!("{}=\"{}\"", snake_case(&t.key), escape_label(&t.value)))
        .collect::<Vec<_>>()
        .join(",")
}

fn family_name(name: &str, meter: &Meter) -> String {
    let base = snake_case(name);
    match meter {
        Meter::Counter(c) if c.is_windowed() => format!("{base}_window"),
        Meter::Counter(_) => format!("{base}_total"),
        Meter::Timer(_) => format!("{base}_duration_micros"),
        Meter::LongTaskTimer(_) => format!("{base}_active"),
        Meter::Gauge(_) => base,
    }
}

fn prometheus_type(meter: &Meter) -> &'static str {
    match meter {
        Meter::Counter(c) if c.is_windowed() => "gauge",
        Meter::Counter(_) => "counter",
        Meter::Timer(t) if t.publishes_histogram() => "histogram",
        Meter::Timer(_) => "summary",
        Meter::LongTaskTimer(_) | Meter::Gauge(_) => "gauge",
    }
}

fn render_meter(out: &mut String, family: &str, id: &MeterId, meter: &Meter) {
    let labels = label_str(id);
    let braced = if labels.is_empty() {
        String::new()
    } else {
        format!("{{{labels}}}")
    };
    match meter {
        Meter::Counter(c) => {
            let _ = writeln!(out, "{}{} {}", family, braced, c.count());
        }
        Meter::Gauge(g) => {
            let _ = writeln!(out, "{}{} {}", family, braced, g.value());
        }
        Meter::LongTaskTimer(t) => {
            let _ = writeln!(out, "{}{} {}", family, braced, t.active_tasks());
            let _ = writeln!(
                out,
                "{}_duration_micros{} {}",
                family,
                braced,
                t.duration().as_micros()
            );
        }
        Meter::Timer(t) => {
            let prefix = if labels.is_empty() {
                String::new()
            } else {
                format!("{labels},")
            };
            for (le, count) in t.buckets() {
                let _ = writeln!(out, "{}_bucket{{{}le=\"{}\"}} {}", family, prefix, le, count);
            }
            if t.publishes_histogram() {
                let _ = writeln!(out, "{}_bucket{{{}le=\"+Inf\"}} {}", family, prefix, t.count());
            }
            // A histogram family cannot carry quantiles; they go to a sibling.
            let quantiles = if t.publishes_histogram() {
                format!("{family}_percentile")
            } else {
                family.to_string()
            };
            for (q, value) in t.percentile_values() {
                let _ = writeln!(
                    out,
                    "{}{{{}quantile=\"{}\"}} {}",
                    quantiles,
                    prefix,
                    q,
                    value.as_micros()
                );
            }
            let _ = writeln!(out, "{}_sum{} {}", family, braced, t.total().as_micros());
            let _ = writeln!(out, "{}_count{} {}", family, braced, t.count());
            let _ = writeln!(out, "{}_max{} {}", family, braced, t.max().as_micros());
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Mutex;
    use std::time::Duration;

    fn registry() -> (Arc<ManualClock>, MeterRegistry) {
        let clock = Arc::new(ManualClock::new());
        let reg = MeterRegistry::new(clock.clone(), WindowSpec::default());
        (clock, reg)
    }

    #[test]
    fn same_id_returns_same_meter() {
        let (_, reg) = registry();
        let tags = Tags::of(&[("uri", "/a")]);
        let a = reg.counter("hits", &tags, "").unwrap();
        let b = reg.counter("hits", &tags, "").unwrap();
        a.increment();
        b.increment();
        assert_eq!(a.count(), 2);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn tag_order_does_not_change_identity() {
        let (_, reg) = registry();
        let a = reg.counter("hits", &Tags::of(&[("a", "1"), ("b", "2")]), "").unwrap();
        let b = reg.counter("hits", &Tags::of(&[("b", "2"), ("a", "1")]), "").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn description_selects_windowed_counter() {
        let (clock, reg) = registry();
        let w = reg.counter("w", &Tags::empty(), "App response Window counter").unwrap();
        let c = reg.counter("c", &Tags::empty(), "plain").unwrap();
        assert!(w.is_windowed());
        assert!(!c.is_windowed());
        w.increment();
        c.increment();
        clock.advance(Duration::from_secs(60));
        assert_eq!(w.count(), 0);
        assert_eq!(c.count(), 1);
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let (_, reg) = registry();
        reg.counter("x", &Tags::empty(), "").unwrap();
        let err = reg.timer("x", &Tags::empty(), false).unwrap_err();
        assert_eq!(err.code().as_str(), "KIND_MISMATCH");
    }

    #[test]
    fn names_follow_registration_order() {
        let (_, reg) = registry();
        for n in ["zeta", "alpha", "mid"] {
            reg.counter(n, &Tags::empty(), "").unwrap();
        }
        reg.gauge("g", &Tags::empty(), Gauge::new(|| Some(1.0))).unwrap();
        assert_eq!(reg.registered_names(MeterKind::Counter), vec!["zeta", "alpha", "mid"]);
        assert_eq!(reg.registered_names(MeterKind::Gauge), vec!["g"]);
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<String>>);

    impl RegistrySink for RecordingSink {
        fn on_register(&self, id: &MeterId, kind: MeterKind, _description: &str) {
            self.0
                .lock()
                .unwrap()
                .push(format!("{}:{}", kind.as_str(), id.hierarchical_name()));
        }
    }

    #[test]
    fn sinks_see_each_registration_once() {
        let (_clock, mut reg) = registry();
        let sink = Arc::new(RecordingSink::default());
        reg.add_sink(sink.clone());
        let tags = Tags::of(&[("uri", "root")]);
        reg.timer("http.server.requests", &tags, false).unwrap();
        reg.timer("http.server.requests", &tags, false).unwrap();
        let seen = sink.0.lock().unwrap().clone();
        assert_eq!(seen, vec!["timer:httpServerRequests.uri.root"]);
    }

    #[test]
    fn renders_prometheus_families() {
        let (_, reg) = registry();
        reg.counter("http.response.status", &Tags::of(&[("status", "2XX")]), "")
            .unwrap()
            .add(3);
        let t = reg
            .timer("http.server.requests", &Tags::of(&[("uri", "root")]), true)
            .unwrap();
        t.record(Duration::from_millis(2));
        reg.gauge("pool.size", &Tags::empty(), Gauge::new(|| None)).unwrap();

        let text = reg.render_prometheus();
        assert!(text.contains("# TYPE http_response_status_total counter"));
        assert!(text.contains("http_response_status_total{status=\"2XX\"} 3"));
        assert!(text.contains("# TYPE http_server_requests_duration_micros histogram"));
        let bucket = r#"http_server_requests_duration_micros_bucket{uri="root",le="5000"} 1"#;
        assert!(text.contains(bucket));
        assert!(text.contains("http_server_requests_duration_micros_count{uri=\"root\"} 1"));
        assert!(text.contains("pool_size NaN"));
    }

    #[test]
    fn renders_timer_percentiles() {
        let (_, reg) = registry();
        let tags = Tags::of(&[("uri", "/report")]);
        let t = reg
            .timer_with_percentiles("report.render", &tags, false, &[0.5, 0.95])
            .unwrap();
        for _ in 0..10 {
            t.record(Duration::from_millis(3));
        }
        // First registration wins.
        let again = reg.timer("report.render", &tags, false).unwrap();
        assert_eq!(again.percentiles(), &[0.5, 0.95]);

        let h = reg
            .timer_with_percentiles("report.export", &Tags::empty(), true, &[0.5])
            .unwrap();
        h.record(Duration::from_millis(3));

        let text = reg.render_prometheus();
        assert!(text.contains("# TYPE report_render_duration_micros summary"));
        for q in ["0.5", "0.95"] {
            let line =
                format!(r#"report_render_duration_micros{{uri="/report",quantile="{q}"}} 3000"#);
            assert!(text.contains(&line), "missing {line}");
        }
        assert!(!text.contains("report_render_duration_micros_bucket"));
        assert!(text.contains("# TYPE report_export_duration_micros histogram"));
        assert!(text.contains("report_export_duration_micros_percentile{quantile=\"0.5\"} 3000"));
    }

    #[test]
    fn concurrent_first_registration_allocates_once() {
        let (_, reg) = registry();
        let tags = Tags::of(&[("uri", "/race")]);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1_000 {
                        reg.counter("race", &tags, "").unwrap().increment();
                    }
                });
            }
        });
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.find_counter("race", &tags).unwrap().count(), 8_000);
    }
}
