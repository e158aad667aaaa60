//! Low-level discovery documents for external monitoring agents.
//!
//! Agents ask a provider for the `discovery` key and expect exactly
//! `{"data":[{"{#COUNTERNAME}":"..."}, ...]}` (`{#GAUGENAME}` for gauges,
//! `{#ENDPOINTNAME}` + `{#ENDPOINTMETHOD}` for endpoints). The macro names
//! are matched verbatim by the agent templates.

use std::sync::Arc;

use regex::Regex;
use serde::Serialize;

use crate::error::{MeterError, Result};
use crate::lifecycle::routes::RouteTable;
use crate::meter::MeterKind;
use crate::registry::MeterRegistry;

/// The only key providers answer.
pub const DISCOVERY_KEY: &str = "discovery";

#[derive(Serialize)]
struct Document<T> {
    data: Vec<T>,
}

#[derive(Serialize)]
struct CounterEntry<'a> {
    #[serde(rename = "{#COUNTERNAME}")]
    name: &'a str,
}

#[derive(Serialize)]
struct GaugeEntry<'a> {
    #[serde(rename = "{#GAUGENAME}")]
    name: &'a str,
}

#[derive(Serialize)]
struct EndpointEntry<'a> {
    #[serde(rename = "{#ENDPOINTNAME}")]
    name: &'a str,
    #[serde(rename = "{#ENDPOINTMETHOD}")]
    method: &'a str,
}

pub fn counter_document(names: &[String]) -> Result<String> {
    let data = names.iter().map(|n| CounterEntry { name: n }).collect();
    Ok(serde_json::to_string(&Document { data })?)
}

pub fn gauge_document(names: &[String]) -> Result<String> {
    let data = names.iter().map(|n| GaugeEntry { name: n }).collect();
    Ok(serde_json::to_string(&Document { data })?)
}

pub fn endpoint_document(endpoints: &[Endpoint]) -> Result<String> {
    let data = endpoints
        .iter()
        .map(|e| EndpointEntry {
            name: &e.name,
            method: &e.method,
        })
        .collect();
    Ok(serde_json::to_string(&Document { data })?)
}

/// A value source polled by the monitoring agent.
pub trait DiscoveryProvider: Send + Sync {
    /// `Ok(None)` for keys the provider does not serve.
    fn value(&self, key: &str) -> Result<Option<String>>;
}

/// Lists every registered counter.
pub struct CounterDiscovery {
    registry: Arc<MeterRegistry>,
}

impl CounterDiscovery {
    pub fn new(registry: Arc<MeterRegistry>) -> Self {
        Self { registry }
    }
}

impl DiscoveryProvider for CounterDiscovery {
    fn value(&self, key: &str) -> Result<Option<String>> {
        if key != DISCOVERY_KEY {
            return Ok(None);
        }
        counter_document(&self.registry.registered_names(MeterKind::Counter)).map(Some)
    }
}

/// Lists every registered gauge.
pub struct GaugeDiscovery {
    registry: Arc<MeterRegistry>,
}

impl GaugeDiscovery {
    pub fn new(registry: Arc<MeterRegistry>) -> Self {
        Self { registry }
    }
}

impl DiscoveryProvider for GaugeDiscovery {
    fn value(&self, key: &str) -> Result<Option<String>> {
        if key != DISCOVERY_KEY {
            return Ok(None);
        }
        gauge_document(&self.registry.registered_names(MeterKind::Gauge)).map(Some)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    pub method: String,
}

/// Lists routes whose pattern fully matches a configured expression.
///
/// The endpoint list is computed once from the route table; `*` wildcards
/// are stripped from reported names.
#[derive(Debug)]
pub struct EndpointDiscovery {
    endpoints: Vec<Endpoint>,
}

impl EndpointDiscovery {
    pub fn new(routes: &RouteTable, pattern: &str) -> Result<Self> {
        let re = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|e| MeterError::Config(format!("invalid endpoint pattern {pattern:?}: {e}")))?;
        let endpoints = routes
            .iter()
            .filter(|r| re.is_match(r.pattern()))
            .map(|r| Endpoint {
                name: r.pattern().replace('*', ""),
                method: r.method().to_string(),
            })
            .collect();
        Ok(Self { endpoints })
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }
}

impl DiscoveryProvider for EndpointDiscovery {
    fn value(&self, key: &str) -> Result<Option<String>> {
        if key != DISCOVERY_KEY {
            return Ok(None);
        }
        endpoint_document(&self.endpoints).map(Some)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::clock::ManualClock;
    use crate::lifecycle::routes::RouteTable;
    use crate::tags::Tags;
    use crate::window::WindowSpec;

    #[test]
    fn counter_document_is_bit_exact() {
        let registry = Arc::new(MeterRegistry::new(
            Arc::new(ManualClock::new()),
            WindowSpec::default(),
        ));
        registry.counter("a", &Tags::empty(), "").unwrap();
        registry.counter("b", &Tags::empty(), "").unwrap();
        let provider = CounterDiscovery::new(registry);
        assert_eq!(
            provider.value("discovery").unwrap().unwrap(),
            r#"{"data":[{"{#COUNTERNAME}":"a"},{"{#COUNTERNAME}":"b"}]}"#
        );
        assert!(provider.value("other").unwrap().is_none());
    }

    #[test]
    fn empty_gauge_document() {
        assert_eq!(gauge_document(&[]).unwrap(), r#"{"data":[]}"#);
        assert_eq!(
            gauge_document(&["pool.size".to_string()]).unwrap(),
            r#"{"data":[{"{#GAUGENAME}":"pool.size"}]}"#
        );
    }

    #[test]
    fn endpoints_filtered_by_pattern() {
        let routes = RouteTable::builder()
            .route("GET", "/api/users/*")
            .route("POST", "/api/users")
            .route("GET", "/healthz")
            .build()
            .unwrap();
        let d = EndpointDiscovery::new(&routes, "/api/.*").unwrap();
        let expected = concat!(
            r#"{"data":[{"{#ENDPOINTNAME}":"/api/users/","{#ENDPOINTMETHOD}":"GET"},"#,
            r#"{"{#ENDPOINTNAME}":"/api/users","{#ENDPOINTMETHOD}":"POST"}]}"#,
        );
        assert_eq!(d.value("discovery").unwrap().unwrap(), expected);
    }

    #[test]
    fn bad_pattern_is_a_config_error() {
        let routes = RouteTable::builder().build().unwrap();
        let err = EndpointDiscovery::new(&routes, "(").unwrap_err();
        assert_eq!(err.code().as_str(), "CONFIG");
    }
}
