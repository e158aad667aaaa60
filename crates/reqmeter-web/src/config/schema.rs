use std::time::Duration;

use serde::Deserialize;

use reqmeter_core::apdex::ApdexSettings;
use reqmeter_core::error::{MeterError, Result};
use reqmeter_core::recorder::{RecorderSettings, DEFAULT_BASE_NAME};
use reqmeter_core::window::{WindowSpec, DEFAULT_CHUNKS, DEFAULT_WINDOW};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub version: u32,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub metrics: MetricsSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(MeterError::Config(format!("unsupported config version {}", self.version)));
        }
        if self.server.listen.trim().is_empty() {
            return Err(MeterError::Config("server.listen must not be empty".into()));
        }
        self.metrics.validate()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_base_name")]
    pub base_name: String,

    /// Publish histogram buckets on request timers.
    #[serde(default)]
    pub histogram: bool,

    /// When off, only routes that declare a timer are recorded.
    #[serde(default = "default_true")]
    pub auto_time_requests: bool,

    #[serde(default)]
    pub window: WindowSection,

    #[serde(default)]
    pub apdex: ApdexSection,

    #[serde(default)]
    pub endpoint: EndpointSection,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            base_name: default_base_name(),
            histogram: false,
            auto_time_requests: true,
            window: WindowSection::default(),
            apdex: ApdexSection::default(),
            endpoint: EndpointSection::default(),
        }
    }
}

impl MetricsSection {
    pub fn validate(&self) -> Result<()> {
        if self.base_name.trim().is_empty() {
            return Err(MeterError::Config("metrics.base_name must not be empty".into()));
        }
        self.window.spec()?;
        self.apdex.settings().thresholds()?;
        Ok(())
    }

    pub fn recorder_settings(&self) -> Result<RecorderSettings> {
        Ok(RecorderSettings {
            base_name: self.base_name.clone(),
            apdex: self.apdex.settings().thresholds()?,
            histogram: self.histogram,
            auto_time_requests: self.auto_time_requests,
        })
    }
}

fn default_true() -> bool {
    true
}

fn default_base_name() -> String {
    DEFAULT_BASE_NAME.into()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowSection {
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,

    #[serde(default = "default_chunks")]
    pub chunks: usize,
}

impl Default for WindowSection {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
            chunks: default_chunks(),
        }
    }
}

impl WindowSection {
    pub fn spec(&self) -> Result<WindowSpec> {
        WindowSpec::new(Duration::from_secs(self.duration_secs), self.chunks)
    }
}

fn default_duration_secs() -> u64 {
    DEFAULT_WINDOW.as_secs()
}

fn default_chunks() -> usize {
    DEFAULT_CHUNKS
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ApdexSection {
    #[serde(default)]
    pub enabled: bool,

    /// Satisfied threshold `T`; tolerating is `4T`.
    #[serde(default)]
    pub millis: Option<u64>,
}

impl ApdexSection {
    pub fn settings(&self) -> ApdexSettings {
        ApdexSettings {
            enabled: self.enabled,
            millis: self.millis,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointSection {
    /// Regex a route pattern must fully match to be listed by endpoint
    /// discovery.
    #[serde(default = "default_endpoint_pattern")]
    pub pattern: String,
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            pattern: default_endpoint_pattern(),
        }
    }
}

fn default_endpoint_pattern() -> String {
    ".*".into()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self { level: default_level() }
    }
}

fn default_level() -> String {
    "info".into()
}
