//! Config loader (strict parsing).

pub mod schema;

use std::fs;

use reqmeter_core::error::{MeterError, Result};

pub use schema::{
    ApdexSection, AppConfig, EndpointSection, LoggingSection, MetricsSection, ServerSection,
    WindowSection,
};

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| MeterError::Config(format!("read {path} failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<AppConfig> {
    let cfg: AppConfig =
        serde_yaml::from_str(s).map_err(|e| MeterError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
