//! Apdex classification.
//!
//! A request is *satisfied* when it finishes within `T`, *tolerating* up to
//! `4T`, *frustrated* beyond. Classification is latency-only; ok/nok is
//! tracked separately by the recorder.

use std::time::Duration;

use crate::error::{MeterError, Result};

/// Tolerating limit is always this multiple of the satisfied threshold.
pub const TOLERATING_FACTOR: u64 = 4;

/// Latency bucket of one completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApdexClass {
    Satisfied,
    Tolerating,
    Frustrated,
}

impl ApdexClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ApdexClass::Satisfied => "satisfied",
            ApdexClass::Tolerating => "tolerating",
            ApdexClass::Frustrated => "frustrated",
        }
    }
}

/// Satisfied threshold `T` and its derived `4T` tolerating limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApdexThresholds {
    satisfied_ms: u64,
    tolerating_ms: u64,
}

impl ApdexThresholds {
    pub fn new(satisfied_ms: u64) -> Result<Self> {
        if satisfied_ms == 0 {
            return Err(MeterError::ApdexMisconfigured(
                "threshold must be greater than 0ms".into(),
            ));
        }
        let tolerating_ms = satisfied_ms
            .checked_mul(TOLERATING_FACTOR)
            .ok_or_else(|| {
                MeterError::ApdexMisconfigured(format!("threshold {satisfied_ms}ms is too large"))
            })?;
        Ok(Self {
            satisfied_ms,
            tolerating_ms,
        })
    }

    pub fn satisfied_ms(&self) -> u64 {
        self.satisfied_ms
    }

    pub fn tolerating_ms(&self) -> u64 {
        self.tolerating_ms
    }

    pub fn classify_ms(&self, elapsed_ms: u64) -> ApdexClass {
        if elapsed_ms <= self.satisfied_ms {
            ApdexClass::Satisfied
        } else if elapsed_ms <= self.tolerating_ms {
            ApdexClass::Tolerating
        } else {
            ApdexClass::Frustrated
        }
    }

    /// Classify on whole milliseconds (sub-millisecond remainders are truncated).
    pub fn classify(&self, elapsed: Duration) -> ApdexClass {
        self.classify_ms(elapsed.as_millis() as u64)
    }
}

/// Apdex switch as read from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApdexSettings {
    pub enabled: bool,
    pub millis: Option<u64>,
}

impl ApdexSettings {
    /// `Ok(None)` when disabled; enabling without a threshold is fatal.
    pub fn thresholds(&self) -> Result<Option<ApdexThresholds>> {
        if !self.enabled {
            return Ok(None);
        }
        let millis = self.millis.ok_or_else(|| {
            MeterError::ApdexMisconfigured("enabled but no satisfied threshold is set".into())
        })?;
        ApdexThresholds::new(millis).map(Some)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn classifies_against_t_and_4t() {
        let t = ApdexThresholds::new(100).unwrap();
        assert_eq!(t.tolerating_ms(), 400);
        assert_eq!(t.classify_ms(50), ApdexClass::Satisfied);
        assert_eq!(t.classify_ms(100), ApdexClass::Satisfied);
        assert_eq!(t.classify_ms(101), ApdexClass::Tolerating);
        assert_eq!(t.classify_ms(300), ApdexClass::Tolerating);
        assert_eq!(t.classify_ms(400), ApdexClass::Tolerating);
        assert_eq!(t.classify_ms(401), ApdexClass::Frustrated);
        assert_eq!(t.classify(Duration::from_millis(500)), ApdexClass::Frustrated);
    }

    #[test]
    fn enabled_without_threshold_is_fatal() {
        let s = ApdexSettings { enabled: true, millis: None };
        let err = s.thresholds().unwrap_err();
        assert_eq!(err.code().as_str(), "APDEX_MISCONFIGURED");

        let off = ApdexSettings { enabled: false, millis: None };
        assert!(off.thresholds().unwrap().is_none());
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let err = ApdexThresholds::new(0).unwrap_err();
        assert_eq!(err.code().as_str(), "APDEX_MISCONFIGURED");

        let enabled = ApdexSettings { enabled: true, millis: Some(0) };
        assert_eq!(enabled.thresholds().unwrap_err().code().as_str(), "APDEX_MISCONFIGURED");
    }

    #[test]
    fn overflowing_threshold_is_rejected() {
        let err = ApdexThresholds::new(u64::MAX / 2).unwrap_err();
        assert_eq!(err.code().as_str(), "APDEX_MISCONFIGURED");
    }
}
