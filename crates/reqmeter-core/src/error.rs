//! Shared error type across reqmeter crates.

use thiserror::Error;

/// Stable error codes (used in logs and JSON error bodies).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Rolling window has a zero duration or chunk count.
    InvalidWindow,
    /// Apdex enabled without a usable satisfied threshold.
    ApdexMisconfigured,
    /// Route table entry rejected.
    InvalidRoute,
    /// Handler could not be resolved for a request.
    Resolve,
    /// Same meter id registered with two different kinds.
    KindMismatch,
    /// Configuration rejected.
    Config,
    /// Discovery document could not be produced.
    Serialize,
}

impl ErrorCode {
    /// String representation used in JSON responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidWindow => "INVALID_WINDOW",
            ErrorCode::ApdexMisconfigured => "APDEX_MISCONFIGURED",
            ErrorCode::InvalidRoute => "INVALID_ROUTE",
            ErrorCode::Resolve => "RESOLVE",
            ErrorCode::KindMismatch => "KIND_MISMATCH",
            ErrorCode::Config => "CONFIG",
            ErrorCode::Serialize => "SERIALIZE",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, MeterError>;

/// Unified error type used by core and web.
#[derive(Debug, Error)]
pub enum MeterError {
    #[error("invalid rolling window: {0}")]
    InvalidWindow(String),
    #[error("apdex misconfigured: {0}")]
    ApdexMisconfigured(String),
    #[error("invalid route: {0}")]
    InvalidRoute(String),
    #[error("unable to resolve handler: {0}")]
    Resolve(String),
    #[error("meter {name} already registered as {existing}, requested {requested}")]
    KindMismatch {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },
    #[error("config: {0}")]
    Config(String),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl MeterError {
    /// Map the error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            MeterError::InvalidWindow(_) => ErrorCode::InvalidWindow,
            MeterError::ApdexMisconfigured(_) => ErrorCode::ApdexMisconfigured,
            MeterError::InvalidRoute(_) => ErrorCode::InvalidRoute,
            MeterError::Resolve(_) => ErrorCode::Resolve,
            MeterError::KindMismatch { .. } => ErrorCode::KindMismatch,
            MeterError::Config(_) => ErrorCode::Config,
            MeterError::Serialize(_) => ErrorCode::Serialize,
        }
    }
}
