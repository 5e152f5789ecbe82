// src/utils/errors.rs

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures of the candle store collaborator. Every variant means the
/// requested market data could not be produced.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("market data unavailable: {0}")]
    Unavailable(String),
    #[error("candle file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("candle decode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures reported by the order/account gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transient gateway error: {0}")]
    Transient(String),
    #[error("fatal gateway error: {0}")]
    Fatal(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

/// Errors coming from the advisory service (HTTP, JSON, bad replies).
#[derive(Debug, Error)]
pub enum AdvisoryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed recommendation: {0}")]
    Malformed(String),
}

/// Errors at the engine level: local validation plus wrapped collaborator failures.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient data: need more than {required} candles, got {actual}")]
    InsufficientData { required: usize, actual: usize },
    #[error("invalid time range: {start} .. {end}")]
    InvalidTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    MarketData(#[from] MarketDataError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("advisory error: {0}")]
    Advisory(#[from] AdvisoryError),
    #[error("a live session is already running for {0}")]
    SessionActive(String),
    #[error("live session stopped")]
    SessionStopped,
    #[error("worker failed: {0}")]
    Worker(String),
}
