use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("insufficient markets: {0}")]
    InsufficientMarkets(String),

    #[error("insufficient history: {0}")]
    InsufficientHistory(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("malformed series: {0}")]
    MalformedSeries(String),

    #[error("cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Serializable error category, used where a failure is reported as data
/// (per-pair batch outcomes) instead of being propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InsufficientData,
    DimensionMismatch,
    InsufficientMarkets,
    InsufficientHistory,
    InvalidParameter,
    MalformedSeries,
    Cancelled,
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InsufficientData(_) => ErrorKind::InsufficientData,
            EngineError::DimensionMismatch(_) => ErrorKind::DimensionMismatch,
            EngineError::InsufficientMarkets(_) => ErrorKind::InsufficientMarkets,
            EngineError::InsufficientHistory(_) => ErrorKind::InsufficientHistory,
            EngineError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            EngineError::MalformedSeries(_) => ErrorKind::MalformedSeries,
            EngineError::Cancelled => ErrorKind::Cancelled,
            EngineError::Config(_)
            | EngineError::Json(_)
            | EngineError::Io(_)
            | EngineError::Worker(_) => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InsufficientData => "insufficient_data",
            ErrorKind::DimensionMismatch => "dimension_mismatch",
            ErrorKind::InsufficientMarkets => "insufficient_markets",
            ErrorKind::InsufficientHistory => "insufficient_history",
            ErrorKind::InvalidParameter => "invalid_parameter",
            ErrorKind::MalformedSeries => "malformed_series",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{s}")
    }
}
