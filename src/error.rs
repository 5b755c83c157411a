use thiserror::Error;

use crate::vector::NormalizationMode;

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("insufficient data: need at least {required} bars, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("cannot compare a {left} vector with a {right} vector")]
    InvalidNormalizationMixing {
        left: NormalizationMode,
        right: NormalizationMode,
    },

    #[error("invalid price series: {0}")]
    InvalidSeries(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("guard store error: {0}")]
    Store(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl ForecastError {
    /// `true` when the same request may succeed once more history is available.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InsufficientData { .. })
    }
}

pub type ForecastResult<T> = std::result::Result<T, ForecastError>;
