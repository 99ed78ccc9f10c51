use thiserror::Error;

use crate::llm::LlmError;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Failures of the analysis core. Everything except `UnknownRecordId` is
/// fatal to a run; `UnknownRecordId` is only ever logged.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("keyword dataset is empty")]
    EmptyDataset,

    #[error("missing assumptions in config: {}", .0.join(", "))]
    MissingAssumption(Vec<String>),

    #[error("assumption `{key}` must be in (0, 1], got {value}")]
    InvalidAssumption { key: &'static str, value: f64 },

    #[error("insufficient data to compute CPC: {0}")]
    InsufficientData(String),

    #[error("invalid keyword row {row}: {reason}")]
    InvalidRecord { row: usize, reason: String },

    #[error("no structured data in model response: {0}")]
    NoStructuredData(String),

    #[error("model response has unexpected shape: {0}")]
    UnexpectedShape(String),

    #[error("rate limited after {attempts} attempts: {message}")]
    RateLimited { attempts: u32, message: String },

    #[error("model referenced unknown record id {0}")]
    UnknownRecordId(u64),

    #[error(transparent)]
    Generation(#[from] LlmError),
}

impl AnalysisError {
    /// Transient quota/429 failure worth backing off for.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            AnalysisError::RateLimited { .. } => true,
            AnalysisError::Generation(e) => e.is_rate_limited(),
            _ => false,
        }
    }
}
