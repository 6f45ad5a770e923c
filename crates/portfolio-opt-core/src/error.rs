use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Market data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Non-convergence: {stage} — {detail}")]
    NonConvergence { stage: String, detail: String },

    #[error("Solver failure: {0}")]
    SolverFailure(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for OptimizerError {
    fn from(e: serde_json::Error) -> Self {
        OptimizerError::SerializationError(e.to_string())
    }
}
