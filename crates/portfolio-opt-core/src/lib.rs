pub mod config;
pub mod error;
pub mod linalg;
pub mod taxonomy;
pub mod types;

pub mod market_data;

pub mod formulation;

pub mod metaheuristic;

pub mod exact;

pub mod orchestrator;

pub use config::OptimizerConfig;
pub use error::OptimizerError;
pub use types::*;

/// Standard result type for all optimizer operations
pub type OptimizerResult<T> = Result<T, OptimizerError>;
