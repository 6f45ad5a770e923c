//! Runs the solvers against one snapshot and packages their outcomes.

pub mod comparison;
pub mod report;

#[cfg(feature = "frontier")]
pub mod frontier;

pub use comparison::{
    run_comparison, run_exact_only, run_genetic_only, ComparisonOutput, OptimizationRequest,
};
pub use report::{AllocationLine, BranchMetrics, BranchReport, PortfolioCondition};

#[cfg(feature = "frontier")]
pub use frontier::{sweep_frontier, FrontierOutput, FrontierPoint};
