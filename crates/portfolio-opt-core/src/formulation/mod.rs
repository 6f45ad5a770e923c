//! Objective and constraint set of the portfolio problem.
//!
//! A `PortfolioProblem` is built once per request from a snapshot, the
//! taxonomy, the user's `ProblemSpec` and the `OptimizerConfig`, and is then
//! shared read-only by both solvers.

pub mod constraints;
pub mod objective;
pub mod problem;
pub mod result;

pub use constraints::{Violation, FEASIBILITY_TOL, ZERO_WEIGHT};
pub use objective::PortfolioMetrics;
pub use problem::{PortfolioProblem, ProblemSpec, SectorGroup};
pub use result::{SolverDiagnostics, SolverKind, SolverResult};
