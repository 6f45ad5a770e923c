use serde::{Deserialize, Serialize};

use super::objective::PortfolioMetrics;

/// Which solver produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    Genetic,
    ExactWarm,
    ExactCold,
}

/// Search statistics reported alongside a solution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolverDiagnostics {
    /// Generations run by the genetic search.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generations: Option<u32>,
    /// Branch-and-bound nodes whose relaxation was solved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes_explored: Option<u32>,
    /// Best proven lower bound on the objective (exact solver).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_bound: Option<f64>,
    /// Whether the exact solver accepted the warm start as its first incumbent.
    #[serde(default)]
    pub warm_start_used: bool,
    pub elapsed_us: u64,
}

/// Final output of one solver invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverResult {
    pub solver: SolverKind,
    pub weights: Vec<f64>,
    /// Whole lots per asset when lot quantization is active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lots: Option<Vec<u64>>,
    pub metrics: PortfolioMetrics,
    pub diagnostics: SolverDiagnostics,
}
