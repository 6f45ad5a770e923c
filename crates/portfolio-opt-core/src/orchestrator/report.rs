use serde::{Deserialize, Serialize};

use crate::formulation::{PortfolioProblem, SolverDiagnostics, SolverKind, SolverResult};
use crate::types::{money_from_f64, Money};

/// Positions below this weight are left out of the allocation list.
pub const ALLOCATION_FILTER: f64 = 1e-4;

/// Label of the unallocated-capital line.
pub const CASH_LABEL: &str = "CASH";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Whether a solution actually invests anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortfolioCondition {
    Allocated,
    /// Valid but useless: every position is below the allocation filter.
    AllCash,
}

/// One row of the ranked allocation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationLine {
    pub asset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lots: Option<u64>,
    /// Weight in percent, two decimals.
    pub weight_pct: f64,
    pub value: Money,
}

/// Presentation metrics of one solver branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchMetrics {
    pub total_capital: Money,
    pub capital_invested: Money,
    pub annual_return_pct: f64,
    pub annual_risk_pct: f64,
    /// Scalarized objective.
    pub score: f64,
    pub elapsed_ms: f64,
    pub valuation_exposure: f64,
    pub tail_risk_pct: f64,
    pub cash_pct: f64,
    pub asset_count: usize,
    pub sector_count: usize,
}

/// Everything reported about one solver invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchReport {
    pub solver: SolverKind,
    pub condition: PortfolioCondition,
    pub metrics: BranchMetrics,
    pub allocation: Vec<AllocationLine>,
    pub weights: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lots: Option<Vec<u64>>,
    pub diagnostics: SolverDiagnostics,
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

impl BranchReport {
    pub fn from_result(problem: &PortfolioProblem, result: SolverResult) -> Self {
        let capital = problem.snapshot.total_capital;
        let capital_f = problem.capital;
        let m = &result.metrics;
        let shown: Vec<f64> = result
            .weights
            .iter()
            .map(|w| if *w > ALLOCATION_FILTER { *w } else { 0.0 })
            .collect();

        let mut allocation: Vec<AllocationLine> = problem
            .asset_names()
            .iter()
            .enumerate()
            .filter(|(i, _)| result.weights[*i] > ALLOCATION_FILTER)
            .map(|(i, name)| AllocationLine {
                asset: name.clone(),
                lots: result.lots.as_ref().map(|l| l[i]),
                weight_pct: round2(result.weights[i] * 100.0),
                value: money_from_f64(result.weights[i] * capital_f),
            })
            .collect();
        allocation.sort_by(|a, b| b.weight_pct.total_cmp(&a.weight_pct));

        let condition = if allocation.is_empty() {
            PortfolioCondition::AllCash
        } else {
            PortfolioCondition::Allocated
        };
        if m.cash >= ALLOCATION_FILTER {
            allocation.push(AllocationLine {
                asset: CASH_LABEL.to_string(),
                lots: None,
                weight_pct: round2(m.cash * 100.0),
                value: money_from_f64(m.cash * capital_f),
            });
        }

        let metrics = BranchMetrics {
            total_capital: capital,
            capital_invested: money_from_f64(m.invested.min(1.0) * capital_f),
            annual_return_pct: m.expected_return * 100.0,
            annual_risk_pct: m.volatility * 100.0,
            score: m.objective,
            elapsed_ms: result.diagnostics.elapsed_us as f64 / 1000.0,
            valuation_exposure: m.valuation_exposure,
            tail_risk_pct: m.cvar_exposure * 100.0,
            cash_pct: m.cash * 100.0,
            asset_count: shown.iter().filter(|w| **w > 0.0).count(),
            sector_count: problem.sector_count(&shown),
        };

        Self {
            solver: result.solver,
            condition,
            metrics,
            allocation,
            weights: result.weights,
            lots: result.lots,
            diagnostics: result.diagnostics,
        }
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
