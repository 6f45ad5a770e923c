use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use super::report::{BranchReport, PortfolioCondition};
use crate::config::OptimizerConfig;
use crate::error::OptimizerError;
use crate::formulation::{PortfolioProblem, ProblemSpec};
use crate::market_data::{MarketSnapshot, Provenance};
use crate::taxonomy::SectorTaxonomy;
use crate::types::{with_metadata, ComputationOutput};
use crate::{exact, metaheuristic, OptimizerResult};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Everything one optimization request needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRequest {
    pub snapshot: MarketSnapshot,
    #[serde(default)]
    pub taxonomy: SectorTaxonomy,
    pub problem: ProblemSpec,
}

/// Genetic search, exact solve seeded by it, and exact solve from scratch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonOutput {
    pub asset_names: Vec<String>,
    pub provenance: Provenance,
    pub genetic: BranchReport,
    pub exact_warm: Option<BranchReport>,
    pub exact_cold: Option<BranchReport>,
    /// Warm minus cold objective, when both exact branches succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warm_cold_gap: Option<f64>,
}

/// Which stages a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Comparison,
    GeneticOnly,
    ExactOnly,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run genetic -> exact (warm) -> exact (cold) on one snapshot.
///
/// Data and genetic failures abort the request; an exact branch that finds
/// no proven solution is reported as `None` without affecting the others.
pub fn run_comparison(
    snapshot: Arc<MarketSnapshot>,
    taxonomy: &SectorTaxonomy,
    spec: &ProblemSpec,
    config: &OptimizerConfig,
) -> OptimizerResult<ComputationOutput<ComparisonOutput>> {
    let start = Instant::now();
    let problem = prepare(snapshot, taxonomy, spec, config)?;
    let mut warnings = base_warnings(&problem);

    let genetic = run_genetic(&problem, config)?;

    let exact_warm = exact::optimize(&problem, Some(&genetic.weights), &config.exact);
    if exact_warm.is_none() {
        warnings.push("Exact solver (warm start) returned no proven solution".into());
    }
    let exact_cold = exact::optimize(&problem, None, &config.exact);
    if exact_cold.is_none() {
        warnings.push("Exact solver (cold start) returned no proven solution".into());
    }

    let warm_cold_gap = match (&exact_warm, &exact_cold) {
        (Some(w), Some(c)) => Some(w.metrics.objective - c.metrics.objective),
        _ => None,
    };

    let genetic = BranchReport::from_result(&problem, genetic);
    let exact_warm = exact_warm.map(|r| BranchReport::from_result(&problem, r));
    let exact_cold = exact_cold.map(|r| BranchReport::from_result(&problem, r));
    for report in std::iter::once(&genetic)
        .chain(exact_warm.as_ref())
        .chain(exact_cold.as_ref())
    {
        flag_all_cash(report, &mut warnings);
    }

    let output = ComparisonOutput {
        asset_names: problem.asset_names().to_vec(),
        provenance: problem.snapshot.provenance,
        genetic,
        exact_warm,
        exact_cold,
        warm_cold_gap,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Genetic search with feasibility repair vs. branch-and-bound MIQP (warm and cold start)",
        &assumptions(&problem, config, RunMode::Comparison),
        warnings,
        elapsed,
        output,
    ))
}

/// Genetic search alone.
pub fn run_genetic_only(
    snapshot: Arc<MarketSnapshot>,
    taxonomy: &SectorTaxonomy,
    spec: &ProblemSpec,
    config: &OptimizerConfig,
) -> OptimizerResult<ComputationOutput<BranchReport>> {
    let start = Instant::now();
    let problem = prepare(snapshot, taxonomy, spec, config)?;
    let mut warnings = base_warnings(&problem);

    let report = BranchReport::from_result(&problem, run_genetic(&problem, config)?);
    flag_all_cash(&report, &mut warnings);

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Genetic search with feasibility repair",
        &assumptions(&problem, config, RunMode::GeneticOnly),
        warnings,
        elapsed,
        report,
    ))
}

/// Exact solver alone, optionally seeded with `warm_start` weights.
///
/// Unlike the comparison, a missing exact solution is an error here.
pub fn run_exact_only(
    snapshot: Arc<MarketSnapshot>,
    taxonomy: &SectorTaxonomy,
    spec: &ProblemSpec,
    warm_start: Option<&[f64]>,
    config: &OptimizerConfig,
) -> OptimizerResult<ComputationOutput<BranchReport>> {
    let start = Instant::now();
    let problem = prepare(snapshot, taxonomy, spec, config)?;
    let mut warnings = base_warnings(&problem);

    let result = exact::optimize(&problem, warm_start, &config.exact).ok_or_else(|| {
        OptimizerError::NonConvergence {
            stage: "exact".into(),
            detail: "no proven optimal solution within the configured limits".into(),
        }
    })?;
    let report = BranchReport::from_result(&problem, result);
    flag_all_cash(&report, &mut warnings);

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Branch-and-bound MIQP over QP/SOCP relaxations",
        &assumptions(&problem, config, RunMode::ExactOnly),
        warnings,
        elapsed,
        report,
    ))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn prepare(
    snapshot: Arc<MarketSnapshot>,
    taxonomy: &SectorTaxonomy,
    spec: &ProblemSpec,
    config: &OptimizerConfig,
) -> OptimizerResult<PortfolioProblem> {
    if snapshot.n_assets() == 0 {
        return Err(OptimizerError::InsufficientData(
            "The asset universe is empty".into(),
        ));
    }
    PortfolioProblem::build(snapshot, taxonomy, spec, config)
}

pub(crate) fn run_genetic(
    problem: &PortfolioProblem,
    config: &OptimizerConfig,
) -> OptimizerResult<crate::formulation::SolverResult> {
    metaheuristic::optimize(problem, &config.genetic).ok_or_else(|| {
        OptimizerError::NonConvergence {
            stage: "metaheuristic".into(),
            detail: "no feasible portfolio in the final population".into(),
        }
    })
}

pub(crate) fn base_warnings(problem: &PortfolioProblem) -> Vec<String> {
    let mut warnings = problem.warnings.clone();
    if problem.snapshot.provenance == Provenance::Synthetic {
        warnings.push("Market data is synthetic; allocations are illustrative only".into());
    }
    warnings
}

fn flag_all_cash(report: &BranchReport, warnings: &mut Vec<String>) {
    if report.condition == PortfolioCondition::AllCash {
        warnings.push(format!(
            "{:?} solution holds no positions; all capital left in cash",
            report.solver
        ));
    }
}

fn assumptions(
    problem: &PortfolioProblem,
    config: &OptimizerConfig,
    mode: RunMode,
) -> serde_json::Value {
    let mut value = serde_json::json!({
        "n_assets": problem.n_assets(),
        "risk_aversion": problem.risk_aversion,
        "risk_ceiling": problem.risk_ceiling,
        "asset_cap": problem.asset_cap,
        "sector_cap": problem.sector_cap,
        "max_assets": problem.max_assets,
        "max_assets_per_sector": problem.max_assets_per_sector,
        "lot_quantization": problem.lot_weights.is_some(),
        "liquidity_fraction": config.liquidity_fraction,
        "penalties": config.penalties,
        "budget": "sum(w) <= 1, remainder held as cash",
    });
    if mode != RunMode::ExactOnly {
        value["genetic"] = serde_json::json!({
            "population_size": config.genetic.population_size,
            "max_generations": config.genetic.max_generations,
            "seed": config.genetic.seed,
        });
    }
    if mode != RunMode::GeneticOnly {
        value["exact"] = serde_json::json!({
            "mip_gap": config.exact.mip_gap,
            "node_limit": config.exact.node_limit,
        });
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneticConfig;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn snapshot(provenance: Provenance) -> Arc<MarketSnapshot> {
        Arc::new(MarketSnapshot {
            asset_names: vec!["A".into(), "B".into(), "C".into()],
            expected_returns: vec![0.10, 0.20, 0.15],
            covariance: vec![
                vec![0.04, 0.0, 0.0],
                vec![0.0, 0.09, 0.0],
                vec![0.0, 0.0, 0.01],
            ],
            average_volume: vec![1e9; 3],
            last_price: vec![10.0; 3],
            valuation_ratio: vec![1.0; 3],
            cvar: vec![0.02; 3],
            total_capital: dec!(10000),
            benchmarks: vec![],
            provenance,
            as_of: None,
        })
    }

    fn taxonomy() -> SectorTaxonomy {
        let mut sectors = BTreeMap::new();
        sectors.insert("X".to_string(), vec!["A".to_string(), "B".to_string()]);
        sectors.insert("Y".to_string(), vec!["C".to_string()]);
        SectorTaxonomy::new(sectors)
    }

    fn config() -> OptimizerConfig {
        OptimizerConfig {
            genetic: GeneticConfig {
                population_size: 40,
                max_generations: 150,
                patience: 30,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_comparison_reports_all_branches() {
        let out = run_comparison(
            snapshot(Provenance::Live),
            &taxonomy(),
            &ProblemSpec::new(0.15, 50.0),
            &config(),
        )
        .unwrap();
        let r = &out.result;
        assert!(r.exact_warm.is_some());
        assert!(r.exact_cold.is_some());
        assert!(r.warm_cold_gap.is_some());
        assert_eq!(r.asset_names.len(), 3);
        assert_eq!(out.metadata.precision, "ieee754_f64");
        assert!(out.warnings.is_empty(), "{:?}", out.warnings);
    }

    #[test]
    fn test_synthetic_provenance_warns() {
        let out = run_genetic_only(
            snapshot(Provenance::Synthetic),
            &taxonomy(),
            &ProblemSpec::new(0.15, 50.0),
            &config(),
        )
        .unwrap();
        assert!(out.warnings.iter().any(|w| w.contains("synthetic")));
    }

    #[test]
    fn test_empty_universe_is_an_error() {
        let mut empty = (*snapshot(Provenance::Live)).clone();
        empty.asset_names.clear();
        empty.expected_returns.clear();
        empty.covariance.clear();
        empty.average_volume.clear();
        empty.last_price.clear();
        empty.valuation_ratio.clear();
        empty.cvar.clear();
        let err = run_comparison(
            Arc::new(empty),
            &taxonomy(),
            &ProblemSpec::new(0.15, 50.0),
            &config(),
        );
        assert!(matches!(err, Err(OptimizerError::InsufficientData(_))));
    }

    #[test]
    fn test_exact_only_with_warm_start() {
        let out = run_exact_only(
            snapshot(Provenance::Live),
            &taxonomy(),
            &ProblemSpec::new(0.15, 50.0),
            Some(&[0.1, 0.1, 0.1]),
            &config(),
        )
        .unwrap();
        assert!(out.result.diagnostics.warm_start_used);
        assert!(out.assumptions.get("genetic").is_none());
    }
}
