use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use super::comparison::{base_warnings, prepare};
use crate::config::OptimizerConfig;
use crate::error::OptimizerError;
use crate::formulation::{PortfolioProblem, ProblemSpec};
use crate::market_data::MarketSnapshot;
use crate::taxonomy::SectorTaxonomy;
use crate::types::{with_metadata, ComputationOutput};
use crate::{exact, metaheuristic, OptimizerResult};

/// One risk-aversion level of the sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierPoint {
    pub risk_aversion: f64,
    pub expected_return: f64,
    pub volatility: f64,
    /// Objective of the warm-started exact solve.
    pub objective: f64,
    /// Objective of the genetic result that seeded it.
    pub genetic_objective: f64,
    pub weights: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierOutput {
    pub asset_names: Vec<String>,
    /// Successful points, ordered by increasing volatility.
    pub points: Vec<FrontierPoint>,
    /// Levels where either solver failed.
    pub failed_levels: Vec<f64>,
}

/// Solve the same problem for each risk-aversion level on a bounded pool.
///
/// Units share only the snapshot; each runs the genetic search and the
/// exact solver seeded with its result. A level fails as a whole when
/// either stage fails.
pub fn sweep_frontier(
    snapshot: Arc<MarketSnapshot>,
    taxonomy: &SectorTaxonomy,
    spec: &ProblemSpec,
    risk_aversions: &[f64],
    config: &OptimizerConfig,
) -> OptimizerResult<ComputationOutput<FrontierOutput>> {
    let start = Instant::now();
    if risk_aversions.is_empty() {
        return Err(OptimizerError::InvalidInput {
            field: "risk_aversions".into(),
            reason: "At least one risk-aversion level is required".into(),
        });
    }
    if let Some(bad) = risk_aversions.iter().find(|l| !l.is_finite() || **l < 0.0) {
        return Err(OptimizerError::InvalidInput {
            field: "risk_aversions".into(),
            reason: format!("Risk aversion must be finite and non-negative, got {bad}"),
        });
    }

    let problem = prepare(snapshot, taxonomy, spec, config)?;
    let mut warnings = base_warnings(&problem);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers.max(1))
        .build()
        .map_err(|e| OptimizerError::ConfigError(format!("worker pool: {e}")))?;

    tracing::info!(
        levels = risk_aversions.len(),
        workers = config.workers,
        "frontier sweep started"
    );
    let outcomes: Vec<(f64, Result<FrontierPoint, &'static str>)> = pool.install(|| {
        risk_aversions
            .par_iter()
            .map(|&lambda| (lambda, solve_level(&problem, lambda, config)))
            .collect()
    });

    let mut points = Vec::with_capacity(outcomes.len());
    let mut failed_levels = Vec::new();
    for (lambda, point) in outcomes {
        match point {
            Ok(p) => points.push(p),
            Err(stage) => {
                warnings.push(format!("Risk aversion {lambda} failed: {stage}"));
                failed_levels.push(lambda);
            }
        }
    }
    points.sort_by(|a, b| a.volatility.total_cmp(&b.volatility));

    let output = FrontierOutput {
        asset_names: problem.asset_names().to_vec(),
        points,
        failed_levels,
    };
    let assumptions = serde_json::json!({
        "risk_aversions": risk_aversions,
        "risk_ceiling": problem.risk_ceiling,
        "workers": config.workers,
        "seed": config.genetic.seed,
    });
    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Efficient frontier: genetic search + warm-started exact solve per risk-aversion level",
        &assumptions,
        warnings,
        elapsed,
        output,
    ))
}

fn solve_level(
    base: &PortfolioProblem,
    lambda: f64,
    config: &OptimizerConfig,
) -> Result<FrontierPoint, &'static str> {
    let problem = base.with_risk_aversion(lambda);
    let genetic = metaheuristic::optimize(&problem, &config.genetic)
        .ok_or("genetic search found no feasible portfolio")?;
    let exact = exact::optimize(&problem, Some(&genetic.weights), &config.exact)
        .ok_or("exact solver returned no solution")?;
    tracing::debug!(lambda, objective = exact.metrics.objective, "frontier level solved");
    Ok(FrontierPoint {
        risk_aversion: lambda,
        expected_return: exact.metrics.expected_return,
        volatility: exact.metrics.volatility,
        objective: exact.metrics.objective,
        genetic_objective: genetic.metrics.objective,
        weights: exact.weights,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneticConfig;
    use crate::market_data::Provenance;
    use rust_decimal_macros::dec;

    fn snapshot() -> Arc<MarketSnapshot> {
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
            provenance: Provenance::Live,
            as_of: None,
        })
    }

    fn config() -> OptimizerConfig {
        OptimizerConfig {
            genetic: GeneticConfig {
                population_size: 30,
                max_generations: 80,
                patience: 20,
                ..Default::default()
            },
            workers: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_sweep_returns_point_per_level() {
        let out = sweep_frontier(
            snapshot(),
            &SectorTaxonomy::default(),
            &ProblemSpec::new(0.25, 1.0),
            &[1.0, 10.0, 100.0],
            &config(),
        )
        .unwrap();
        assert_eq!(out.result.points.len(), 3);
        assert!(out.result.failed_levels.is_empty());
        let vols: Vec<f64> = out.result.points.iter().map(|p| p.volatility).collect();
        assert!(vols.windows(2).all(|w| w[0] <= w[1]));
        let at = |l: f64| {
            out.result
                .points
                .iter()
                .find(|p| p.risk_aversion == l)
                .map(|p| p.volatility)
                .unwrap()
        };
        assert!(at(100.0) <= at(1.0) + 1e-6);
        for p in &out.result.points {
            let slack = 1e-3 * p.genetic_objective.abs() + 1e-6;
            assert!(p.objective <= p.genetic_objective + slack);
        }
    }

    #[test]
    fn test_genetic_failure_fails_the_level() {
        let mut cfg = config();
        cfg.genetic.population_size = 2;
        cfg.genetic.max_generations = 1;
        // Any held position breaks a ceiling this tight.
        let spec = ProblemSpec::new(1e-6, 50.0);
        let out = sweep_frontier(snapshot(), &SectorTaxonomy::default(), &spec, &[50.0], &cfg)
            .unwrap();
        assert!(out.result.points.is_empty());
        assert_eq!(out.result.failed_levels, vec![50.0]);
        assert!(out.warnings.iter().any(|w| w.contains("genetic")));
    }

    #[test]
    fn test_sweep_rejects_bad_levels() {
        let cfg = config();
        let spec = ProblemSpec::new(0.25, 1.0);
        let tax = SectorTaxonomy::default();
        assert!(sweep_frontier(snapshot(), &tax, &spec, &[], &cfg).is_err());
        assert!(sweep_frontier(snapshot(), &tax, &spec, &[f64::NAN], &cfg).is_err());
    }
}
