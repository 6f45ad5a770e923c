use clap::Args;
use serde_json::Value;
use std::sync::Arc;

use portfolio_opt_core::formulation::ProblemSpec;
use portfolio_opt_core::market_data::MarketSnapshot;
use portfolio_opt_core::orchestrator::{
    run_comparison, run_exact_only, run_genetic_only, sweep_frontier, OptimizationRequest,
};
use portfolio_opt_core::taxonomy::SectorTaxonomy;
use portfolio_opt_core::OptimizerConfig;

use crate::input;

/// Request source and problem overrides shared by every solver command
#[derive(Args)]
pub struct OptimizeArgs {
    /// Path to JSON request ({snapshot, taxonomy, problem}); stdin if omitted
    #[arg(long)]
    pub input: Option<String>,

    /// Optimizer settings file (JSON or YAML)
    #[arg(long)]
    pub config: Option<String>,

    /// Maximum annualized volatility (e.g. 0.15)
    #[arg(long)]
    pub risk_ceiling: Option<f64>,

    /// Risk-aversion coefficient lambda
    #[arg(long)]
    pub risk_aversion: Option<f64>,

    /// Comma-separated sector labels to exclude
    #[arg(long, value_delimiter = ',')]
    pub deny_sector: Vec<String>,

    /// Maximum weight of a single asset
    #[arg(long)]
    pub asset_cap: Option<f64>,

    /// Maximum combined weight of a sector
    #[arg(long)]
    pub sector_cap: Option<f64>,

    /// Maximum number of positions
    #[arg(long)]
    pub max_assets: Option<usize>,

    /// Maximum number of positions inside one sector
    #[arg(long)]
    pub max_assets_per_sector: Option<usize>,

    /// Units per tradeable lot
    #[arg(long)]
    pub lot_size: Option<f64>,

    /// Seed of the genetic search
    #[arg(long)]
    pub seed: Option<u64>,

    /// Generation limit of the genetic search
    #[arg(long)]
    pub generations: Option<u32>,
}

/// Arguments for the exact solver alone
#[derive(Args)]
pub struct ExactArgs {
    #[command(flatten)]
    pub common: OptimizeArgs,

    /// Comma-separated warm-start weights, one per asset after preparation
    #[arg(long, value_delimiter = ',')]
    pub warm_start: Option<Vec<f64>>,
}

/// Arguments for the frontier sweep
#[derive(Args)]
pub struct FrontierArgs {
    #[command(flatten)]
    pub common: OptimizeArgs,

    /// Comma-separated risk-aversion levels (e.g. "1,5,25,100")
    #[arg(long, value_delimiter = ',', required = true)]
    pub lambdas: Vec<f64>,

    /// Worker threads for the sweep
    #[arg(long)]
    pub workers: Option<usize>,
}

/// A request ready to hand to the orchestrator.
struct Prepared {
    snapshot: Arc<MarketSnapshot>,
    taxonomy: SectorTaxonomy,
    problem: ProblemSpec,
    config: OptimizerConfig,
    dropped: Vec<String>,
}

pub fn run_optimize(args: OptimizeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let p = prepare(&args)?;
    let out = run_comparison(p.snapshot, &p.taxonomy, &p.problem, &p.config)?;
    finish(serde_json::to_value(out)?, p.dropped)
}

pub fn run_metaheuristic(args: OptimizeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let p = prepare(&args)?;
    let out = run_genetic_only(p.snapshot, &p.taxonomy, &p.problem, &p.config)?;
    finish(serde_json::to_value(out)?, p.dropped)
}

pub fn run_exact(args: ExactArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let p = prepare(&args.common)?;
    let out = run_exact_only(
        p.snapshot,
        &p.taxonomy,
        &p.problem,
        args.warm_start.as_deref(),
        &p.config,
    )?;
    finish(serde_json::to_value(out)?, p.dropped)
}

pub fn run_frontier(args: FrontierArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut p = prepare(&args.common)?;
    if let Some(workers) = args.workers {
        p.config.workers = workers;
        p.config.validate()?;
    }
    let out = sweep_frontier(
        p.snapshot,
        &p.taxonomy,
        &p.problem,
        &args.lambdas,
        &p.config,
    )?;
    finish(serde_json::to_value(out)?, p.dropped)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn prepare(args: &OptimizeArgs) -> Result<Prepared, Box<dyn std::error::Error>> {
    let mut request: OptimizationRequest = input::read_request(args.input.as_deref())?;
    let mut config = match &args.config {
        Some(path) => input::file::read_config(path)?,
        None => OptimizerConfig::default(),
    };
    apply_overrides(args, &mut request, &mut config);
    config.validate()?;
    request.problem.validate()?;

    let OptimizationRequest {
        mut snapshot,
        taxonomy,
        problem,
    } = request;
    let report = snapshot.sanitize(Some(&taxonomy))?;
    let dropped = report
        .dropped
        .iter()
        .map(|d| format!("Asset '{}' dropped: {}", d.name, d.reason))
        .collect();

    Ok(Prepared {
        snapshot: Arc::new(snapshot),
        taxonomy,
        problem,
        config,
        dropped,
    })
}

fn apply_overrides(
    args: &OptimizeArgs,
    request: &mut OptimizationRequest,
    config: &mut OptimizerConfig,
) {
    let problem = &mut request.problem;
    if let Some(v) = args.risk_ceiling {
        problem.risk_ceiling = v;
    }
    if let Some(v) = args.risk_aversion {
        problem.risk_aversion = v;
    }
    for sector in &args.deny_sector {
        if !problem.denied_sectors.contains(sector) {
            problem.denied_sectors.push(sector.clone());
        }
    }
    if let Some(v) = args.asset_cap {
        problem.asset_cap = v;
    }
    if let Some(v) = args.sector_cap {
        problem.sector_cap = v;
    }
    if args.max_assets.is_some() {
        problem.max_assets = args.max_assets;
    }
    if args.max_assets_per_sector.is_some() {
        problem.max_assets_per_sector = args.max_assets_per_sector;
    }
    if args.lot_size.is_some() {
        problem.lot_size = args.lot_size;
    }
    if let Some(seed) = args.seed {
        config.genetic.seed = seed;
    }
    if let Some(generations) = args.generations {
        config.genetic.max_generations = generations;
    }
}

/// Prepend preparation warnings to the envelope's own.
fn finish(mut value: Value, dropped: Vec<String>) -> Result<Value, Box<dyn std::error::Error>> {
    if dropped.is_empty() {
        return Ok(value);
    }
    if let Some(Value::Array(warnings)) = value.get_mut("warnings") {
        let mut merged: Vec<Value> = dropped.into_iter().map(Value::String).collect();
        merged.append(warnings);
        *warnings = merged;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> OptimizeArgs {
        OptimizeArgs {
            input: None,
            config: None,
            risk_ceiling: Some(0.2),
            risk_aversion: None,
            deny_sector: vec!["Banks".into(), "Energy".into()],
            asset_cap: None,
            sector_cap: Some(0.4),
            max_assets: Some(5),
            max_assets_per_sector: None,
            lot_size: None,
            seed: Some(11),
            generations: None,
        }
    }

    fn request() -> OptimizationRequest {
        let mut problem = ProblemSpec::new(0.15, 50.0);
        problem.denied_sectors = vec!["Energy".into()];
        let snapshot: MarketSnapshot = serde_json::from_value(serde_json::json!({
            "asset_names": ["A"],
            "expected_returns": [0.1],
            "covariance": [[0.04]],
            "average_volume": [1.0e6],
            "last_price": [10.0],
            "valuation_ratio": [1.0],
            "cvar": [0.02],
            "total_capital": "10000",
            "provenance": "live"
        }))
        .unwrap();
        OptimizationRequest {
            snapshot,
            taxonomy: SectorTaxonomy::default(),
            problem,
        }
    }

    #[test]
    fn test_overrides_replace_and_merge() {
        let mut req = request();
        let mut config = OptimizerConfig::default();
        apply_overrides(&args(), &mut req, &mut config);
        assert_eq!(req.problem.risk_ceiling, 0.2);
        assert_eq!(req.problem.risk_aversion, 50.0);
        assert_eq!(req.problem.denied_sectors, vec!["Energy", "Banks"]);
        assert_eq!(req.problem.sector_cap, 0.4);
        assert_eq!(req.problem.max_assets, Some(5));
        assert_eq!(config.genetic.seed, 11);
    }

    #[test]
    fn test_finish_prepends_dropped_assets() {
        let value = serde_json::json!({"result": {}, "warnings": ["later"]});
        let out = finish(value, vec!["Asset 'X' dropped: nan".into()]).unwrap();
        assert_eq!(
            out["warnings"],
            serde_json::json!(["Asset 'X' dropped: nan", "later"])
        );
    }
}
