use serde::{Deserialize, Serialize};

use crate::error::OptimizerError;
use crate::OptimizerResult;

// ---------------------------------------------------------------------------
// Objective calibration
// ---------------------------------------------------------------------------

/// Fixed calibration constants of the scalarized objective.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenaltyWeights {
    /// Weight of the valuation (price-to-book) exposure term.
    #[serde(default = "default_valuation_weight")]
    pub valuation: f64,
    /// Weight of the tail-risk (CVaR) exposure term.
    #[serde(default = "default_cvar_weight")]
    pub cvar: f64,
    /// Weight of the one-sided idle-cash penalty.
    #[serde(default = "default_cash_weight")]
    pub cash: f64,
}

fn default_valuation_weight() -> f64 {
    0.005
}

fn default_cvar_weight() -> f64 {
    0.1
}

fn default_cash_weight() -> f64 {
    5.0
}

impl Default for PenaltyWeights {
    fn default() -> Self {
        Self {
            valuation: default_valuation_weight(),
            cvar: default_cvar_weight(),
            cash: default_cash_weight(),
        }
    }
}

// ---------------------------------------------------------------------------
// Genetic search
// ---------------------------------------------------------------------------

/// Parameters of the genetic search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneticConfig {
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    #[serde(default = "default_max_generations")]
    pub max_generations: u32,
    /// Generations without `ftol` improvement before stopping early.
    #[serde(default = "default_patience")]
    pub patience: u32,
    #[serde(default = "default_ftol")]
    pub ftol: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_crossover_prob")]
    pub crossover_probability: f64,
    /// Simulated binary crossover distribution index.
    #[serde(default = "default_crossover_eta")]
    pub crossover_eta: f64,
    /// Polynomial mutation distribution index.
    #[serde(default = "default_mutation_eta")]
    pub mutation_eta: f64,
    /// Per-gene mutation probability; `None` means 1 / n_assets.
    #[serde(default)]
    pub mutation_probability: Option<f64>,
}

fn default_population_size() -> usize {
    100
}

fn default_max_generations() -> u32 {
    1500
}

fn default_patience() -> u32 {
    100
}

fn default_ftol() -> f64 {
    1e-9
}

fn default_seed() -> u64 {
    1
}

fn default_crossover_prob() -> f64 {
    0.9
}

fn default_crossover_eta() -> f64 {
    15.0
}

fn default_mutation_eta() -> f64 {
    20.0
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            max_generations: default_max_generations(),
            patience: default_patience(),
            ftol: default_ftol(),
            seed: default_seed(),
            crossover_probability: default_crossover_prob(),
            crossover_eta: default_crossover_eta(),
            mutation_eta: default_mutation_eta(),
            mutation_probability: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Exact solver
// ---------------------------------------------------------------------------

/// Limits of the branch-and-bound search and its QP relaxations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExactConfig {
    /// Relative optimality gap at which the search is considered proven.
    #[serde(default = "default_mip_gap")]
    pub mip_gap: f64,
    #[serde(default = "default_node_limit")]
    pub node_limit: u32,
    /// Wall-clock limit in seconds for the whole search.
    #[serde(default)]
    pub time_limit_secs: Option<f64>,
    /// Interior-point iteration cap per relaxation.
    #[serde(default = "default_max_iter")]
    pub max_iter: u32,
    /// Tolerance for treating a relaxed integer value as integral.
    #[serde(default = "default_integrality_tol")]
    pub integrality_tol: f64,
}

fn default_mip_gap() -> f64 {
    1e-4
}

fn default_node_limit() -> u32 {
    20_000
}

fn default_max_iter() -> u32 {
    200
}

fn default_integrality_tol() -> f64 {
    1e-6
}

impl Default for ExactConfig {
    fn default() -> Self {
        Self {
            mip_gap: default_mip_gap(),
            node_limit: default_node_limit(),
            time_limit_secs: None,
            max_iter: default_max_iter(),
            integrality_tol: default_integrality_tol(),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level configuration
// ---------------------------------------------------------------------------

/// Everything tunable that is not a user preference of a single request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default)]
    pub penalties: PenaltyWeights,
    /// Fraction of average traded value a single position may take.
    #[serde(default = "default_liquidity_fraction")]
    pub liquidity_fraction: f64,
    /// Minimum non-zero weight (dust threshold).
    #[serde(default = "default_min_weight")]
    pub min_weight: f64,
    #[serde(default)]
    pub genetic: GeneticConfig,
    #[serde(default)]
    pub exact: ExactConfig,
    /// Worker threads for frontier sweeps.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_liquidity_fraction() -> f64 {
    0.10
}

fn default_min_weight() -> f64 {
    0.005
}

fn default_workers() -> usize {
    4
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            penalties: PenaltyWeights::default(),
            liquidity_fraction: default_liquidity_fraction(),
            min_weight: default_min_weight(),
            genetic: GeneticConfig::default(),
            exact: ExactConfig::default(),
            workers: default_workers(),
        }
    }
}

impl OptimizerConfig {
    /// Reject configurations no solver can run with.
    pub fn validate(&self) -> OptimizerResult<()> {
        if !(self.liquidity_fraction > 0.0 && self.liquidity_fraction.is_finite()) {
            return Err(OptimizerError::ConfigError(format!(
                "liquidity_fraction must be positive, got {}",
                self.liquidity_fraction
            )));
        }
        if !(0.0..1.0).contains(&self.min_weight) {
            return Err(OptimizerError::ConfigError(format!(
                "min_weight must be in [0, 1), got {}",
                self.min_weight
            )));
        }
        if self.genetic.population_size < 2 {
            return Err(OptimizerError::ConfigError(
                "genetic.population_size must be at least 2".into(),
            ));
        }
        if self.genetic.max_generations == 0 {
            return Err(OptimizerError::ConfigError(
                "genetic.max_generations must be positive".into(),
            ));
        }
        if self.exact.mip_gap < 0.0 {
            return Err(OptimizerError::ConfigError(
                "exact.mip_gap must be non-negative".into(),
            ));
        }
        if self.workers == 0 {
            return Err(OptimizerError::ConfigError(
                "workers must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
