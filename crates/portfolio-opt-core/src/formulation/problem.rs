use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{OptimizerConfig, PenaltyWeights};
use crate::error::OptimizerError;
use crate::market_data::MarketSnapshot;
use crate::taxonomy::SectorTaxonomy;
use crate::types::money_to_f64;
use crate::OptimizerResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// User-level controls of one optimization request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemSpec {
    /// Maximum annualized volatility (0.15 = 15%).
    pub risk_ceiling: f64,
    /// Risk-aversion coefficient lambda applied to the variance.
    pub risk_aversion: f64,
    /// Sector labels whose assets must hold zero weight.
    #[serde(default)]
    pub denied_sectors: Vec<String>,
    /// Maximum weight of any single asset.
    #[serde(default = "default_asset_cap")]
    pub asset_cap: f64,
    /// Maximum combined weight of any sector; 1.0 disables the sector constraint.
    #[serde(default = "default_sector_cap")]
    pub sector_cap: f64,
    /// Maximum number of non-zero positions.
    #[serde(default)]
    pub max_assets: Option<usize>,
    /// Maximum number of non-zero positions inside one sector.
    #[serde(default)]
    pub max_assets_per_sector: Option<usize>,
    /// Units per tradeable lot; enables whole-lot quantization in the exact solver.
    #[serde(default)]
    pub lot_size: Option<f64>,
}

fn default_asset_cap() -> f64 {
    0.30
}

fn default_sector_cap() -> f64 {
    1.0
}

impl ProblemSpec {
    pub fn new(risk_ceiling: f64, risk_aversion: f64) -> Self {
        Self {
            risk_ceiling,
            risk_aversion,
            denied_sectors: Vec::new(),
            asset_cap: default_asset_cap(),
            sector_cap: default_sector_cap(),
            max_assets: None,
            max_assets_per_sector: None,
            lot_size: None,
        }
    }

    pub fn validate(&self) -> OptimizerResult<()> {
        if !(self.risk_ceiling > 0.0 && self.risk_ceiling.is_finite()) {
            return Err(OptimizerError::InvalidInput {
                field: "risk_ceiling".into(),
                reason: format!("Must be positive, got {}", self.risk_ceiling),
            });
        }
        if !(self.risk_aversion >= 0.0 && self.risk_aversion.is_finite()) {
            return Err(OptimizerError::InvalidInput {
                field: "risk_aversion".into(),
                reason: format!("Must be non-negative, got {}", self.risk_aversion),
            });
        }
        for (field, cap) in [("asset_cap", self.asset_cap), ("sector_cap", self.sector_cap)] {
            if !(cap > 0.0 && cap <= 1.0) {
                return Err(OptimizerError::InvalidInput {
                    field: field.into(),
                    reason: format!("Must be in (0, 1], got {}", cap),
                });
            }
        }
        for (field, limit) in [
            ("max_assets", self.max_assets),
            ("max_assets_per_sector", self.max_assets_per_sector),
        ] {
            if limit == Some(0) {
                return Err(OptimizerError::InvalidInput {
                    field: field.into(),
                    reason: "Must be at least 1 when set".into(),
                });
            }
        }
        if let Some(lot) = self.lot_size {
            if !(lot > 0.0 && lot.is_finite()) {
                return Err(OptimizerError::InvalidInput {
                    field: "lot_size".into(),
                    reason: format!("Must be positive, got {}", lot),
                });
            }
        }
        Ok(())
    }
}

/// Assets grouped under one taxonomy label, as indices into the universe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorGroup {
    pub name: String,
    pub indices: Vec<usize>,
    pub denied: bool,
}

/// Immutable description of one optimization instance: data, objective
/// weights, bound vectors and every constraint toggle.
#[derive(Debug, Clone)]
pub struct PortfolioProblem {
    pub snapshot: Arc<MarketSnapshot>,
    pub risk_aversion: f64,
    pub risk_ceiling: f64,
    pub penalties: PenaltyWeights,
    pub capital: f64,
    pub asset_cap: f64,
    /// Sector cap when the sector constraint is active.
    pub sector_cap: Option<f64>,
    /// Effective per-asset upper bound.
    pub upper_bounds: Vec<f64>,
    /// Liquidity-derived cap per asset (before the other caps).
    pub liquidity_caps: Vec<f64>,
    pub denied: Vec<bool>,
    pub sectors: Vec<SectorGroup>,
    /// First sector of each asset, as an index into `sectors`.
    pub asset_sector: Vec<Option<usize>>,
    /// Dust threshold of the repair pipeline.
    pub min_weight: f64,
    /// Minimum weight of a selected position in the exact model.
    pub min_entry: Vec<f64>,
    /// Weight of one lot per asset when lot quantization is active.
    pub lot_weights: Option<Vec<f64>>,
    pub max_assets: Option<usize>,
    pub max_assets_per_sector: Option<usize>,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

impl PortfolioProblem {
    /// Translate user controls into bounds and constraint data.
    pub fn build(
        snapshot: Arc<MarketSnapshot>,
        taxonomy: &SectorTaxonomy,
        spec: &ProblemSpec,
        config: &OptimizerConfig,
    ) -> OptimizerResult<Self> {
        spec.validate()?;
        config.validate()?;
        snapshot.validate_shape()?;

        let n = snapshot.n_assets();
        let mut warnings = Vec::new();

        let capital_raw = money_to_f64(snapshot.total_capital);
        let capital = if capital_raw > 0.0 { capital_raw } else { 1.0 };

        let liquidity_caps: Vec<f64> = snapshot
            .average_volume
            .iter()
            .map(|v| {
                let v = if v.is_finite() { v.max(0.0) } else { 0.0 };
                config.liquidity_fraction * v / capital
            })
            .collect();

        for label in &spec.denied_sectors {
            if !taxonomy.has_sector(label) {
                warnings.push(format!("Unknown denied sector '{}' ignored", label));
            }
        }

        let sectors: Vec<SectorGroup> = taxonomy
            .sector_indices(&snapshot.asset_names)
            .into_iter()
            .map(|(name, indices)| SectorGroup {
                denied: spec.denied_sectors.iter().any(|d| d.trim() == name),
                name,
                indices,
            })
            .collect();

        let mut denied = vec![false; n];
        let mut asset_sector = vec![None; n];
        for (s, group) in sectors.iter().enumerate() {
            for &i in &group.indices {
                if group.denied {
                    denied[i] = true;
                }
                if asset_sector[i].is_none() {
                    asset_sector[i] = Some(s);
                }
            }
        }

        let sector_cap = if spec.sector_cap < 0.999 {
            Some(spec.sector_cap)
        } else {
            None
        };

        let mut upper_bounds: Vec<f64> = (0..n)
            .map(|i| {
                if denied[i] {
                    0.0
                } else {
                    spec.asset_cap
                        .min(spec.sector_cap)
                        .min(liquidity_caps[i])
                        .max(0.0)
                }
            })
            .collect();

        let lot_weights = spec.lot_size.map(|lot| {
            snapshot
                .last_price
                .iter()
                .map(|p| lot * p / capital)
                .collect::<Vec<f64>>()
        });
        let min_entry: Vec<f64> = (0..n)
            .map(|i| {
                let lot = lot_weights.as_ref().map_or(0.0, |l| l[i]);
                config.min_weight.max(lot)
            })
            .collect();
        // A position that cannot reach its minimum entry can only be empty.
        let mut unreachable = 0usize;
        for (ub, entry) in upper_bounds.iter_mut().zip(min_entry.iter()) {
            if *ub > 0.0 && *ub < *entry {
                *ub = 0.0;
                unreachable += 1;
            }
        }
        if unreachable > 0 {
            tracing::debug!(unreachable, "bounds below minimum entry set to zero");
        }

        let allocatable = upper_bounds.iter().filter(|u| **u > 0.0).count();
        if allocatable == 0 {
            warnings.push("Every asset has a zero upper bound; only cash is feasible".into());
        }
        let denied_count = denied.iter().filter(|d| **d).count();
        tracing::debug!(
            n_assets = n,
            denied = denied_count,
            allocatable,
            sector_cap = ?sector_cap,
            "built portfolio problem"
        );

        Ok(Self {
            risk_aversion: spec.risk_aversion,
            risk_ceiling: spec.risk_ceiling,
            penalties: config.penalties,
            capital,
            asset_cap: spec.asset_cap,
            sector_cap,
            upper_bounds,
            liquidity_caps,
            denied,
            sectors,
            asset_sector,
            min_weight: config.min_weight,
            min_entry,
            lot_weights,
            max_assets: spec.max_assets,
            max_assets_per_sector: spec.max_assets_per_sector,
            warnings,
            snapshot,
        })
    }

    pub fn n_assets(&self) -> usize {
        self.snapshot.n_assets()
    }

    pub fn asset_names(&self) -> &[String] {
        &self.snapshot.asset_names
    }

    /// Same instance with a different risk-aversion coefficient.
    pub fn with_risk_aversion(&self, lambda: f64) -> Self {
        Self {
            risk_aversion: lambda,
            ..self.clone()
        }
    }

    pub fn has_cardinality(&self) -> bool {
        self.max_assets.is_some() || self.max_assets_per_sector.is_some()
    }

    /// Whether the exact model needs binary selection indicators.
    pub fn needs_indicators(&self) -> bool {
        self.has_cardinality() || self.min_entry.iter().any(|m| *m > 0.0)
    }

    /// Sectors whose aggregate weight is capped.
    pub fn capped_sectors(&self) -> impl Iterator<Item = &SectorGroup> {
        self.sectors.iter().filter(move |_| self.sector_cap.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Provenance;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn snapshot() -> Arc<MarketSnapshot> {
        Arc::new(MarketSnapshot {
            asset_names: vec!["A".into(), "B".into(), "C".into()],
            expected_returns: vec![0.10, 0.20, 0.15],
            covariance: vec![
                vec![0.04, 0.0, 0.0],
                vec![0.0, 0.09, 0.0],
                vec![0.0, 0.0, 0.01],
            ],
            average_volume: vec![1e9, 1e9, 5_000.0],
            last_price: vec![10.0, 20.0, 30.0],
            valuation_ratio: vec![1.0; 3],
            cvar: vec![0.03; 3],
            total_capital: dec!(10000),
            benchmarks: vec![],
            provenance: Provenance::Synthetic,
            as_of: None,
        })
    }

    fn taxonomy() -> SectorTaxonomy {
        let mut sectors = BTreeMap::new();
        sectors.insert("X".to_string(), vec!["A".to_string(), "B".to_string()]);
        sectors.insert("Y".to_string(), vec!["C".to_string()]);
        SectorTaxonomy::new(sectors)
    }

    #[test]
    fn test_upper_bounds_take_minimum_cap() {
        let spec = ProblemSpec::new(0.15, 50.0);
        let p = PortfolioProblem::build(snapshot(), &taxonomy(), &spec, &OptimizerConfig::default())
            .unwrap();
        assert_eq!(p.upper_bounds[0], 0.30);
        // Liquidity: 0.10 * 5_000 / 10_000 = 0.05
        assert!((p.upper_bounds[2] - 0.05).abs() < 1e-12);
        assert!(p.sector_cap.is_none());
    }

    #[test]
    fn test_denied_sector_zeroes_bounds() {
        let mut spec = ProblemSpec::new(0.15, 50.0);
        spec.denied_sectors = vec!["X".into(), "Nope".into()];
        let p = PortfolioProblem::build(snapshot(), &taxonomy(), &spec, &OptimizerConfig::default())
            .unwrap();
        assert_eq!(p.upper_bounds[0], 0.0);
        assert_eq!(p.upper_bounds[1], 0.0);
        assert!(p.upper_bounds[2] > 0.0);
        assert_eq!(p.warnings.len(), 1);
    }

    #[test]
    fn test_sector_cap_propagates() {
        let mut spec = ProblemSpec::new(0.15, 50.0);
        spec.sector_cap = 0.10;
        let p = PortfolioProblem::build(snapshot(), &taxonomy(), &spec, &OptimizerConfig::default())
            .unwrap();
        assert_eq!(p.sector_cap, Some(0.10));
        assert_eq!(p.upper_bounds[0], 0.10);
        assert_eq!(p.capped_sectors().count(), 2);
    }

    #[test]
    fn test_lot_weights_and_min_entry() {
        let mut spec = ProblemSpec::new(0.15, 50.0);
        spec.lot_size = Some(100.0);
        let p = PortfolioProblem::build(snapshot(), &taxonomy(), &spec, &OptimizerConfig::default())
            .unwrap();
        let lots = p.lot_weights.as_ref().unwrap();
        assert!((lots[0] - 0.1).abs() < 1e-12);
        assert!((p.min_entry[0] - 0.1).abs() < 1e-12);
        assert!(p.needs_indicators());
        // C: liquidity cap 0.05 is below one lot of 0.3
        assert_eq!(p.upper_bounds[2], 0.0);
        assert_eq!(p.upper_bounds[1], 0.30);
    }

    #[test]
    fn test_invalid_spec_rejected() {
        let spec = ProblemSpec::new(-0.1, 50.0);
        assert!(PortfolioProblem::build(snapshot(), &taxonomy(), &spec, &OptimizerConfig::default())
            .is_err());
        let mut spec = ProblemSpec::new(0.1, 50.0);
        spec.max_assets = Some(0);
        assert!(spec.validate().is_err());
    }
}
