use serde::{Deserialize, Serialize};

use super::problem::PortfolioProblem;

/// Default tolerance when checking a solver's output.
pub const FEASIBILITY_TOL: f64 = 1e-6;

/// Weights at or below this magnitude count as zero positions.
pub const ZERO_WEIGHT: f64 = 1e-9;

/// One violated constraint and by how much.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    NonFinite { asset: usize },
    Negative { asset: usize, amount: f64 },
    UpperBound { asset: usize, excess: f64 },
    Budget { excess: f64 },
    SectorCap { sector: String, excess: f64 },
    RiskCeiling { excess: f64 },
    Cardinality { count: usize, limit: usize },
    SectorCardinality { sector: String, count: usize, limit: usize },
    MinimumEntry { asset: usize, shortfall: f64 },
}

impl Violation {
    /// Magnitude used when ranking infeasible candidates.
    pub fn magnitude(&self) -> f64 {
        match self {
            Violation::NonFinite { .. } => f64::MAX,
            Violation::Negative { amount, .. } => *amount,
            Violation::UpperBound { excess, .. }
            | Violation::Budget { excess }
            | Violation::SectorCap { excess, .. }
            | Violation::RiskCeiling { excess } => *excess,
            Violation::Cardinality { count, limit }
            | Violation::SectorCardinality { count, limit, .. } => (count - limit) as f64,
            Violation::MinimumEntry { shortfall, .. } => *shortfall,
        }
    }
}

impl PortfolioProblem {
    /// Every constraint `weights` breaks by more than `tol`.
    ///
    /// The minimum-entry check only applies to the exact model, where a
    /// selected position must be at least one lot; the repair pipeline
    /// enforces the dust threshold separately.
    pub fn violations(&self, weights: &[f64], tol: f64) -> Vec<Violation> {
        let mut out = Vec::new();

        for (i, &w) in weights.iter().enumerate() {
            if !w.is_finite() {
                out.push(Violation::NonFinite { asset: i });
                continue;
            }
            if w < -tol {
                out.push(Violation::Negative {
                    asset: i,
                    amount: -w,
                });
            }
            let ub = self.upper_bounds[i];
            if w > ub + tol {
                out.push(Violation::UpperBound {
                    asset: i,
                    excess: w - ub,
                });
            }
        }
        if out.iter().any(|v| matches!(v, Violation::NonFinite { .. })) {
            return out;
        }

        let total: f64 = weights.iter().sum();
        if total > 1.0 + tol {
            out.push(Violation::Budget {
                excess: total - 1.0,
            });
        }

        if let Some(cap) = self.sector_cap {
            for group in &self.sectors {
                let sum: f64 = group.indices.iter().map(|&i| weights[i]).sum();
                if sum > cap + tol {
                    out.push(Violation::SectorCap {
                        sector: group.name.clone(),
                        excess: sum - cap,
                    });
                }
            }
        }

        let volatility = self.evaluate(weights).volatility;
        if volatility > self.risk_ceiling + tol {
            out.push(Violation::RiskCeiling {
                excess: volatility - self.risk_ceiling,
            });
        }

        if let Some(limit) = self.max_assets {
            let count = weights.iter().filter(|w| w.abs() > ZERO_WEIGHT).count();
            if count > limit {
                out.push(Violation::Cardinality { count, limit });
            }
        }
        if let Some(limit) = self.max_assets_per_sector {
            for group in &self.sectors {
                let count = group
                    .indices
                    .iter()
                    .filter(|&&i| weights[i].abs() > ZERO_WEIGHT)
                    .count();
                if count > limit {
                    out.push(Violation::SectorCardinality {
                        sector: group.name.clone(),
                        count,
                        limit,
                    });
                }
            }
        }

        out
    }

    /// Like `violations`, plus the per-position minimum entry of the exact model.
    pub fn violations_with_entry(&self, weights: &[f64], tol: f64) -> Vec<Violation> {
        let mut out = self.violations(weights, tol);
        for (i, &w) in weights.iter().enumerate() {
            let lb = self.min_entry[i];
            if w > ZERO_WEIGHT && w < lb - tol {
                out.push(Violation::MinimumEntry {
                    asset: i,
                    shortfall: lb - w,
                });
            }
        }
        out
    }

    pub fn is_feasible(&self, weights: &[f64]) -> bool {
        self.violations(weights, FEASIBILITY_TOL).is_empty()
    }

    /// Sum of violation magnitudes; 0 for a feasible portfolio.
    pub fn total_violation(&self, weights: &[f64], tol: f64) -> f64 {
        self.violations(weights, tol)
            .iter()
            .map(Violation::magnitude)
            .sum()
    }

    /// Number of sectors holding at least one non-zero position.
    pub fn sector_count(&self, weights: &[f64]) -> usize {
        self.sectors
            .iter()
            .filter(|g| g.indices.iter().any(|&i| weights[i] > ZERO_WEIGHT))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizerConfig;
    use crate::formulation::problem::ProblemSpec;
    use crate::market_data::{MarketSnapshot, Provenance};
    use crate::taxonomy::SectorTaxonomy;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn problem(spec: ProblemSpec) -> PortfolioProblem {
        let snapshot = MarketSnapshot {
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
            provenance: Provenance::Synthetic,
            as_of: None,
        };
        let mut sectors = BTreeMap::new();
        sectors.insert("S1".to_string(), vec!["A".to_string(), "B".to_string()]);
        sectors.insert("S2".to_string(), vec!["C".to_string()]);
        PortfolioProblem::build(
            Arc::new(snapshot),
            &SectorTaxonomy::new(sectors),
            &spec,
            &OptimizerConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_feasible_portfolio_has_no_violations() {
        let p = problem(ProblemSpec::new(0.15, 50.0));
        assert!(p.is_feasible(&[0.2, 0.1, 0.3]));
        assert_eq!(p.sector_count(&[0.2, 0.0, 0.0]), 1);
    }

    #[test]
    fn test_budget_and_bound_violations() {
        let p = problem(ProblemSpec::new(1.0, 50.0));
        let v = p.violations(&[0.5, 0.3, 0.3], FEASIBILITY_TOL);
        assert!(v.iter().any(|x| matches!(x, Violation::UpperBound { asset: 0, .. })));
        assert!(v.iter().any(|x| matches!(x, Violation::Budget { .. })));
    }

    #[test]
    fn test_sector_and_risk_violations() {
        let mut spec = ProblemSpec::new(0.05, 50.0);
        spec.sector_cap = 0.10;
        let p = problem(spec);
        let v = p.violations(&[0.1, 0.1, 0.0], FEASIBILITY_TOL);
        assert!(v.iter().any(|x| matches!(x, Violation::SectorCap { sector, .. } if sector == "S1")));
        let v = p.violations(&[0.0, 0.1, 0.0], FEASIBILITY_TOL);
        // vol = 0.03 <= 0.05
        assert!(v.is_empty());
    }

    #[test]
    fn test_cardinality_violations() {
        let mut spec = ProblemSpec::new(1.0, 50.0);
        spec.max_assets = Some(2);
        spec.max_assets_per_sector = Some(1);
        let p = problem(spec);
        let v = p.violations(&[0.1, 0.1, 0.1], FEASIBILITY_TOL);
        assert!(v.contains(&Violation::Cardinality { count: 3, limit: 2 }));
        assert!(v.iter().any(|x| matches!(x, Violation::SectorCardinality { count: 2, .. })));
        assert!(p.total_violation(&[0.1, 0.1, 0.1], FEASIBILITY_TOL) >= 2.0);
    }

    #[test]
    fn test_non_finite_short_circuits() {
        let p = problem(ProblemSpec::new(0.15, 50.0));
        let v = p.violations(&[f64::NAN, 0.1, 0.1], FEASIBILITY_TOL);
        assert_eq!(v, vec![Violation::NonFinite { asset: 0 }]);
    }
}
