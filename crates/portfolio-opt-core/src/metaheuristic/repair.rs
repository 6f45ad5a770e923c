use crate::formulation::PortfolioProblem;

/// Guards the scaling denominators against a zero sum.
pub const REPAIR_EPSILON: f64 = 1e-9;

/// One pure transform of a weight vector. Steps only ever lower weights.
#[derive(Debug, Clone, PartialEq)]
pub enum RepairStep {
    /// Replace NaN and infinities with 0.
    ZeroNonFinite,
    /// Zero every weight below `threshold`.
    RemoveDust { threshold: f64 },
    /// Zero every weight below its asset's minimum entry (min weight or one lot).
    EnforceMinimumEntry,
    /// Clip each weight into `[0, upper_bound]`.
    ClipToBounds,
    /// Scale the vector by `1 / (sum + eps)` when the sum exceeds 1.
    ScaleBudget,
    /// Scale each over-cap sector by `cap / (sector_sum + eps)`.
    ScaleSectors { cap: f64 },
    /// Keep only the largest positions, globally and per sector.
    TrimCardinality {
        max_assets: Option<usize>,
        max_per_sector: Option<usize>,
    },
}

impl RepairStep {
    pub fn apply(&self, problem: &PortfolioProblem, weights: &mut [f64]) {
        match *self {
            RepairStep::ZeroNonFinite => {
                for w in weights.iter_mut().filter(|w| !w.is_finite()) {
                    *w = 0.0;
                }
            }
            RepairStep::RemoveDust { threshold } => {
                for w in weights.iter_mut().filter(|w| **w < threshold) {
                    *w = 0.0;
                }
            }
            RepairStep::EnforceMinimumEntry => {
                for (w, entry) in weights.iter_mut().zip(problem.min_entry.iter()) {
                    if *w < *entry {
                        *w = 0.0;
                    }
                }
            }
            RepairStep::ClipToBounds => {
                for (w, ub) in weights.iter_mut().zip(problem.upper_bounds.iter()) {
                    *w = w.clamp(0.0, *ub);
                }
            }
            RepairStep::ScaleBudget => {
                let total: f64 = weights.iter().sum();
                if total > 1.0 {
                    let factor = 1.0 / (total + REPAIR_EPSILON);
                    weights.iter_mut().for_each(|w| *w *= factor);
                }
            }
            RepairStep::ScaleSectors { cap } => {
                for group in &problem.sectors {
                    let sum: f64 = group.indices.iter().map(|&i| weights[i]).sum();
                    if sum > cap {
                        let factor = cap / (sum + REPAIR_EPSILON);
                        for &i in &group.indices {
                            weights[i] *= factor;
                        }
                    }
                }
            }
            RepairStep::TrimCardinality {
                max_assets,
                max_per_sector,
            } => {
                if let Some(k) = max_per_sector {
                    for group in &problem.sectors {
                        keep_largest(weights, &group.indices, k);
                    }
                }
                if let Some(k) = max_assets {
                    let all: Vec<usize> = (0..weights.len()).collect();
                    keep_largest(weights, &all, k);
                }
            }
        }
    }
}

/// Zero all but the `k` largest non-zero weights among `indices`.
/// Ties keep the lower index.
fn keep_largest(weights: &mut [f64], indices: &[usize], k: usize) {
    let mut held: Vec<usize> = indices.iter().copied().filter(|&i| weights[i] > 0.0).collect();
    if held.len() <= k {
        return;
    }
    held.sort_by(|&a, &b| weights[b].total_cmp(&weights[a]).then(a.cmp(&b)));
    for &i in &held[k..] {
        weights[i] = 0.0;
    }
}

/// Ordered list of repair steps, built from the problem's constraint toggles.
#[derive(Debug, Clone)]
pub struct RepairPipeline {
    steps: Vec<RepairStep>,
}

impl RepairPipeline {
    pub fn new(steps: Vec<RepairStep>) -> Self {
        Self { steps }
    }

    /// Non-finite, minimum entry, clip, budget, sector, minimum entry; then
    /// cardinality trimming when the problem caps the number of positions.
    pub fn for_problem(problem: &PortfolioProblem) -> Self {
        let mut steps = vec![
            RepairStep::ZeroNonFinite,
            RepairStep::EnforceMinimumEntry,
            RepairStep::ClipToBounds,
            RepairStep::ScaleBudget,
        ];
        if let Some(cap) = problem.sector_cap {
            steps.push(RepairStep::ScaleSectors { cap });
        }
        steps.push(RepairStep::EnforceMinimumEntry);
        if problem.has_cardinality() {
            steps.push(RepairStep::TrimCardinality {
                max_assets: problem.max_assets,
                max_per_sector: problem.max_assets_per_sector,
            });
        }
        Self { steps }
    }

    pub fn steps(&self) -> &[RepairStep] {
        &self.steps
    }

    /// Run every step in order. Returns whether any weight changed.
    pub fn apply(&self, problem: &PortfolioProblem, weights: &mut [f64]) -> bool {
        let before = weights.to_vec();
        for step in &self.steps {
            step.apply(problem, weights);
        }
        before
            .iter()
            .zip(weights.iter())
            .any(|(a, b)| a.to_bits() != b.to_bits())
    }

    /// Repaired copy of `weights`.
    pub fn repaired(&self, problem: &PortfolioProblem, weights: &[f64]) -> Vec<f64> {
        let mut out = weights.to_vec();
        self.apply(problem, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizerConfig;
    use crate::formulation::ProblemSpec;
    use crate::market_data::{MarketSnapshot, Provenance};
    use crate::taxonomy::SectorTaxonomy;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn problem(spec: ProblemSpec) -> PortfolioProblem {
        let n = 4;
        let snapshot = MarketSnapshot {
            asset_names: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            expected_returns: vec![0.1; n],
            covariance: (0..n)
                .map(|i| (0..n).map(|j| if i == j { 0.04 } else { 0.0 }).collect())
                .collect(),
            average_volume: vec![1e9; n],
            last_price: vec![10.0; n],
            valuation_ratio: vec![1.0; n],
            cvar: vec![0.02; n],
            total_capital: dec!(10000),
            benchmarks: vec![],
            provenance: Provenance::Synthetic,
            as_of: None,
        };
        let mut sectors = BTreeMap::new();
        sectors.insert("S1".to_string(), vec!["A".to_string(), "B".to_string()]);
        sectors.insert("S2".to_string(), vec!["C".to_string(), "D".to_string()]);
        PortfolioProblem::build(
            Arc::new(snapshot),
            &SectorTaxonomy::new(sectors),
            &spec,
            &OptimizerConfig::default(),
        )
        .unwrap()
    }

    // -----------------------------------------------------------------------
    // 1. Individual steps
    // -----------------------------------------------------------------------

    #[test]
    fn test_non_finite_and_dust() {
        let p = problem(ProblemSpec::new(1.0, 1.0));
        let mut w = vec![f64::NAN, 0.001, f64::INFINITY, 0.2];
        RepairStep::ZeroNonFinite.apply(&p, &mut w);
        RepairStep::RemoveDust { threshold: 0.005 }.apply(&p, &mut w);
        assert_eq!(w, vec![0.0, 0.0, 0.0, 0.2]);
    }

    #[test]
    fn test_budget_never_scales_up() {
        let p = problem(ProblemSpec::new(1.0, 1.0));
        let mut w = vec![0.1, 0.1, 0.0, 0.0];
        RepairStep::ScaleBudget.apply(&p, &mut w);
        assert_eq!(w, vec![0.1, 0.1, 0.0, 0.0]);

        let mut w = vec![0.3, 0.3, 0.3, 0.3];
        RepairStep::ScaleBudget.apply(&p, &mut w);
        assert!(w.iter().sum::<f64>() <= 1.0);
    }

    #[test]
    fn test_zero_vector_is_left_alone() {
        let p = problem(ProblemSpec::new(1.0, 1.0));
        let pipeline = RepairPipeline::for_problem(&p);
        let mut w = vec![0.0; 4];
        assert!(!pipeline.apply(&p, &mut w));
        assert_eq!(w, vec![0.0; 4]);
    }

    #[test]
    fn test_sector_scaling() {
        let mut spec = ProblemSpec::new(1.0, 1.0);
        spec.sector_cap = 0.10;
        let p = problem(spec);
        let pipeline = RepairPipeline::for_problem(&p);
        let w = pipeline.repaired(&p, &[0.125, 0.125, 0.05, 0.0]);
        assert!(w[0] + w[1] <= 0.10);
        assert!((w[0] - w[1]).abs() < 1e-15);
        assert_eq!(w[2], 0.05);
    }

    #[test]
    fn test_minimum_entry_follows_lot_size() {
        // price 10, capital 10000: one lot of 200 shares is 0.2 of capital
        let mut spec = ProblemSpec::new(1.0, 1.0);
        spec.lot_size = Some(200.0);
        spec.asset_cap = 0.5;
        let p = problem(spec);
        let pipeline = RepairPipeline::for_problem(&p);
        let w = pipeline.repaired(&p, &[0.15, 0.25, 0.199, 0.4]);
        assert_eq!(w, vec![0.0, 0.25, 0.0, 0.4]);
        assert!(p.violations_with_entry(&w, 0.0).is_empty());
    }

    #[test]
    fn test_cardinality_trim_keeps_largest() {
        let mut spec = ProblemSpec::new(1.0, 1.0);
        spec.max_assets = Some(2);
        spec.max_assets_per_sector = Some(1);
        let p = problem(spec);
        let pipeline = RepairPipeline::for_problem(&p);
        let w = pipeline.repaired(&p, &[0.1, 0.2, 0.15, 0.05]);
        assert_eq!(w, vec![0.0, 0.2, 0.15, 0.0]);
    }

    // -----------------------------------------------------------------------
    // 2. Pipeline properties
    // -----------------------------------------------------------------------

    #[test]
    fn test_pipeline_order() {
        let mut spec = ProblemSpec::new(1.0, 1.0);
        spec.sector_cap = 0.5;
        let p = problem(spec);
        let steps = RepairPipeline::for_problem(&p).steps().to_vec();
        assert_eq!(steps.len(), 6);
        assert_eq!(steps[0], RepairStep::ZeroNonFinite);
        assert_eq!(steps[1], RepairStep::EnforceMinimumEntry);
        assert_eq!(steps[2], RepairStep::ClipToBounds);
        assert_eq!(steps[3], RepairStep::ScaleBudget);
        assert_eq!(steps[4], RepairStep::ScaleSectors { cap: 0.5 });
        assert_eq!(steps[5], steps[1]);
    }

    #[test]
    fn test_repair_is_idempotent() {
        let mut spec = ProblemSpec::new(1.0, 1.0);
        spec.sector_cap = 0.25;
        spec.max_assets = Some(3);
        let p = problem(spec);
        let pipeline = RepairPipeline::for_problem(&p);
        let inputs = [
            vec![0.9, 0.8, 0.7, 0.6],
            vec![-0.2, f64::NAN, 0.004, 0.3],
            vec![0.2, 0.2, 0.2, 0.2],
            vec![0.006, 0.3, 0.0, 1e-12],
        ];
        for x in inputs {
            let once = pipeline.repaired(&p, &x);
            let twice = pipeline.repaired(&p, &once);
            assert_eq!(once, twice, "input {:?}", x);
        }
    }

    #[test]
    fn test_repair_never_raises_weights() {
        let p = problem(ProblemSpec::new(1.0, 1.0));
        let pipeline = RepairPipeline::for_problem(&p);
        let x = vec![0.05, 0.4, 0.2, 0.01];
        let w = pipeline.repaired(&p, &x);
        for (a, b) in x.iter().zip(w.iter()) {
            assert!(b <= a);
        }
    }
}
