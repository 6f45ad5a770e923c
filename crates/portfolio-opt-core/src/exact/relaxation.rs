use clarabel::algebra::*;
use clarabel::solver::*;

use crate::formulation::PortfolioProblem;
use crate::linalg::cholesky_psd;
use crate::OptimizerResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A sparse linear row: (variable index, coefficient) pairs and its right-hand side.
#[derive(Debug, Clone)]
struct Row {
    terms: Vec<(usize, f64)>,
    rhs: f64,
}

/// Outcome of one continuous relaxation.
#[derive(Debug, Clone)]
pub enum Relaxation {
    Solved { x: Vec<f64>, objective: f64 },
    Infeasible,
    Failed(String),
}

/// The continuous relaxation of the portfolio MIQP.
///
/// Variables are the weights, followed by one selection indicator per asset
/// when minimum-entry or cardinality constraints are active. Lot
/// quantization is expressed on the weights themselves (a grid of `lot_step`).
/// Variable bounds are supplied per solve so branch-and-bound nodes only
/// differ in their bound rows.
#[derive(Debug, Clone)]
pub struct QpModel {
    pub n_assets: usize,
    pub indicators: bool,
    pub n_vars: usize,
    /// Upper bound of each weight, floored to the lot grid when lots apply.
    pub weight_caps: Vec<f64>,
    /// Minimum weight of a selected position.
    pub entry: Vec<f64>,
    /// Weight of one lot, when lot quantization is active.
    pub lot_step: Option<Vec<f64>>,
    /// Assets held at zero regardless of branching.
    pub pinned: Vec<bool>,
    p: CscMatrix<f64>,
    q: Vec<f64>,
    constant: f64,
    rows: Vec<Row>,
    /// Rows of -L' for the risk cone.
    risk_rows: Vec<Vec<(usize, f64)>>,
    risk_ceiling: f64,
    max_iter: u32,
}

// ---------------------------------------------------------------------------
// Model construction
// ---------------------------------------------------------------------------

impl QpModel {
    pub fn build(problem: &PortfolioProblem, max_iter: u32) -> OptimizerResult<Self> {
        let n = problem.n_assets();
        let snapshot = &problem.snapshot;
        let indicators = problem.needs_indicators();
        let n_vars = if indicators { 2 * n } else { n };

        let lot_step = problem.lot_weights.as_ref().map(|steps| {
            steps
                .iter()
                .map(|s| if s.is_finite() && *s > 0.0 { *s } else { 0.0 })
                .collect::<Vec<f64>>()
        });

        let weight_caps: Vec<f64> = (0..n)
            .map(|i| {
                let ub = problem.upper_bounds[i];
                match &lot_step {
                    Some(steps) if steps[i] > 0.0 => (ub / steps[i] + 1e-9).floor() * steps[i],
                    Some(_) => 0.0,
                    None => ub,
                }
            })
            .collect();
        let entry: Vec<f64> = if indicators {
            problem.min_entry.clone()
        } else {
            vec![0.0; n]
        };
        let pinned: Vec<bool> = (0..n)
            .map(|i| weight_caps[i] <= 0.0 || weight_caps[i] < entry[i])
            .collect();

        // 0.5 x'Px with P = 2 lambda Sigma, upper triangle only.
        let mut p_triplets = Vec::new();
        if problem.risk_aversion > 0.0 {
            for j in 0..n {
                for i in 0..=j {
                    let v = 2.0 * problem.risk_aversion * snapshot.covariance[i][j];
                    if v != 0.0 {
                        p_triplets.push((i, j, v));
                    }
                }
            }
        }
        let p = csc_from_triplets(n_vars, n_vars, p_triplets);

        // Cash term w_cash * (1 - sum w) is linear because sum w <= 1.
        let pen = &problem.penalties;
        let mut q = vec![0.0; n_vars];
        for i in 0..n {
            q[i] = -snapshot.expected_returns[i]
                + pen.valuation * snapshot.valuation_ratio[i]
                + pen.cvar * snapshot.cvar[i]
                - pen.cash;
        }

        let mut rows = vec![Row {
            terms: (0..n).map(|i| (i, 1.0)).collect(),
            rhs: 1.0,
        }];
        if let Some(cap) = problem.sector_cap {
            for group in &problem.sectors {
                rows.push(Row {
                    terms: group.indices.iter().map(|&i| (i, 1.0)).collect(),
                    rhs: cap,
                });
            }
        }
        if indicators {
            for i in 0..n {
                // w <= ub z
                rows.push(Row {
                    terms: vec![(i, 1.0), (n + i, -weight_caps[i])],
                    rhs: 0.0,
                });
                // lb z <= w
                if entry[i] > 0.0 {
                    rows.push(Row {
                        terms: vec![(n + i, entry[i]), (i, -1.0)],
                        rhs: 0.0,
                    });
                }
            }
            if let Some(k) = problem.max_assets {
                rows.push(Row {
                    terms: (0..n).map(|i| (n + i, 1.0)).collect(),
                    rhs: k as f64,
                });
            }
            if let Some(k) = problem.max_assets_per_sector {
                for group in &problem.sectors {
                    rows.push(Row {
                        terms: group.indices.iter().map(|&i| (n + i, 1.0)).collect(),
                        rhs: k as f64,
                    });
                }
            }
        }

        let l = cholesky_psd(&snapshot.covariance)?;
        let risk_rows: Vec<Vec<(usize, f64)>> = (0..n)
            .map(|k| {
                (0..n)
                    .filter(|&i| l[i][k] != 0.0)
                    .map(|i| (i, -l[i][k]))
                    .collect()
            })
            .collect();

        Ok(Self {
            n_assets: n,
            indicators,
            n_vars,
            weight_caps,
            entry,
            lot_step,
            pinned,
            p,
            q,
            constant: pen.cash,
            rows,
            risk_rows,
            risk_ceiling: problem.risk_ceiling,
            max_iter,
        })
    }

    /// Bounds of the root node.
    pub fn root_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let n = self.n_assets;
        let lower = vec![0.0; self.n_vars];
        let mut upper = vec![0.0; self.n_vars];
        for i in 0..n {
            if self.pinned[i] {
                continue;
            }
            upper[i] = self.weight_caps[i];
            if self.indicators {
                upper[n + i] = 1.0;
            }
        }
        (lower, upper)
    }

    /// Objective of `x` in the same units as `Relaxation::Solved::objective`.
    pub fn objective_of(&self, x: &[f64]) -> f64 {
        let mut quad = 0.0;
        for j in 0..self.p.n {
            for k in self.p.colptr[j]..self.p.colptr[j + 1] {
                let i = self.p.rowval[k];
                let v = self.p.nzval[k];
                quad += if i == j { 0.5 * v * x[i] * x[j] } else { v * x[i] * x[j] };
            }
        }
        let lin: f64 = self.q.iter().zip(x.iter()).map(|(a, b)| a * b).sum();
        quad + lin + self.constant
    }

    // -----------------------------------------------------------------------
    // Solve
    // -----------------------------------------------------------------------

    /// Solve the relaxation with variable bounds `lower <= x <= upper`.
    pub fn solve(&self, lower: &[f64], upper: &[f64]) -> Relaxation {
        if lower.iter().zip(upper.iter()).any(|(lo, hi)| lo > &(hi + 1e-12)) {
            return Relaxation::Infeasible;
        }

        let mut triplets: Vec<(usize, usize, f64)> = Vec::new();
        let mut b: Vec<f64> = Vec::new();

        // Fixed variables as equalities.
        let mut row = 0;
        for j in 0..self.n_vars {
            if upper[j] - lower[j] <= 1e-12 {
                triplets.push((row, j, 1.0));
                b.push(lower[j]);
                row += 1;
            }
        }
        let n_zero = row;

        for j in 0..self.n_vars {
            if upper[j] - lower[j] > 1e-12 {
                triplets.push((row, j, 1.0));
                b.push(upper[j]);
                row += 1;
                triplets.push((row, j, -1.0));
                b.push(-lower[j]);
                row += 1;
            }
        }
        for r in &self.rows {
            for &(j, v) in &r.terms {
                triplets.push((row, j, v));
            }
            b.push(r.rhs);
            row += 1;
        }
        let n_nonneg = row - n_zero;

        // (ceiling, L'w) in the second-order cone.
        b.push(self.risk_ceiling);
        row += 1;
        for terms in &self.risk_rows {
            for &(j, v) in terms {
                triplets.push((row, j, v));
            }
            b.push(0.0);
            row += 1;
        }

        let a = csc_from_triplets(row, self.n_vars, triplets);
        let mut cones: Vec<SupportedConeT<f64>> = Vec::with_capacity(3);
        if n_zero > 0 {
            cones.push(ZeroConeT(n_zero));
        }
        cones.push(NonnegativeConeT(n_nonneg));
        cones.push(SecondOrderConeT(self.n_assets + 1));

        let settings = match DefaultSettingsBuilder::default()
            .max_iter(self.max_iter)
            .verbose(false)
            .build()
        {
            Ok(s) => s,
            Err(e) => return Relaxation::Failed(format!("settings: {}", e)),
        };
        let mut solver = match DefaultSolver::new(&self.p, &self.q, &a, &b, &cones, settings) {
            Ok(s) => s,
            Err(e) => return Relaxation::Failed(format!("setup: {:?}", e)),
        };
        solver.solve();

        match solver.solution.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => Relaxation::Solved {
                x: solver.solution.x.clone(),
                objective: solver.solution.obj_val + self.constant,
            },
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
                Relaxation::Infeasible
            }
            other => Relaxation::Failed(format!("{:?}", other)),
        }
    }
}

/// Assemble a CSC matrix from (row, col, value) triplets.
fn csc_from_triplets(m: usize, n: usize, mut triplets: Vec<(usize, usize, f64)>) -> CscMatrix<f64> {
    triplets.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
    let mut colptr = vec![0usize; n + 1];
    let mut rowval = Vec::with_capacity(triplets.len());
    let mut nzval = Vec::with_capacity(triplets.len());
    for &(i, j, v) in &triplets {
        colptr[j + 1] += 1;
        rowval.push(i);
        nzval.push(v);
    }
    for j in 0..n {
        colptr[j + 1] += colptr[j];
    }
    CscMatrix::new(m, n, colptr, rowval, nzval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizerConfig;
    use crate::formulation::ProblemSpec;
    use crate::market_data::{MarketSnapshot, Provenance};
    use crate::taxonomy::SectorTaxonomy;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn problem(spec: ProblemSpec, config: OptimizerConfig) -> PortfolioProblem {
        let snapshot = MarketSnapshot {
            asset_names: vec!["A".into(), "B".into(), "C".into()],
            expected_returns: vec![0.10, 0.20, 0.15],
            covariance: vec![
                vec![0.04, 0.0, 0.0],
                vec![0.0, 0.09, 0.0],
                vec![0.0, 0.0, 0.01],
            ],
            average_volume: vec![1e9; 3],
            last_price: vec![10.0, 20.0, 30.0],
            valuation_ratio: vec![1.0; 3],
            cvar: vec![0.02; 3],
            total_capital: dec!(10000),
            benchmarks: vec![],
            provenance: Provenance::Synthetic,
            as_of: None,
        };
        PortfolioProblem::build(Arc::new(snapshot), &SectorTaxonomy::default(), &spec, &config)
            .unwrap()
    }

    #[test]
    fn test_csc_from_triplets_orders_columns() {
        let m = csc_from_triplets(2, 2, vec![(1, 1, 4.0), (0, 0, 1.0), (1, 0, 2.0)]);
        assert_eq!(m.colptr, vec![0, 2, 3]);
        assert_eq!(m.rowval, vec![0, 1, 1]);
        assert_eq!(m.nzval, vec![1.0, 2.0, 4.0]);
    }

    #[test]
    fn test_root_relaxation_respects_ceiling() {
        let config = OptimizerConfig {
            min_weight: 0.0,
            ..Default::default()
        };
        let p = problem(ProblemSpec::new(0.15, 50.0), config);
        let model = QpModel::build(&p, 200).unwrap();
        assert!(!model.indicators);
        let (lo, hi) = model.root_bounds();
        match model.solve(&lo, &hi) {
            Relaxation::Solved { x, objective } => {
                assert!(p.evaluate(&x).volatility <= 0.15 + 1e-6);
                assert!((objective - p.objective(&x)).abs() < 1e-6);
                assert!((model.objective_of(&x) - p.objective(&x)).abs() < 1e-7);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_indicator_model_shape() {
        let mut spec = ProblemSpec::new(0.15, 50.0);
        spec.lot_size = Some(100.0);
        let p = problem(spec, OptimizerConfig::default());
        let model = QpModel::build(&p, 200).unwrap();
        assert!(model.indicators);
        assert_eq!(model.n_vars, 6);
        // One lot of C costs 100 * 30 / 10_000 = 0.30 of capital.
        assert!((model.weight_caps[2] - 0.30).abs() < 1e-12);
        assert!(!model.pinned[2]);
    }

    #[test]
    fn test_inverted_bounds_are_infeasible() {
        let p = problem(ProblemSpec::new(0.15, 50.0), OptimizerConfig::default());
        let model = QpModel::build(&p, 200).unwrap();
        let (mut lo, hi) = model.root_bounds();
        lo[0] = 0.5;
        assert!(matches!(model.solve(&lo, &hi), Relaxation::Infeasible));
    }
}
