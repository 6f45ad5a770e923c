use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use super::relaxation::{QpModel, Relaxation};
use crate::config::ExactConfig;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Best integer-feasible point found so far, in model variables.
#[derive(Debug, Clone)]
pub struct Incumbent {
    pub x: Vec<f64>,
    pub objective: f64,
}

/// Stopping rules of the search.
#[derive(Debug, Clone)]
pub struct SearchLimits {
    pub mip_gap: f64,
    pub node_limit: u32,
    pub time_limit: Option<Duration>,
    pub integrality_tol: f64,
}

impl From<&ExactConfig> for SearchLimits {
    fn from(config: &ExactConfig) -> Self {
        Self {
            mip_gap: config.mip_gap,
            node_limit: config.node_limit,
            time_limit: config
                .time_limit_secs
                .filter(|s| s.is_finite() && *s > 0.0)
                .map(Duration::from_secs_f64),
            integrality_tol: config.integrality_tol,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SearchOutcome {
    /// Incumbent proven optimal within the gap.
    Optimal {
        incumbent: Incumbent,
        best_bound: f64,
        nodes: u32,
    },
    Infeasible {
        nodes: u32,
    },
    /// Stopped on the node or time limit before closing the gap.
    LimitReached {
        incumbent: Option<Incumbent>,
        nodes: u32,
    },
    Failed(String),
}

#[derive(Debug)]
struct Node {
    lower: Vec<f64>,
    upper: Vec<f64>,
    x: Vec<f64>,
    bound: f64,
    depth: u32,
}

// Min-heap on the relaxation bound; deeper nodes first among equal bounds.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .bound
            .total_cmp(&self.bound)
            .then(self.depth.cmp(&other.depth))
    }
}

/// Variable chosen for branching and its value in integer units.
struct Branch {
    var: usize,
    value: f64,
    step: f64,
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Best-first branch-and-bound over the model's selection indicators and lot
/// counts.
pub fn search(model: &QpModel, limits: &SearchLimits, warm: Option<Incumbent>) -> SearchOutcome {
    let start = Instant::now();
    let mut incumbent = warm;
    let mut nodes: u32 = 0;

    let (lower, upper) = model.root_bounds();
    let root = match model.solve(&lower, &upper) {
        Relaxation::Solved { x, objective } => Node {
            lower,
            upper,
            x,
            bound: objective,
            depth: 0,
        },
        Relaxation::Infeasible => return SearchOutcome::Infeasible { nodes: 1 },
        Relaxation::Failed(detail) => return SearchOutcome::Failed(detail),
    };
    nodes += 1;

    let mut heap = BinaryHeap::new();
    heap.push(root);
    let mut last_bound = f64::NEG_INFINITY;

    while let Some(node) = heap.pop() {
        let Some(branch) = select_branch(model, &node.x, limits.integrality_tol) else {
            let x = snap_integral(model, &node.x);
            let objective = model.objective_of(&x);
            if incumbent.as_ref().map_or(true, |inc| objective < inc.objective) {
                tracing::debug!(nodes, objective, depth = node.depth, "new incumbent");
                incumbent = Some(Incumbent { x, objective });
            }
            continue;
        };

        if let Some(inc) = &incumbent {
            if node.bound >= cutoff(inc.objective, limits.mip_gap) {
                continue;
            }
        }
        last_bound = node.bound;

        let out_of_time = limits
            .time_limit
            .is_some_and(|limit| start.elapsed() >= limit);
        if nodes >= limits.node_limit || out_of_time {
            tracing::warn!(nodes, out_of_time, "branch-and-bound limit reached");
            return SearchOutcome::LimitReached { incumbent, nodes };
        }

        for child in children(&node, &branch) {
            let (lower, upper) = child;
            match model.solve(&lower, &upper) {
                Relaxation::Solved { x, objective } => {
                    nodes += 1;
                    let prune = incumbent
                        .as_ref()
                        .is_some_and(|inc| objective >= cutoff(inc.objective, limits.mip_gap));
                    if !prune {
                        heap.push(Node {
                            lower,
                            upper,
                            x,
                            bound: objective,
                            depth: node.depth + 1,
                        });
                    }
                }
                Relaxation::Infeasible => nodes += 1,
                Relaxation::Failed(detail) => return SearchOutcome::Failed(detail),
            }
        }
    }

    match incumbent {
        Some(incumbent) => {
            let best_bound = if last_bound.is_finite() {
                last_bound.min(incumbent.objective)
            } else {
                incumbent.objective
            };
            SearchOutcome::Optimal {
                incumbent,
                best_bound,
                nodes,
            }
        }
        None => SearchOutcome::Infeasible { nodes },
    }
}

/// Bound at or above which a node cannot improve on `objective` by more than the gap.
fn cutoff(objective: f64, mip_gap: f64) -> f64 {
    objective - mip_gap * objective.abs() - 1e-9
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Most fractional integer variable, or `None` when `x` is integral.
fn select_branch(model: &QpModel, x: &[f64], tol: f64) -> Option<Branch> {
    let n = model.n_assets;
    let mut best: Option<(f64, Branch)> = None;
    let mut consider = |score: f64, branch: Branch| {
        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((score, branch));
        }
    };

    if model.indicators {
        for i in 0..n {
            let z = x[n + i];
            if (z - z.round()).abs() > tol {
                consider((z - z.floor()).min(z.ceil() - z), Branch {
                    var: n + i,
                    value: z,
                    step: 1.0,
                });
            }
        }
    }
    if let Some(steps) = &model.lot_step {
        for i in 0..n {
            let step = steps[i];
            if model.pinned[i] || step <= 0.0 {
                continue;
            }
            let lots = x[i] / step;
            if (x[i] - lots.round() * step).abs() > tol {
                consider((lots - lots.floor()).min(lots.ceil() - lots), Branch {
                    var: i,
                    value: lots,
                    step,
                });
            }
        }
    }
    best.map(|(_, b)| b)
}

/// Down and up children of `node` on `branch`.
fn children(node: &Node, branch: &Branch) -> Vec<(Vec<f64>, Vec<f64>)> {
    let j = branch.var;
    let down = branch.value.floor() * branch.step;
    let up = branch.value.ceil() * branch.step;

    let mut out = Vec::with_capacity(2);
    if down >= node.lower[j] - 1e-12 {
        let mut upper = node.upper.clone();
        upper[j] = down.max(node.lower[j]);
        out.push((node.lower.clone(), upper));
    }
    if up <= node.upper[j] + 1e-12 {
        let mut lower = node.lower.clone();
        lower[j] = up.min(node.upper[j]);
        out.push((lower, node.upper.clone()));
    }
    out
}

/// Round indicators and lot counts of an integral relaxation solution.
fn snap_integral(model: &QpModel, x: &[f64]) -> Vec<f64> {
    let n = model.n_assets;
    let mut out = x.to_vec();
    for i in 0..n {
        if let Some(steps) = &model.lot_step {
            if steps[i] > 0.0 {
                out[i] = (out[i] / steps[i]).round() * steps[i];
            }
        }
        out[i] = out[i].max(0.0);
        if out[i] < 1e-9 {
            out[i] = 0.0;
        }
        if model.indicators {
            let z = out[n + i].round().clamp(0.0, 1.0);
            out[n + i] = if out[i] == 0.0 { 0.0 } else { z };
            if z == 0.0 {
                out[i] = 0.0;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizerConfig;
    use crate::formulation::{PortfolioProblem, ProblemSpec};
    use crate::market_data::{MarketSnapshot, Provenance};
    use crate::taxonomy::SectorTaxonomy;
    use rust_decimal_macros::dec;
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
            last_price: vec![13.0, 17.0, 23.0],
            valuation_ratio: vec![1.0; 3],
            cvar: vec![0.02; 3],
            total_capital: dec!(10000),
            benchmarks: vec![],
            provenance: Provenance::Synthetic,
            as_of: None,
        };
        PortfolioProblem::build(
            Arc::new(snapshot),
            &SectorTaxonomy::default(),
            &spec,
            &OptimizerConfig::default(),
        )
        .unwrap()
    }

    fn limits() -> SearchLimits {
        SearchLimits::from(&ExactConfig::default())
    }

    #[test]
    fn test_heap_pops_lowest_bound_first() {
        let mk = |bound: f64, depth: u32| Node {
            lower: vec![],
            upper: vec![],
            x: vec![],
            bound,
            depth,
        };
        let mut heap = BinaryHeap::new();
        heap.push(mk(3.0, 0));
        heap.push(mk(1.0, 0));
        heap.push(mk(1.0, 4));
        heap.push(mk(2.0, 1));
        let first = heap.pop().unwrap();
        assert_eq!((first.bound, first.depth), (1.0, 4));
        assert_eq!(heap.pop().unwrap().bound, 1.0);
        assert_eq!(heap.pop().unwrap().bound, 2.0);
    }

    #[test]
    fn test_integral_lots_and_indicators() {
        let mut spec = ProblemSpec::new(0.15, 10.0);
        spec.lot_size = Some(10.0);
        let p = problem(spec);
        let model = QpModel::build(&p, 200).unwrap();
        match search(&model, &limits(), None) {
            SearchOutcome::Optimal { incumbent, nodes, .. } => {
                assert!(nodes >= 1);
                let steps = model.lot_step.as_ref().unwrap();
                for i in 0..3 {
                    let lots = incumbent.x[i] / steps[i];
                    assert!((lots - lots.round()).abs() < 1e-6);
                    let z = incumbent.x[3 + i];
                    assert!(z == 0.0 || z == 1.0);
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_node_limit_without_proof() {
        let mut spec = ProblemSpec::new(0.15, 10.0);
        spec.lot_size = Some(10.0);
        spec.max_assets = Some(2);
        let p = problem(spec);
        let model = QpModel::build(&p, 200).unwrap();
        let tight = SearchLimits {
            node_limit: 1,
            ..limits()
        };
        assert!(matches!(
            search(&model, &tight, None),
            SearchOutcome::LimitReached { .. } | SearchOutcome::Optimal { .. }
        ));
    }

    #[test]
    fn test_children_split_lot_grid() {
        let node = Node {
            lower: vec![0.0],
            upper: vec![0.3],
            x: vec![0.15],
            bound: 0.0,
            depth: 0,
        };
        let branch = Branch {
            var: 0,
            value: 1.5,
            step: 0.1,
        };
        let kids = children(&node, &branch);
        assert_eq!(kids.len(), 2);
        assert!((kids[0].1[0] - 0.1).abs() < 1e-12);
        assert!((kids[1].0[0] - 0.2).abs() < 1e-12);
    }
}
