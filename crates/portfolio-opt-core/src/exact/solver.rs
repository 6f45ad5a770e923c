use std::time::Instant;

use super::branch_bound::{search, Incumbent, SearchLimits, SearchOutcome};
use super::relaxation::QpModel;
use crate::config::ExactConfig;
use crate::formulation::{
    PortfolioProblem, SolverDiagnostics, SolverKind, SolverResult, FEASIBILITY_TOL, ZERO_WEIGHT,
};
use crate::metaheuristic::{RepairPipeline, RepairStep};

/// Slack, in lots, absorbed when reading a solver weight off the lot grid.
const LOT_TOLERANCE: f64 = 1e-6;

/// Solve the portfolio MIQP, optionally seeded with a known portfolio.
///
/// A feasible warm start becomes the first incumbent of the search; an
/// infeasible one is ignored. Returns `None` when the model is infeasible,
/// a relaxation fails numerically, or a limit stops the search before the
/// gap closes.
pub fn optimize(
    problem: &PortfolioProblem,
    warm_start: Option<&[f64]>,
    config: &ExactConfig,
) -> Option<SolverResult> {
    let start = Instant::now();
    let solver = if warm_start.is_some() {
        SolverKind::ExactWarm
    } else {
        SolverKind::ExactCold
    };
    let span = tracing::info_span!("exact", solver = ?solver, n_assets = problem.n_assets());
    let _enter = span.enter();

    let model = match QpModel::build(problem, config.max_iter) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "could not build QP model");
            return None;
        }
    };

    let warm = warm_start.and_then(|w| seed_incumbent(problem, &model, w));
    let warm_start_used = warm.is_some();

    let (incumbent, best_bound, nodes) = match search(&model, &SearchLimits::from(config), warm) {
        SearchOutcome::Optimal {
            incumbent,
            best_bound,
            nodes,
        } => (incumbent, best_bound, nodes),
        SearchOutcome::Infeasible { nodes } => {
            tracing::warn!(nodes, "exact model infeasible");
            return None;
        }
        SearchOutcome::LimitReached { incumbent, nodes } => {
            tracing::warn!(
                nodes,
                has_incumbent = incumbent.is_some(),
                "exact search stopped before proving optimality"
            );
            return None;
        }
        SearchOutcome::Failed(detail) => {
            tracing::error!(%detail, "QP relaxation failed");
            return None;
        }
    };

    let n = model.n_assets;
    let mut weights = incumbent.x[..n].to_vec();
    if correct_caps(problem, &mut weights) {
        tracing::debug!("post-solve correction adjusted the solver output");
    }
    let lots = model
        .lot_step
        .as_ref()
        .map(|steps| snap_to_lots(problem, steps, &mut weights));
    let remaining = problem.violations_with_entry(&weights, FEASIBILITY_TOL);
    if !remaining.is_empty() {
        tracing::warn!(violations = ?remaining, "exact solution outside tolerance after correction");
    }

    let metrics = problem.evaluate(&weights);
    let elapsed_us = start.elapsed().as_micros() as u64;
    tracing::info!(
        nodes,
        objective = metrics.objective,
        warm_start_used,
        elapsed_us,
        "exact search finished"
    );

    Some(SolverResult {
        solver,
        weights,
        lots,
        metrics,
        diagnostics: SolverDiagnostics {
            generations: None,
            nodes_explored: Some(nodes),
            best_bound: Some(best_bound),
            warm_start_used,
            elapsed_us,
        },
    })
}

/// Translate a weight vector into a model point and admit it as incumbent
/// when feasible.
///
/// Each weight is clipped to its bound and floored to whole lots; its
/// indicator is set only when the result clears the minimum entry, otherwise
/// both are zero.
fn seed_incumbent(problem: &PortfolioProblem, model: &QpModel, warm: &[f64]) -> Option<Incumbent> {
    let n = model.n_assets;
    if warm.len() != n {
        tracing::warn!(expected = n, got = warm.len(), "warm start has the wrong length; ignored");
        return None;
    }

    let mut x = vec![0.0; model.n_vars];
    for i in 0..n {
        if model.pinned[i] || !warm[i].is_finite() {
            continue;
        }
        let mut v = warm[i].clamp(0.0, model.weight_caps[i]);
        if let Some(steps) = &model.lot_step {
            if steps[i] > 0.0 {
                v = (v / steps[i] + 1e-9).floor() * steps[i];
            }
        }
        if v > ZERO_WEIGHT && v >= model.entry[i] - 1e-12 {
            x[i] = v;
            if model.indicators {
                x[n + i] = 1.0;
            }
        }
    }

    let violations = problem.violations_with_entry(&x[..n], FEASIBILITY_TOL);
    if !violations.is_empty() {
        tracing::debug!(count = violations.len(), "warm start infeasible; searching without it");
        return None;
    }
    let objective = model.objective_of(&x);
    tracing::debug!(objective, "warm start admitted as incumbent");
    Some(Incumbent { x, objective })
}

/// Clip to the effective caps, rescale over-cap sectors and the budget,
/// and zero numerical residue. Returns whether anything changed.
fn correct_caps(problem: &PortfolioProblem, weights: &mut [f64]) -> bool {
    let mut steps = vec![
        RepairStep::ZeroNonFinite,
        RepairStep::ClipToBounds,
        RepairStep::ScaleBudget,
    ];
    if let Some(cap) = problem.sector_cap {
        steps.push(RepairStep::ScaleSectors { cap });
    }
    steps.push(RepairStep::RemoveDust {
        threshold: ZERO_WEIGHT,
    });
    RepairPipeline::new(steps).apply(problem, weights)
}

/// Floor each weight onto its lot grid and return the lot counts, so the
/// reported lots and weights agree after any correction. A position left
/// below its minimum entry is closed.
fn snap_to_lots(problem: &PortfolioProblem, steps: &[f64], weights: &mut [f64]) -> Vec<u64> {
    weights
        .iter_mut()
        .zip(steps.iter())
        .enumerate()
        .map(|(i, (w, &step))| {
            if step <= 0.0 {
                return 0;
            }
            let count = (*w / step + LOT_TOLERANCE).floor().max(0.0);
            *w = count * step;
            if *w > ZERO_WEIGHT && *w < problem.min_entry[i] - FEASIBILITY_TOL {
                *w = 0.0;
                return 0;
            }
            count as u64
        })
        .collect()
}
