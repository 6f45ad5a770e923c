use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::time::Instant;

use super::repair::RepairPipeline;
use crate::config::GeneticConfig;
use crate::formulation::{PortfolioProblem, SolverDiagnostics, SolverKind, SolverResult};

/// Two individuals closer than this in every gene are duplicates.
const DUPLICATE_TOL: f64 = 1e-12;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Individual {
    genes: Vec<f64>,
    objective: f64,
    violation: f64,
}

impl Individual {
    fn evaluate(problem: &PortfolioProblem, genes: Vec<f64>) -> Self {
        let objective = problem.objective(&genes);
        let violation = problem.total_violation(&genes, 0.0);
        Self {
            genes,
            objective: if objective.is_finite() {
                objective
            } else {
                f64::INFINITY
            },
            violation,
        }
    }

    fn is_feasible(&self) -> bool {
        self.violation <= 0.0
    }

    fn same_genes(&self, other: &[f64]) -> bool {
        self.genes
            .iter()
            .zip(other.iter())
            .all(|(a, b)| (a - b).abs() <= DUPLICATE_TOL)
    }
}

/// Constraint domination: feasible before infeasible, then lower violation,
/// then lower objective.
fn dominance(a: &Individual, b: &Individual) -> Ordering {
    match (a.is_feasible(), b.is_feasible()) {
        (true, true) => a.objective.total_cmp(&b.objective),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a
            .violation
            .total_cmp(&b.violation)
            .then(a.objective.total_cmp(&b.objective)),
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Real-coded genetic search with whole-population repair after every
/// generation.
///
/// Returns `None` when no individual of the final population is feasible.
pub fn optimize(problem: &PortfolioProblem, config: &GeneticConfig) -> Option<SolverResult> {
    let start = Instant::now();
    let n = problem.n_assets();
    if n == 0 || config.population_size < 2 {
        tracing::warn!(n_assets = n, "genetic search skipped: nothing to optimize");
        return None;
    }

    let pipeline = RepairPipeline::for_problem(problem);
    let bounds = &problem.upper_bounds;
    let mutation_probability = config
        .mutation_probability
        .unwrap_or(1.0 / n as f64)
        .clamp(0.0, 1.0);
    let mut rng = StdRng::seed_from_u64(config.seed);

    let span = tracing::info_span!("genetic", n_assets = n, seed = config.seed);
    let _enter = span.enter();

    let mut population: Vec<Individual> = (0..config.population_size)
        .map(|_| {
            let mut genes: Vec<f64> = bounds
                .iter()
                .map(|&ub| if ub > 0.0 { rng.gen_range(0.0..=ub) } else { 0.0 })
                .collect();
            pipeline.apply(problem, &mut genes);
            Individual::evaluate(problem, genes)
        })
        .collect();
    population.sort_by(dominance);

    let mut history: Vec<f64> = Vec::new();
    let mut generations = 0;

    for generation in 0..config.max_generations {
        generations = generation + 1;
        let mut offspring: Vec<Individual> = Vec::with_capacity(config.population_size);
        let mut repaired = 0usize;
        let mut attempts = 0usize;
        let max_attempts = config.population_size * 10;

        while offspring.len() < config.population_size && attempts < max_attempts {
            attempts += 1;
            let p1 = tournament(&population, &mut rng);
            let p2 = tournament(&population, &mut rng);
            let (mut c1, mut c2) = if rng.gen::<f64>() < config.crossover_probability {
                simulated_binary_crossover(
                    &p1.genes,
                    &p2.genes,
                    bounds,
                    config.crossover_eta,
                    &mut rng,
                )
            } else {
                (p1.genes.clone(), p2.genes.clone())
            };

            for child in [&mut c1, &mut c2] {
                polynomial_mutation(
                    child.as_mut_slice(),
                    bounds,
                    config.mutation_eta,
                    mutation_probability,
                    &mut rng,
                );
                if pipeline.apply(problem, child.as_mut_slice()) {
                    repaired += 1;
                }
            }

            for child in [c1, c2] {
                if offspring.len() >= config.population_size {
                    break;
                }
                let duplicate = population.iter().any(|p| p.same_genes(&child))
                    || offspring.iter().any(|o| o.same_genes(&child));
                if !duplicate {
                    offspring.push(Individual::evaluate(problem, child));
                }
            }
        }

        population.extend(offspring);
        population.sort_by(dominance);
        population.truncate(config.population_size);

        let best = &population[0];
        if best.is_feasible() {
            history.push(best.objective);
        }
        if generation % 100 == 0 {
            tracing::debug!(
                generation,
                best_objective = best.objective,
                best_violation = best.violation,
                repaired,
                "genetic progress"
            );
        }

        let window = config.patience as usize;
        if window > 0 && history.len() > window {
            let earlier = history[history.len() - 1 - window];
            let latest = history[history.len() - 1];
            if (earlier - latest).abs() < config.ftol {
                tracing::debug!(generation, "objective stalled; stopping early");
                break;
            }
        }
    }

    let best = population.into_iter().next()?;
    let elapsed_us = start.elapsed().as_micros() as u64;
    if !best.is_feasible() {
        tracing::warn!(
            generations,
            violation = best.violation,
            "genetic search found no feasible portfolio"
        );
        return None;
    }

    let metrics = problem.evaluate(&best.genes);
    tracing::info!(
        generations,
        objective = metrics.objective,
        elapsed_us,
        "genetic search finished"
    );

    Some(SolverResult {
        solver: SolverKind::Genetic,
        weights: best.genes,
        lots: None,
        metrics,
        diagnostics: SolverDiagnostics {
            generations: Some(generations),
            elapsed_us,
            ..Default::default()
        },
    })
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// Binary tournament under constraint domination.
fn tournament<'a>(population: &'a [Individual], rng: &mut StdRng) -> &'a Individual {
    let a = &population[rng.gen_range(0..population.len())];
    let b = &population[rng.gen_range(0..population.len())];
    if dominance(a, b) == Ordering::Greater {
        b
    } else {
        a
    }
}

/// Simulated binary crossover on `[0, ub]` per gene.
fn simulated_binary_crossover(
    p1: &[f64],
    p2: &[f64],
    bounds: &[f64],
    eta: f64,
    rng: &mut StdRng,
) -> (Vec<f64>, Vec<f64>) {
    let mut c1 = p1.to_vec();
    let mut c2 = p2.to_vec();
    let exponent = 1.0 / (eta + 1.0);

    for i in 0..p1.len() {
        let ub = bounds[i];
        if ub <= 0.0 || rng.gen::<f64>() > 0.5 || (p1[i] - p2[i]).abs() < 1e-14 {
            continue;
        }
        let (y1, y2) = if p1[i] < p2[i] {
            (p1[i], p2[i])
        } else {
            (p2[i], p1[i])
        };
        let spread = y2 - y1;
        let u: f64 = rng.gen();

        let spread_factor = |beta: f64| {
            let alpha = 2.0 - beta.powf(-(eta + 1.0));
            if u <= 1.0 / alpha {
                (u * alpha).powf(exponent)
            } else {
                (1.0 / (2.0 - u * alpha)).powf(exponent)
            }
        };

        let beta_low = 1.0 + 2.0 * y1 / spread;
        let beta_high = 1.0 + 2.0 * (ub - y2) / spread;
        let low = (0.5 * ((y1 + y2) - spread_factor(beta_low) * spread)).clamp(0.0, ub);
        let high = (0.5 * ((y1 + y2) + spread_factor(beta_high) * spread)).clamp(0.0, ub);

        if rng.gen::<bool>() {
            c1[i] = high;
            c2[i] = low;
        } else {
            c1[i] = low;
            c2[i] = high;
        }
    }
    (c1, c2)
}

/// Polynomial mutation on `[0, ub]` per gene.
fn polynomial_mutation(
    genes: &mut [f64],
    bounds: &[f64],
    eta: f64,
    probability: f64,
    rng: &mut StdRng,
) {
    let exponent = 1.0 / (eta + 1.0);
    for (x, &ub) in genes.iter_mut().zip(bounds.iter()) {
        if ub <= 0.0 || rng.gen::<f64>() >= probability {
            continue;
        }
        let y = x.clamp(0.0, ub);
        let delta_low = y / ub;
        let delta_high = (ub - y) / ub;
        let u: f64 = rng.gen();
        let delta = if u < 0.5 {
            let base = 2.0 * u + (1.0 - 2.0 * u) * (1.0 - delta_low).powf(eta + 1.0);
            base.powf(exponent) - 1.0
        } else {
            let base = 2.0 * (1.0 - u) + 2.0 * (u - 0.5) * (1.0 - delta_high).powf(eta + 1.0);
            1.0 - base.powf(exponent)
        };
        *x = (y + delta * ub).clamp(0.0, ub);
    }
}
