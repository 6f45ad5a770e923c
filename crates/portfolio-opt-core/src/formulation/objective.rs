use serde::{Deserialize, Serialize};

use super::problem::PortfolioProblem;
use crate::linalg::{dot, quad_form};

/// Derived measures of one candidate portfolio. A pure function of the
/// weights and the fixed problem.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    /// Annualized variance w' Sigma w.
    pub variance: f64,
    /// Annualized volatility, sqrt of the variance.
    pub volatility: f64,
    /// Annualized expected return w . mu.
    pub expected_return: f64,
    /// w . valuation_ratio
    pub valuation_exposure: f64,
    /// w . cvar
    pub cvar_exposure: f64,
    /// Sum of weights.
    pub invested: f64,
    /// max(0, 1 - invested)
    pub cash: f64,
    pub cash_penalty: f64,
    /// Scalarized objective (minimized).
    pub objective: f64,
}

impl PortfolioProblem {
    /// Scalarized objective:
    /// `lambda*var - ret + w_val*val + w_cvar*cvar + w_cash*max(0, 1 - sum)`.
    pub fn evaluate(&self, weights: &[f64]) -> PortfolioMetrics {
        let s = &self.snapshot;
        let variance = quad_form(weights, &s.covariance);
        let expected_return = dot(weights, &s.expected_returns);
        let valuation_exposure = dot(weights, &s.valuation_ratio);
        let cvar_exposure = dot(weights, &s.cvar);
        let invested: f64 = weights.iter().sum();
        let cash = (1.0 - invested).max(0.0);
        let cash_penalty = self.penalties.cash * cash;

        let objective = self.risk_aversion * variance - expected_return
            + self.penalties.valuation * valuation_exposure
            + self.penalties.cvar * cvar_exposure
            + cash_penalty;

        PortfolioMetrics {
            variance,
            volatility: variance.max(0.0).sqrt(),
            expected_return,
            valuation_exposure,
            cvar_exposure,
            invested,
            cash,
            cash_penalty,
            objective,
        }
    }

    /// Objective value only.
    pub fn objective(&self, weights: &[f64]) -> f64 {
        self.evaluate(weights).objective
    }
}
