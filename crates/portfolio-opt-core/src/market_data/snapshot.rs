use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::OptimizerError;
use crate::taxonomy::SectorTaxonomy;
use crate::OptimizerResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Where a snapshot's numbers came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Estimated from provider data fetched for this run.
    #[default]
    Live,
    /// Loaded from a previously persisted snapshot.
    FileCache,
    /// Generated; never to be presented as market data.
    Synthetic,
}

/// A benchmark index series (date, level).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkSeries {
    pub name: String,
    pub points: Vec<(NaiveDate, f64)>,
    pub provenance: Provenance,
}

/// Annualized inputs for one optimization run, co-indexed by `asset_names`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub asset_names: Vec<String>,
    /// Annualized expected returns per asset.
    pub expected_returns: Vec<f64>,
    /// N x N annualized covariance matrix.
    pub covariance: Vec<Vec<f64>>,
    /// Average traded financial volume per day.
    pub average_volume: Vec<f64>,
    pub last_price: Vec<f64>,
    /// Price-to-book-like valuation ratio.
    pub valuation_ratio: Vec<f64>,
    /// Historical CVaR (positive loss fraction).
    pub cvar: Vec<f64>,
    /// Total capital to invest.
    pub total_capital: Decimal,
    #[serde(default)]
    pub benchmarks: Vec<BenchmarkSeries>,
    #[serde(default)]
    pub provenance: Provenance,
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

/// Outcome of `MarketSnapshot::sanitize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizeReport {
    pub kept: usize,
    pub dropped: Vec<DroppedAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroppedAsset {
    pub name: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl MarketSnapshot {
    pub fn n_assets(&self) -> usize {
        self.asset_names.len()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.asset_names.iter().position(|a| a == name)
    }

    /// Check that every per-asset vector is co-indexed with the universe.
    pub fn validate_shape(&self) -> OptimizerResult<()> {
        let n = self.n_assets();
        if n == 0 {
            return Err(OptimizerError::InsufficientData(
                "At least one asset required".into(),
            ));
        }
        let vectors: [(&str, usize); 5] = [
            ("expected_returns", self.expected_returns.len()),
            ("average_volume", self.average_volume.len()),
            ("last_price", self.last_price.len()),
            ("valuation_ratio", self.valuation_ratio.len()),
            ("cvar", self.cvar.len()),
        ];
        for (field, len) in vectors {
            if len != n {
                return Err(OptimizerError::InvalidInput {
                    field: field.into(),
                    reason: format!("Expected {} values but got {}", n, len),
                });
            }
        }
        if self.covariance.len() != n {
            return Err(OptimizerError::InvalidInput {
                field: "covariance".into(),
                reason: format!("Expected {}x{} matrix but got {} rows", n, n, self.covariance.len()),
            });
        }
        for (i, row) in self.covariance.iter().enumerate() {
            if row.len() != n {
                return Err(OptimizerError::InvalidInput {
                    field: "covariance".into(),
                    reason: format!("Row {} has {} columns, expected {}", i, row.len(), n),
                });
            }
        }
        if self.total_capital < Decimal::ZERO {
            return Err(OptimizerError::InvalidInput {
                field: "total_capital".into(),
                reason: "Capital cannot be negative".into(),
            });
        }
        Ok(())
    }

    /// Drop every asset whose data is unusable, plus denylisted tickers.
    ///
    /// This is the only point at which the universe changes; afterwards all
    /// vectors stay co-indexed and immutable for the run.
    pub fn sanitize(&mut self, taxonomy: Option<&SectorTaxonomy>) -> OptimizerResult<SanitizeReport> {
        self.validate_shape()?;
        let n = self.n_assets();
        let mut dropped = Vec::new();
        let mut keep = vec![true; n];

        for i in 0..n {
            let reason = self.invalid_reason(i, taxonomy);
            if let Some(reason) = reason {
                keep[i] = false;
                dropped.push(DroppedAsset {
                    name: self.asset_names[i].clone(),
                    reason,
                });
            }
        }

        // A non-finite covariance entry poisons both assets; drop the asset
        // with the most bad entries first and re-check.
        loop {
            let worst = (0..n)
                .filter(|&i| keep[i])
                .map(|i| {
                    let bad = (0..n)
                        .filter(|&j| keep[j] && !self.covariance[i][j].is_finite())
                        .count();
                    (i, bad)
                })
                .filter(|(_, bad)| *bad > 0)
                .max_by_key(|(_, bad)| *bad);
            match worst {
                Some((i, bad)) => {
                    keep[i] = false;
                    dropped.push(DroppedAsset {
                        name: self.asset_names[i].clone(),
                        reason: format!("{} non-finite covariance entries", bad),
                    });
                }
                None => break,
            }
        }

        if !dropped.is_empty() {
            self.retain(&keep);
            tracing::info!(dropped = dropped.len(), kept = self.n_assets(), "sanitized market snapshot");
        }

        if self.n_assets() == 0 {
            return Err(OptimizerError::InsufficientData(
                "No assets left after removing invalid data".into(),
            ));
        }

        Ok(SanitizeReport {
            kept: self.n_assets(),
            dropped,
        })
    }

    fn invalid_reason(&self, i: usize, taxonomy: Option<&SectorTaxonomy>) -> Option<String> {
        if let Some(tax) = taxonomy {
            if tax.is_denylisted(&self.asset_names[i]) {
                return Some("denylisted".into());
            }
        }
        if !self.expected_returns[i].is_finite() {
            return Some("non-finite expected return".into());
        }
        let var = self.covariance[i][i];
        if !var.is_finite() || var < 0.0 {
            return Some("invalid variance".into());
        }
        if !self.last_price[i].is_finite() || self.last_price[i] <= 0.0 {
            return Some("invalid price".into());
        }
        if !self.valuation_ratio[i].is_finite() {
            return Some("non-finite valuation ratio".into());
        }
        if !self.cvar[i].is_finite() {
            return Some("non-finite CVaR".into());
        }
        if !self.average_volume[i].is_finite() || self.average_volume[i] < 0.0 {
            return Some("invalid average volume".into());
        }
        None
    }

    fn retain(&mut self, keep: &[bool]) {
        fn filter<T: Clone>(v: &[T], keep: &[bool]) -> Vec<T> {
            v.iter()
                .zip(keep.iter())
                .filter(|(_, k)| **k)
                .map(|(x, _)| x.clone())
                .collect()
        }
        self.asset_names = filter(&self.asset_names, keep);
        self.expected_returns = filter(&self.expected_returns, keep);
        self.average_volume = filter(&self.average_volume, keep);
        self.last_price = filter(&self.last_price, keep);
        self.valuation_ratio = filter(&self.valuation_ratio, keep);
        self.cvar = filter(&self.cvar, keep);
        self.covariance = filter(&self.covariance, keep)
            .iter()
            .map(|row| filter(row, keep))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
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
            cvar: vec![0.03; 3],
            total_capital: dec!(10000),
            benchmarks: vec![],
            provenance: Provenance::Synthetic,
            as_of: None,
        }
    }

    #[test]
    fn test_validate_shape_ok() {
        assert!(snapshot().validate_shape().is_ok());
    }

    #[test]
    fn test_validate_shape_mismatch() {
        let mut s = snapshot();
        s.cvar.pop();
        assert!(s.validate_shape().is_err());
    }

    #[test]
    fn test_sanitize_drops_nan_return() {
        let mut s = snapshot();
        s.expected_returns[1] = f64::NAN;
        let report = s.sanitize(None).unwrap();
        assert_eq!(report.kept, 2);
        assert_eq!(s.asset_names, vec!["A".to_string(), "C".to_string()]);
        assert_eq!(s.covariance.len(), 2);
        assert_eq!(s.covariance[1][1], 0.01);
    }

    #[test]
    fn test_sanitize_drops_worst_covariance_offender() {
        let mut s = snapshot();
        s.covariance[0][1] = f64::NAN;
        s.covariance[1][0] = f64::NAN;
        s.covariance[0][2] = f64::NAN;
        s.covariance[2][0] = f64::NAN;
        let report = s.sanitize(None).unwrap();
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].name, "A");
        assert_eq!(s.n_assets(), 2);
    }

    #[test]
    fn test_sanitize_everything_invalid() {
        let mut s = snapshot();
        s.last_price = vec![0.0; 3];
        assert!(s.sanitize(None).is_err());
    }
}
