use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};

use super::snapshot::{BenchmarkSeries, MarketSnapshot, Provenance, SanitizeReport};
use crate::error::OptimizerError;
use crate::linalg::sample_covariance;
use crate::taxonomy::SectorTaxonomy;
use crate::OptimizerResult;

/// Trading days per year used to annualize daily statistics.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Tail probability for the historical CVaR estimate.
pub const CVAR_ALPHA: f64 = 0.05;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Daily close and traded quantity for one asset, aligned with `PriceHistory::dates`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetHistory {
    pub name: String,
    pub close: Vec<Option<f64>>,
    #[serde(default)]
    pub volume: Vec<Option<f64>>,
    /// Latest price-to-book-like ratio; neutral 1.0 when unknown.
    #[serde(default)]
    pub valuation_ratio: Option<f64>,
}

/// Raw provider data for a historical window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistory {
    pub dates: Vec<NaiveDate>,
    pub assets: Vec<AssetHistory>,
    #[serde(default)]
    pub benchmarks: Vec<BenchmarkSeries>,
    pub total_capital: Decimal,
    #[serde(default)]
    pub provenance: Provenance,
}

/// Snapshot plus the assets that were removed while building it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatedSnapshot {
    pub snapshot: MarketSnapshot,
    pub report: SanitizeReport,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Turn a daily price history into an annualized, sanitized snapshot.
///
/// Missing closes are forward- then back-filled; a date is dropped when any
/// asset's return on it is not finite.
pub fn estimate_snapshot(
    history: &PriceHistory,
    taxonomy: Option<&SectorTaxonomy>,
) -> OptimizerResult<EstimatedSnapshot> {
    let t = history.dates.len();
    if t < 3 {
        return Err(OptimizerError::InsufficientData(format!(
            "At least 3 dates required, got {}",
            t
        )));
    }

    let mut names = Vec::new();
    let mut closes: Vec<Vec<f64>> = Vec::new();
    let mut volumes: Vec<f64> = Vec::new();
    let mut valuation: Vec<f64> = Vec::new();

    for asset in &history.assets {
        if asset.close.len() != t {
            return Err(OptimizerError::InvalidInput {
                field: format!("assets[{}].close", asset.name),
                reason: format!("Expected {} closes but got {}", t, asset.close.len()),
            });
        }
        let Some(filled) = fill_gaps(&asset.close) else {
            tracing::debug!(asset = %asset.name, "no usable closes, skipping");
            continue;
        };
        volumes.push(average_financial_volume(&filled, &asset.volume));
        valuation.push(asset.valuation_ratio.unwrap_or(1.0));
        names.push(asset.name.trim().to_string());
        closes.push(filled);
    }

    if names.is_empty() {
        return Err(OptimizerError::DataUnavailable(
            "No asset has usable price data".into(),
        ));
    }

    let returns = aligned_returns(&closes);
    if returns.first().map_or(0, |r| r.len()) < 2 {
        return Err(OptimizerError::InsufficientData(
            "Fewer than 2 usable return observations".into(),
        ));
    }

    let n = names.len();
    let expected_returns: Vec<f64> = returns
        .iter()
        .map(|r| r.iter().sum::<f64>() / r.len() as f64 * TRADING_DAYS_PER_YEAR)
        .collect();
    let mut covariance = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let c = sample_covariance(&returns[i], &returns[j]) * TRADING_DAYS_PER_YEAR;
            covariance[i][j] = c;
            covariance[j][i] = c;
        }
    }
    let cvar: Vec<f64> = returns.iter().map(|r| historical_cvar(r, CVAR_ALPHA)).collect();
    let last_price: Vec<f64> = closes.iter().map(|c| *c.last().unwrap_or(&f64::NAN)).collect();

    let mut snapshot = MarketSnapshot {
        asset_names: names,
        expected_returns,
        covariance,
        average_volume: volumes,
        last_price,
        valuation_ratio: valuation,
        cvar,
        total_capital: history.total_capital,
        benchmarks: history.benchmarks.clone(),
        provenance: history.provenance,
        as_of: history.dates.last().copied(),
    };
    let report = snapshot.sanitize(taxonomy)?;

    Ok(EstimatedSnapshot { snapshot, report })
}

/// Historical CVaR: mean loss of the returns at or below the `alpha` quantile,
/// reported as a positive fraction (0 when the tail holds no losses).
pub fn historical_cvar(returns: &[f64], alpha: f64) -> f64 {
    let finite: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    let mut data = Data::new(finite.clone());
    let var = data.quantile(alpha);
    let tail: Vec<f64> = finite.into_iter().filter(|r| *r <= var).collect();
    if tail.is_empty() {
        return 0.0;
    }
    let mean_tail = tail.iter().sum::<f64>() / tail.len() as f64;
    (-mean_tail).max(0.0)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Forward-fill then back-fill; `None` when no value is present.
fn fill_gaps(series: &[Option<f64>]) -> Option<Vec<f64>> {
    let valid = |v: &Option<f64>| v.filter(|x| x.is_finite());
    let first = series.iter().find_map(valid)?;
    let mut last = first;
    Some(
        series
            .iter()
            .map(|v| {
                if let Some(x) = valid(v) {
                    last = x;
                }
                last
            })
            .collect(),
    )
}

/// Per-asset daily returns over the dates where every asset has a finite return.
fn aligned_returns(closes: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let t = closes.first().map_or(0, |c| c.len());
    let raw: Vec<Vec<f64>> = closes
        .iter()
        .map(|c| (1..t).map(|k| c[k] / c[k - 1] - 1.0).collect())
        .collect();
    let usable: Vec<usize> = (0..t.saturating_sub(1))
        .filter(|&k| raw.iter().all(|r| r[k].is_finite()))
        .collect();
    raw.iter()
        .map(|r| usable.iter().map(|&k| r[k]).collect())
        .collect()
}

/// Mean of close * quantity over the days both are known.
fn average_financial_volume(closes: &[f64], volume: &[Option<f64>]) -> f64 {
    let traded: Vec<f64> = closes
        .iter()
        .zip(volume.iter())
        .filter_map(|(c, v)| v.filter(|x| x.is_finite()).map(|x| c * x))
        .collect();
    if traded.is_empty() {
        0.0
    } else {
        traded.iter().sum::<f64>() / traded.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n).map(|i| start + chrono::Duration::days(i as i64)).collect()
    }

    #[test]
    fn test_fill_gaps() {
        let s = [None, Some(2.0), None, Some(4.0)];
        assert_eq!(fill_gaps(&s).unwrap(), vec![2.0, 2.0, 2.0, 4.0]);
        assert!(fill_gaps(&[None, None]).is_none());
    }

    #[test]
    fn test_historical_cvar_positive_loss() {
        let r: Vec<f64> = (0..100).map(|i| (i as f64 - 50.0) / 1000.0).collect();
        let cvar = historical_cvar(&r, 0.05);
        assert!(cvar > 0.04 && cvar < 0.06, "cvar {}", cvar);
    }

    #[test]
    fn test_estimate_constant_growth() {
        let t = 10;
        let grow: Vec<Option<f64>> = (0..t).map(|k| Some(100.0 * 1.01_f64.powi(k as i32))).collect();
        let wobble: Vec<Option<f64>> = (0..t)
            .map(|k| Some(if k % 2 == 0 { 50.0 } else { 51.0 }))
            .collect();
        let history = PriceHistory {
            dates: dates(t),
            assets: vec![
                AssetHistory {
                    name: "GROW".into(),
                    close: grow,
                    volume: vec![Some(1000.0); t],
                    valuation_ratio: Some(2.0),
                },
                AssetHistory {
                    name: "WOBB".into(),
                    close: wobble,
                    volume: vec![],
                    valuation_ratio: None,
                },
            ],
            benchmarks: vec![],
            total_capital: dec!(10000),
            provenance: Provenance::Live,
        };
        let est = estimate_snapshot(&history, None).unwrap();
        let s = &est.snapshot;
        assert_eq!(s.n_assets(), 2);
        assert!((s.expected_returns[0] - 0.01 * 252.0).abs() < 1e-9);
        assert!(s.covariance[0][0].abs() < 1e-12);
        assert_eq!(s.average_volume[1], 0.0);
        assert_eq!(s.valuation_ratio[1], 1.0);
        assert_eq!(s.as_of, history.dates.last().copied());
    }

    #[test]
    fn test_estimate_too_short() {
        let history = PriceHistory {
            dates: dates(2),
            assets: vec![],
            benchmarks: vec![],
            total_capital: dec!(1),
            provenance: Provenance::Live,
        };
        assert!(estimate_snapshot(&history, None).is_err());
    }
}
