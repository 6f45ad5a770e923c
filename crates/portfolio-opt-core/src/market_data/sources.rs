use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;
use std::path::PathBuf;

use super::estimation::{estimate_snapshot, AssetHistory, PriceHistory};
use super::snapshot::{MarketSnapshot, Provenance};
use crate::error::OptimizerError;
use crate::taxonomy::SectorTaxonomy;
use crate::OptimizerResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What a caller wants a snapshot for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRequest {
    pub total_capital: Decimal,
    #[serde(default)]
    pub taxonomy: Option<SectorTaxonomy>,
}

/// Result of asking one source.
#[derive(Debug, Clone)]
pub enum SourceOutcome {
    Success(MarketSnapshot),
    Unavailable(String),
}

/// One tier of the market-data fallback chain.
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &str;
    fn fetch(&self, request: &SnapshotRequest) -> SourceOutcome;
}

/// One line of the chain's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAttempt {
    pub source: String,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Sources tried in order; the first success wins.
#[derive(Default)]
pub struct SourceChain {
    sources: Vec<Box<dyn MarketDataSource>>,
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

impl SourceChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl MarketDataSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Try each source in turn. The returned snapshot keeps the provenance
    /// its source tagged it with.
    pub fn fetch(
        &self,
        request: &SnapshotRequest,
    ) -> OptimizerResult<(MarketSnapshot, Vec<SourceAttempt>)> {
        let mut attempts = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            match source.fetch(request) {
                SourceOutcome::Success(snapshot) => {
                    tracing::info!(
                        source = source.name(),
                        provenance = ?snapshot.provenance,
                        assets = snapshot.n_assets(),
                        "market data source succeeded"
                    );
                    attempts.push(SourceAttempt {
                        source: source.name().to_string(),
                        succeeded: true,
                        reason: None,
                    });
                    return Ok((snapshot, attempts));
                }
                SourceOutcome::Unavailable(reason) => {
                    tracing::warn!(source = source.name(), %reason, "market data source unavailable");
                    attempts.push(SourceAttempt {
                        source: source.name().to_string(),
                        succeeded: false,
                        reason: Some(reason),
                    });
                }
            }
        }
        let summary: Vec<String> = attempts
            .iter()
            .map(|a| format!("{}: {}", a.source, a.reason.as_deref().unwrap_or("?")))
            .collect();
        Err(OptimizerError::DataUnavailable(if summary.is_empty() {
            "no market data sources configured".into()
        } else {
            summary.join("; ")
        }))
    }
}

// ---------------------------------------------------------------------------
// File source
// ---------------------------------------------------------------------------

/// Reads a persisted snapshot (or a raw price history) from a JSON file.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self, request: &SnapshotRequest) -> OptimizerResult<MarketSnapshot> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            OptimizerError::DataUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        let value: serde_json::Value = serde_json::from_str(&contents)?;
        let mut snapshot = if value.get("dates").is_some() {
            let history: PriceHistory = serde_json::from_value(value)?;
            estimate_snapshot(&history, request.taxonomy.as_ref())?.snapshot
        } else {
            let mut s: MarketSnapshot = serde_json::from_value(value)?;
            s.sanitize(request.taxonomy.as_ref())?;
            s
        };
        snapshot.total_capital = request.total_capital;
        snapshot.provenance = Provenance::FileCache;
        Ok(snapshot)
    }
}

impl MarketDataSource for FileSource {
    fn name(&self) -> &str {
        "file"
    }

    fn fetch(&self, request: &SnapshotRequest) -> SourceOutcome {
        match self.load(request) {
            Ok(s) => SourceOutcome::Success(s),
            Err(e) => SourceOutcome::Unavailable(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Synthetic source
// ---------------------------------------------------------------------------

/// Generates random-walk prices for the taxonomy universe. Always tagged
/// `Provenance::Synthetic`.
pub struct SyntheticSource {
    pub seed: u64,
    pub days: usize,
    pub start: NaiveDate,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self {
            seed: 42,
            days: 252,
            start: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap_or_default(),
        }
    }
}

impl SyntheticSource {
    fn generate(&self, request: &SnapshotRequest) -> OptimizerResult<MarketSnapshot> {
        use rand::distributions::Distribution;

        let universe = request
            .taxonomy
            .as_ref()
            .map(|t| t.universe())
            .unwrap_or_default();
        if universe.is_empty() {
            return Err(OptimizerError::InsufficientData(
                "synthetic data needs a taxonomy universe".into(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let dates: Vec<NaiveDate> = (0..self.days)
            .map(|d| self.start + chrono::Duration::days(d as i64))
            .collect();
        let assets = universe
            .iter()
            .enumerate()
            .map(|(k, name)| -> OptimizerResult<AssetHistory> {
                let drift = 0.0002 + 0.0001 * (k % 7) as f64;
                let vol = 0.008 + 0.002 * (k % 5) as f64;
                let shock = Normal::new(drift, vol).map_err(|e| {
                    OptimizerError::InvalidInput {
                        field: "synthetic".into(),
                        reason: e.to_string(),
                    }
                })?;
                let mut price = 10.0 + k as f64;
                let close = (0..self.days)
                    .map(|_| {
                        price *= 1.0 + shock.sample(&mut rng);
                        Some(price)
                    })
                    .collect();
                Ok(AssetHistory {
                    name: name.clone(),
                    close,
                    volume: vec![Some(1.0e6); self.days],
                    valuation_ratio: Some(1.0 + 0.1 * (k % 10) as f64),
                })
            })
            .collect::<OptimizerResult<Vec<_>>>()?;

        let history = PriceHistory {
            dates,
            assets,
            benchmarks: vec![],
            total_capital: request.total_capital,
            provenance: Provenance::Synthetic,
        };
        Ok(estimate_snapshot(&history, request.taxonomy.as_ref())?.snapshot)
    }
}

impl MarketDataSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch(&self, request: &SnapshotRequest) -> SourceOutcome {
        match self.generate(request) {
            Ok(s) => SourceOutcome::Success(s),
            Err(e) => SourceOutcome::Unavailable(e.to_string()),
        }
    }
}
