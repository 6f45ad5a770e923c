use clap::Args;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;

use portfolio_opt_core::market_data::sources::{
    FileSource, SnapshotRequest, SourceAttempt, SourceChain, SyntheticSource,
};
use portfolio_opt_core::market_data::{MarketSnapshot, Provenance};
use portfolio_opt_core::taxonomy::SectorTaxonomy;
use portfolio_opt_core::with_metadata;

use crate::input;

/// Arguments for snapshot preparation
#[derive(Args)]
pub struct PrepareArgs {
    /// Price history or persisted snapshot (JSON)
    #[arg(long)]
    pub history: Option<String>,

    /// Sector taxonomy file (JSON); defines the synthetic universe
    #[arg(long)]
    pub taxonomy: Option<String>,

    /// Total capital to invest
    #[arg(long, default_value = "100000")]
    pub capital: Decimal,

    /// Fall back to generated prices when no file source succeeds
    #[arg(long)]
    pub synthetic: bool,

    /// Seed of the synthetic generator
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Trading days of synthetic history
    #[arg(long, default_value = "252")]
    pub days: usize,
}

#[derive(Debug, Serialize)]
struct PreparedSnapshot {
    provenance: Provenance,
    attempts: Vec<SourceAttempt>,
    snapshot: MarketSnapshot,
}

pub fn run_prepare(args: PrepareArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let taxonomy: Option<SectorTaxonomy> = match &args.taxonomy {
        Some(path) => Some(input::file::read_json(path)?),
        None => None,
    };

    let mut chain = SourceChain::new();
    if let Some(path) = &args.history {
        chain = chain.with_source(FileSource::new(path));
    }
    if args.synthetic {
        chain = chain.with_source(SyntheticSource {
            seed: args.seed,
            days: args.days,
            ..Default::default()
        });
    }
    if chain.is_empty() {
        return Err("Nothing to prepare from: pass --history <file> and/or --synthetic".into());
    }

    let request = SnapshotRequest {
        total_capital: args.capital,
        taxonomy,
    };
    let (snapshot, attempts) = chain.fetch(&request)?;

    let mut warnings = Vec::new();
    if snapshot.provenance == Provenance::Synthetic {
        warnings.push("Snapshot is synthetic; do not present it as market data".to_string());
    }
    for failed in attempts.iter().filter(|a| !a.succeeded) {
        warnings.push(format!(
            "Source '{}' unavailable: {}",
            failed.source,
            failed.reason.as_deref().unwrap_or("unknown")
        ));
    }

    let assumptions = serde_json::json!({
        "sources": attempts.iter().map(|a| a.source.as_str()).collect::<Vec<_>>(),
        "total_capital": args.capital,
        "annualization_days": 252,
    });
    let output = PreparedSnapshot {
        provenance: snapshot.provenance,
        attempts,
        snapshot,
    };
    let elapsed = start.elapsed().as_micros() as u64;
    Ok(serde_json::to_value(with_metadata(
        "Annualized mean/covariance from daily returns; historical 95% CVaR",
        &assumptions,
        warnings,
        elapsed,
        output,
    ))?)
}
