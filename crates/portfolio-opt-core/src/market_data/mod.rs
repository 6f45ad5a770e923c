//! Market-data plumbing consumed by the optimizer: snapshot model, estimation
//! from raw price history, the source fallback chain and the snapshot cache.

pub mod snapshot;

#[cfg(feature = "market_data")]
pub mod cache;

#[cfg(feature = "market_data")]
pub mod estimation;

#[cfg(feature = "market_data")]
pub mod sources;

pub use snapshot::{MarketSnapshot, Provenance};
