use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;

use super::snapshot::MarketSnapshot;
use super::sources::{SnapshotRequest, SourceChain};
use crate::error::OptimizerError;
use crate::OptimizerResult;

/// Lifecycle of the cached snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum CacheStatus {
    Idle,
    Loading,
    Ready,
    Failed(String),
}

#[derive(Debug)]
struct CacheState {
    status: CacheStatus,
    snapshot: Option<Arc<MarketSnapshot>>,
}

/// Holds the most recent market snapshot.
///
/// Readers clone the `Arc` under the lock and release it at once, so solvers
/// never hold the lock while they run.
#[derive(Debug)]
pub struct SnapshotCache {
    state: RwLock<CacheState>,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState {
                status: CacheStatus::Idle,
                snapshot: None,
            }),
        }
    }

    pub fn get(&self) -> Option<Arc<MarketSnapshot>> {
        self.state.read().ok().and_then(|s| s.snapshot.clone())
    }

    pub fn status(&self) -> CacheStatus {
        self.state
            .read()
            .map(|s| s.status.clone())
            .unwrap_or_else(|_| CacheStatus::Failed("cache lock poisoned".into()))
    }

    pub fn put(&self, snapshot: MarketSnapshot) -> Arc<MarketSnapshot> {
        let snapshot = Arc::new(snapshot);
        if let Ok(mut s) = self.state.write() {
            s.snapshot = Some(snapshot.clone());
            s.status = CacheStatus::Ready;
        }
        snapshot
    }

    fn set_status(&self, status: CacheStatus) {
        if let Ok(mut s) = self.state.write() {
            s.status = status;
        }
    }

    /// Fetch through `chain` on the current thread and store the result.
    ///
    /// A failed refresh keeps the previous snapshot readable.
    pub fn refresh(
        &self,
        chain: &SourceChain,
        request: &SnapshotRequest,
    ) -> OptimizerResult<Arc<MarketSnapshot>> {
        self.set_status(CacheStatus::Loading);
        match chain.fetch(request) {
            Ok((snapshot, _)) => Ok(self.put(snapshot)),
            Err(e) => {
                tracing::error!(error = %e, "snapshot refresh failed");
                self.set_status(CacheStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Run `refresh` on tokio's blocking pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn refresh_async(
        self: &Arc<Self>,
        chain: Arc<SourceChain>,
        request: SnapshotRequest,
    ) -> JoinHandle<OptimizerResult<Arc<MarketSnapshot>>> {
        let cache = Arc::clone(self);
        self.set_status(CacheStatus::Loading);
        tokio::task::spawn_blocking(move || cache.refresh(&chain, &request))
    }
}

/// Await a background refresh, folding a panicked task into an error.
pub async fn await_refresh(
    handle: JoinHandle<OptimizerResult<Arc<MarketSnapshot>>>,
) -> OptimizerResult<Arc<MarketSnapshot>> {
    handle
        .await
        .map_err(|e| OptimizerError::DataUnavailable(format!("refresh task failed: {}", e)))?
}
