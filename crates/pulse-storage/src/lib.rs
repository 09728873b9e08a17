//! Storage engines for the metrics server.
//!
//! Two implementations of [`MetricStore`]: [`memory::MemoryStore`] keeps a
//! mutexed map with periodic JSON snapshots to a file, and
//! [`relational::SqlStore`] persists through SQLite upserts with a
//! transactional batch path and bounded retries.

pub mod error;
pub mod memory;
pub mod relational;
mod retry;


use async_trait::async_trait;
use pulse_common::types::Metric;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::{interval, Duration};

pub use error::{Result, StorageError};
pub use memory::MemoryStore;
pub use relational::SqlStore;

/// Persistence contract shared by both engines.
///
/// Implementations must be safe to share across tasks (`Send + Sync`): the
/// HTTP handlers, the gRPC service, and the backup ticker all hold the same
/// store.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Applies one update and returns the stored canonical form (counters
    /// accumulate, gauges replace).
    async fn update_metric(&self, metric: Metric) -> Result<Metric>;

    /// Applies a batch of updates. The relational engine runs the batch in
    /// a single transaction; per-item failures are aggregated without
    /// aborting the remaining items.
    async fn update_batch(&self, metrics: Vec<Metric>) -> Result<Vec<Metric>>;

    /// Looks a metric up by id. Backend errors on the read path map to
    /// `None`.
    async fn get_metric(&self, id: &str) -> Result<Option<Metric>>;

    /// All current values rendered as display strings, keyed by id.
    async fn get_metrics(&self) -> Result<BTreeMap<String, String>>;

    /// Backend liveness. The in-memory engine always reports
    /// [`StorageError::NoDatabase`].
    async fn ping(&self) -> Result<()>;

    /// Writes the current state to the snapshot file (no-op for the
    /// relational engine).
    async fn snapshot(&self) -> Result<()>;

    /// Final persistence before process exit.
    async fn shutdown(&self) -> Result<()>;
}

/// Picks the engine from the configuration: a non-empty DSN selects SQLite,
/// otherwise the in-memory engine backed by `store_file`.
pub fn open(database_dsn: &str, store_file: &str, restore: bool) -> Result<Arc<dyn MetricStore>> {
    if database_dsn.is_empty() {
        Ok(Arc::new(MemoryStore::new(store_file, restore)))
    } else {
        Ok(Arc::new(SqlStore::open(database_dsn)?))
    }
}

/// Periodic snapshot loop; runs until the owning task is aborted.
/// `interval_secs == 0` disables the ticker (snapshot only on shutdown).
pub async fn run_backup(store: Arc<dyn MetricStore>, interval_secs: u64) {
    if interval_secs == 0 {
        return;
    }
    let mut tick = interval(Duration::from_secs(interval_secs));
    tick.tick().await;
    loop {
        tick.tick().await;
        match store.snapshot().await {
            Ok(()) => tracing::debug!("periodic snapshot written"),
            Err(e) => tracing::warn!(error = %e, "periodic snapshot failed"),
        }
    }
}
