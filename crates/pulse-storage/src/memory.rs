//! In-memory engine with JSON file snapshots.

use crate::error::{Result, StorageError};
use crate::MetricStore;
use async_trait::async_trait;
use pulse_common::types::{Metric, MetricValue};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub struct MemoryStore {
    db: Mutex<HashMap<String, Metric>>,
    store_file: PathBuf,
}

impl MemoryStore {
    /// Creates the store, optionally restoring state from the snapshot
    /// file. A missing or unparsable snapshot yields an empty store.
    pub fn new(store_file: impl Into<PathBuf>, restore: bool) -> Self {
        let store_file = store_file.into();
        let db = if restore {
            restore_from(&store_file)
        } else {
            HashMap::new()
        };
        Self {
            db: Mutex::new(db),
            store_file,
        }
    }

    /// Lock the map, recovering from a poisoned Mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Metric>> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_snapshot(&self) -> Result<()> {
        let data = {
            let db = self.lock();
            serde_json::to_vec(&*db)?
        };
        std::fs::write(&self.store_file, data)?;
        tracing::info!(path = %self.store_file.display(), "snapshot written");
        Ok(())
    }
}

fn restore_from(path: &Path) -> HashMap<String, Metric> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            tracing::info!(path = %path.display(), error = %e, "no snapshot to restore, starting empty");
            return HashMap::new();
        }
    };
    match serde_json::from_slice(&data) {
        Ok(db) => {
            tracing::info!(path = %path.display(), "state restored from snapshot");
            db
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unable to parse snapshot, starting empty");
            HashMap::new()
        }
    }
}

/// Merge rule shared by the single and batch paths: gauges replace, counters
/// accumulate, and the kind an id was first stored with is sticky.
fn apply(db: &mut HashMap<String, Metric>, metric: Metric) -> Result<Metric> {
    if let Some(existing) = db.get(&metric.id) {
        if existing.kind() != metric.kind() {
            return Err(StorageError::KindMismatch {
                id: metric.id,
                existing: existing.kind(),
            });
        }
    }

    let stored = match metric.value {
        MetricValue::Gauge(_) => metric,
        MetricValue::Counter(delta) => {
            let previous = match db.get(&metric.id) {
                Some(Metric {
                    value: MetricValue::Counter(d),
                    ..
                }) => *d,
                _ => 0,
            };
            Metric::counter(metric.id, previous + delta)
        }
    };
    db.insert(stored.id.clone(), stored.clone());
    Ok(stored)
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn update_metric(&self, metric: Metric) -> Result<Metric> {
        let mut db = self.lock();
        apply(&mut db, metric)
    }

    async fn update_batch(&self, metrics: Vec<Metric>) -> Result<Vec<Metric>> {
        let mut db = self.lock();
        let mut stored = Vec::with_capacity(metrics.len());
        let mut errors = Vec::new();
        for metric in metrics {
            match apply(&mut db, metric) {
                Ok(m) => stored.push(m),
                Err(e) => errors.push(e),
            }
        }
        if errors.is_empty() {
            Ok(stored)
        } else {
            Err(StorageError::batch(errors))
        }
    }

    async fn get_metric(&self, id: &str) -> Result<Option<Metric>> {
        Ok(self.lock().get(id).cloned())
    }

    async fn get_metrics(&self) -> Result<BTreeMap<String, String>> {
        let db = self.lock();
        Ok(db
            .iter()
            .map(|(id, metric)| {
                let rendered = match metric.value {
                    MetricValue::Gauge(v) => format!("{v:.6}"),
                    MetricValue::Counter(d) => format!("{d}"),
                };
                (id.clone(), rendered)
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Err(StorageError::NoDatabase)
    }

    async fn snapshot(&self) -> Result<()> {
        self.write_snapshot()
    }

    async fn shutdown(&self) -> Result<()> {
        tracing::info!("backing up storage before shutdown");
        self.write_snapshot()
    }
}
