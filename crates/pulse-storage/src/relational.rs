//! SQLite engine: single-row upserts with `RETURNING`, a transactional batch
//! path with prepared statements, and bounded retries around every call.

use crate::error::{Result, StorageError};
use crate::{retry, MetricStore};
use async_trait::async_trait;
use pulse_common::types::{Metric, MetricKind, MetricValue};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SQL_CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS metrics (
    id TEXT PRIMARY KEY,
    mtype TEXT NOT NULL DEFAULT '',
    delta INTEGER,
    value REAL
)";

const SQL_UPDATE_GAUGE: &str = "INSERT INTO metrics (id, mtype, value)
    VALUES (?1, 'gauge', ?2)
    ON CONFLICT (id) DO UPDATE SET value = excluded.value
    RETURNING id, value";

const SQL_UPDATE_COUNTER: &str = "INSERT INTO metrics (id, mtype, delta)
    VALUES (?1, 'counter', ?2)
    ON CONFLICT (id) DO UPDATE SET delta = excluded.delta + metrics.delta
    RETURNING id, delta";

const SQL_GET_KIND: &str = "SELECT mtype FROM metrics WHERE id = ?1";

const SQL_GET_METRIC: &str = "SELECT id, mtype, delta, value FROM metrics WHERE id = ?1";

const SQL_GET_METRICS: &str = "SELECT id, mtype, delta, value FROM metrics";

/// Per-query deadline, expressed as the SQLite busy timeout.
const CALL_TIMEOUT: Duration = Duration::from_secs(3);
const PING_TIMEOUT: Duration = Duration::from_secs(1);

pub struct SqlStore {
    conn: Mutex<Connection>,
}

impl SqlStore {
    /// Opens (or creates) the database and ensures the metrics table exists.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(CALL_TIMEOUT)?;
        conn.execute(SQL_CREATE_TABLE, [])?;
        tracing::info!(path, "database connected");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The kind an id was first ingested with is sticky; re-ingesting it
    /// with the other kind is a client error.
    fn check_kind(conn: &Connection, metric: &Metric) -> Result<()> {
        let existing: Option<String> = conn
            .query_row(SQL_GET_KIND, params![metric.id], |row| row.get(0))
            .optional()?;
        match existing {
            Some(mtype) if mtype != metric.kind().to_string() => {
                let existing = mtype.parse().unwrap_or(MetricKind::Gauge);
                Err(StorageError::KindMismatch {
                    id: metric.id.clone(),
                    existing,
                })
            }
            _ => Ok(()),
        }
    }

    fn upsert(conn: &Connection, metric: &Metric) -> Result<Metric> {
        Self::check_kind(conn, metric)?;
        match metric.value {
            MetricValue::Gauge(v) => {
                let (id, value): (String, f64) =
                    conn.query_row(SQL_UPDATE_GAUGE, params![metric.id, v], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?;
                Ok(Metric::gauge(id, value))
            }
            MetricValue::Counter(d) => {
                let (id, delta): (String, i64) =
                    conn.query_row(SQL_UPDATE_COUNTER, params![metric.id, d], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?;
                Ok(Metric::counter(id, delta))
            }
        }
    }

    fn upsert_batch(conn: &Connection, metrics: &[Metric]) -> Result<Vec<Metric>> {
        let tx = conn.unchecked_transaction()?;
        let mut stored = Vec::with_capacity(metrics.len());
        let mut errors = Vec::new();
        {
            let mut gauge_stmt = tx.prepare_cached(SQL_UPDATE_GAUGE)?;
            let mut counter_stmt = tx.prepare_cached(SQL_UPDATE_COUNTER)?;
            for metric in metrics {
                if let Err(e) = Self::check_kind(&tx, metric) {
                    errors.push(e);
                    continue;
                }
                let result = match metric.value {
                    MetricValue::Gauge(v) => gauge_stmt
                        .query_row(params![metric.id, v], |row| {
                            Ok(Metric::gauge(row.get::<_, String>(0)?, row.get(1)?))
                        }),
                    MetricValue::Counter(d) => counter_stmt
                        .query_row(params![metric.id, d], |row| {
                            Ok(Metric::counter(row.get::<_, String>(0)?, row.get(1)?))
                        }),
                };
                match result {
                    Ok(m) => stored.push(m),
                    Err(e) => errors.push(e.into()),
                }
            }
        }

        if let Err(e) = tx.commit() {
            if errors.is_empty() {
                return Err(e.into());
            }
            errors.push(e.into());
        }
        if errors.is_empty() {
            Ok(stored)
        } else {
            Err(StorageError::batch(errors))
        }
    }

    fn row_to_metric(id: String, mtype: &str, delta: Option<i64>, value: Option<f64>) -> Option<Metric> {
        match mtype.parse().ok()? {
            MetricKind::Gauge => Some(Metric::gauge(id, value?)),
            MetricKind::Counter => Some(Metric::counter(id, delta?)),
        }
    }
}

#[async_trait]
impl MetricStore for SqlStore {
    async fn update_metric(&self, metric: Metric) -> Result<Metric> {
        retry::with_retry(|| {
            let conn = self.lock();
            Self::upsert(&conn, &metric)
        })
        .await
    }

    async fn update_batch(&self, metrics: Vec<Metric>) -> Result<Vec<Metric>> {
        retry::with_retry(|| {
            let conn = self.lock();
            Self::upsert_batch(&conn, &metrics)
        })
        .await
    }

    async fn get_metric(&self, id: &str) -> Result<Option<Metric>> {
        let conn = self.lock();
        let row = conn
            .query_row(SQL_GET_METRIC, params![id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                ))
            })
            .optional()?;
        Ok(row.and_then(|(id, mtype, delta, value)| Self::row_to_metric(id, &mtype, delta, value)))
    }

    async fn get_metrics(&self) -> Result<BTreeMap<String, String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(SQL_GET_METRICS)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, Option<f64>>(3)?,
            ))
        })?;

        let mut result = BTreeMap::new();
        for row in rows {
            let (id, mtype, delta, value) = row?;
            let Some(metric) = Self::row_to_metric(id.clone(), &mtype, delta, value) else {
                continue;
            };
            let rendered = match metric.value {
                MetricValue::Gauge(v) => format!("{v:.6}"),
                MetricValue::Counter(d) => format!("{d}"),
            };
            result.insert(id, rendered);
        }
        Ok(result)
    }

    async fn ping(&self) -> Result<()> {
        let conn = self.lock();
        conn.busy_timeout(PING_TIMEOUT)?;
        let result = conn
            .query_row("SELECT 1", [], |_| Ok(()))
            .map_err(StorageError::from);
        conn.busy_timeout(CALL_TIMEOUT)?;
        result
    }

    async fn snapshot(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        tracing::info!("closing database");
        Ok(())
    }
}
