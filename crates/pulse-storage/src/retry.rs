use crate::error::Result;
use tokio::time::{sleep, Duration};

/// Sleep schedule between attempts; one initial attempt plus one retry per
/// entry.
const BACKOFF_SECS: [u64; 3] = [1, 3, 5];

/// Runs `op`, retrying transient failures on the fixed backoff schedule.
/// Success and non-transient errors short-circuit.
pub async fn with_retry<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut last = match op() {
        Ok(value) => return Ok(value),
        Err(e) if !e.is_transient() => return Err(e),
        Err(e) => e,
    };

    for (attempt, secs) in BACKOFF_SECS.iter().enumerate() {
        tracing::warn!(
            attempt = attempt + 1,
            backoff_secs = secs,
            error = %last,
            "storage operation failed, retrying"
        );
        sleep(Duration::from_secs(*secs)).await;
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => last = e,
        }
    }

    Err(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use pulse_common::types::MetricKind;

    #[tokio::test]
    async fn success_short_circuits() {
        let mut calls = 0;
        let result = with_retry(|| {
            calls += 1;
            Ok(7)
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn non_transient_error_is_not_retried() {
        let mut calls = 0;
        let result: Result<()> = with_retry(|| {
            calls += 1;
            Err(StorageError::KindMismatch {
                id: "x".into(),
                existing: MetricKind::Gauge,
            })
        })
        .await;
        assert!(matches!(result, Err(StorageError::KindMismatch { .. })));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_retries_until_success() {
        let mut calls = 0;
        let result = with_retry(move || {
            calls += 1;
            if calls < 3 {
                Err(StorageError::Io(std::io::Error::other("flaky")))
            } else {
                Ok(calls)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }
}
