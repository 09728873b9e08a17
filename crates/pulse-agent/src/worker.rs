//! Bounded sender worker pool for single-metric mode.
//!
//! Jobs and results travel over bounded MPMC channels; closing the job
//! channel drains the workers. Results arrive in completion order, not
//! submission order.

use anyhow::anyhow;
use pulse_common::types::Metric;
use pulse_common::{compress, signing};
use rand::Rng;
use reqwest::StatusCode;
use tokio::time::{sleep, Duration};

/// Capacity of both the job and the result channel.
pub const METRICS_MAX: usize = 50;

/// Send attempts per request, counting the first one.
const MAX_ATTEMPTS: u32 = 3;

pub type SendResult = anyhow::Result<StatusCode>;

pub fn job_channel() -> (flume::Sender<Metric>, flume::Receiver<Metric>) {
    flume::bounded(METRICS_MAX)
}

pub fn result_channel() -> (flume::Sender<SendResult>, flume::Receiver<SendResult>) {
    flume::bounded(METRICS_MAX)
}

/// Starts `count` workers reading from `jobs` and emitting into `results`.
/// Each worker exits when the job channel closes or the result channel is
/// dropped.
pub fn spawn_workers(
    count: usize,
    client: reqwest::Client,
    base_url: String,
    hash_key: String,
    local_ip: String,
    jobs: flume::Receiver<Metric>,
    results: flume::Sender<SendResult>,
) {
    for id in 1..=count {
        let client = client.clone();
        let endpoint = format!("{base_url}/update/");
        let hash_key = hash_key.clone();
        let local_ip = local_ip.clone();
        let jobs = jobs.clone();
        let results = results.clone();
        tokio::spawn(async move {
            while let Ok(metric) = jobs.recv_async().await {
                tracing::debug!(worker = id, metric = %metric.id, "sending metric");
                let result =
                    send_metric(&client, &endpoint, &hash_key, &local_ip, &metric).await;
                if results.send_async(result).await.is_err() {
                    return;
                }
            }
        });
    }
}

async fn send_metric(
    client: &reqwest::Client,
    endpoint: &str,
    hash_key: &str,
    local_ip: &str,
    metric: &Metric,
) -> SendResult {
    let body = serde_json::to_vec(metric)?;
    let compressed = compress::gzip(&body)?;
    let hash = (!hash_key.is_empty()).then(|| signing::sign(hash_key, &compressed));
    post_with_retry(client, endpoint, compressed, hash, local_ip).await
}

/// POSTs a prepared (compressed, optionally encrypted) body with the
/// transport headers, retrying failed attempts on a linear backoff with
/// jitter, bounded to 1–5 seconds.
///
/// `hash` is the digest of the compressed pre-encryption bytes; it is not
/// recomputed here even when the caller encrypted the body afterwards, so
/// the verifier checks exactly what the agent signed.
pub async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    body: Vec<u8>,
    hash: Option<String>,
    local_ip: &str,
) -> SendResult {
    let mut last_err = None;
    for attempt in 0..MAX_ATTEMPTS {
        let mut request = client
            .post(url)
            .header("Content-Encoding", "gzip")
            .header("Content-Type", "application/json")
            .header("X-Real-IP", local_ip)
            .body(body.clone());
        if let Some(hash) = &hash {
            request = request.header("Hash", hash.clone());
        }

        match request.send().await {
            Ok(response) => return Ok(response.status()),
            Err(e) => {
                tracing::warn!(attempt = attempt + 1, url, error = %e, "send attempt failed");
                last_err = Some(e);
            }
        }

        if attempt + 1 < MAX_ATTEMPTS {
            sleep(backoff(attempt)).await;
        }
    }

    Err(match last_err {
        Some(e) => e.into(),
        None => anyhow!("request to {url} failed"),
    })
}

/// Linear backoff with jitter: 1s, 2s, 3s... capped at 5s, plus up to
/// 500ms of noise.
fn backoff(attempt: u32) -> Duration {
    let base = Duration::from_secs(u64::from(attempt + 1).min(5));
    base + Duration::from_millis(rand::thread_rng().gen_range(0..500))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_bounded() {
        for attempt in 0..10 {
            let delay = backoff(attempt);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay < Duration::from_millis(5500));
        }
    }

    #[tokio::test]
    async fn closing_job_channel_drains_workers() {
        let (job_tx, job_rx) = job_channel();
        let (result_tx, result_rx) = result_channel();
        // Point the workers at a port nobody listens on; errors still flow
        // through the result channel.
        spawn_workers(
            2,
            reqwest::Client::builder()
                .timeout(Duration::from_millis(200))
                .build()
                .unwrap(),
            "http://127.0.0.1:1".to_string(),
            String::new(),
            "127.0.0.1".to_string(),
            job_rx,
            result_tx,
        );

        job_tx
            .send_async(Metric::counter("PollCount", 1))
            .await
            .unwrap();
        drop(job_tx);

        let result = result_rx.recv_async().await.unwrap();
        assert!(result.is_err());
        // Channel closes once the workers exit.
        assert!(result_rx.recv_async().await.is_err());
    }
}
