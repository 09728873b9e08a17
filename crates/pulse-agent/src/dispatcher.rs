//! Poll/report orchestration.
//!
//! A background task refreshes the shared "latest batch" on every poll tick
//! by reading one item from each sampler channel; the report loop ships the
//! latest batch on every report tick. On shutdown one final send runs with
//! whatever was collected last.

use crate::config::AgentConfig;
use crate::{crypto, worker};
use anyhow::Context;
use pulse_collector::runtime::RuntimeSampler;
use pulse_collector::system::SystemSampler;
use pulse_common::proto::metrics_client::MetricsClient;
use pulse_common::proto::UpdateMetricsRequest;
use pulse_common::types::Metric;
use pulse_common::{compress, signing};
use std::net::UdpSocket;
use std::sync::{Arc, RwLock};
use tokio::signal;
use tokio::time::{interval, Duration};

pub struct Agent {
    config: AgentConfig,
    client: reqwest::Client,
    local_ip: String,
    jobs: flume::Sender<Metric>,
    results: flume::Receiver<worker::SendResult>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("unable to build HTTP client")?;

        let local_ip = local_outbound_ip(config.base_url())?;

        let (jobs, job_rx) = worker::job_channel();
        let (result_tx, results) = worker::result_channel();
        worker::spawn_workers(
            config.rate_limit,
            client.clone(),
            config.base_url().to_string(),
            config.hash_key.clone(),
            local_ip.clone(),
            job_rx,
            result_tx,
        );

        Ok(Self {
            config,
            client,
            local_ip,
            jobs,
            results,
        })
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut runtime_rx = pulse_collector::spawn(RuntimeSampler::new());
        let mut system_rx = pulse_collector::spawn(SystemSampler::new());

        let latest: Arc<RwLock<Vec<Metric>>> = Arc::new(RwLock::new(Vec::new()));

        let poll_latest = latest.clone();
        let poll_secs = self.config.poll_interval_secs;
        let poll_handle = tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(poll_secs));
            tick.tick().await;
            loop {
                tick.tick().await;
                let mut merged = runtime_rx.recv().await.unwrap_or_default();
                merged.extend(system_rx.recv().await.unwrap_or_default());
                tracing::debug!(count = merged.len(), "latest batch refreshed");
                let mut slot = poll_latest
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                *slot = merged;
            }
        });

        let mut report_tick = interval(Duration::from_secs(self.config.report_interval_secs));
        report_tick.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_signal() => {
                    tracing::info!("signal received, sending final report");
                    let snapshot = snapshot_of(&latest);
                    self.send_metrics(&snapshot).await;
                    break;
                }
                _ = report_tick.tick() => {
                    let snapshot = snapshot_of(&latest);
                    self.send_metrics(&snapshot).await;
                }
            }
        }

        poll_handle.abort();
        Ok(())
    }

    async fn send_metrics(&self, metrics: &[Metric]) {
        if !self.config.grpc_endpoint.is_empty() {
            if let Err(e) = self.send_grpc(metrics).await {
                tracing::warn!(error = %e, "grpc report failed, will retry next tick");
            }
            return;
        }
        if self.config.batch {
            if let Err(e) = self.send_batch(metrics).await {
                tracing::warn!(error = %e, "batch report failed, will retry next tick");
            }
        } else {
            self.send_single(metrics).await;
        }
    }

    async fn send_batch(&self, metrics: &[Metric]) -> anyhow::Result<()> {
        if metrics.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_vec(metrics)?;
        let compressed = compress::gzip(&body)?;

        // Signed over the compressed bytes, before any encryption; the
        // server decrypts first and verifies the same input.
        let hash = (!self.config.hash_key.is_empty())
            .then(|| signing::sign(&self.config.hash_key, &compressed));

        let payload = if self.config.crypto_key.is_empty() {
            compressed
        } else {
            crypto::encrypt_with_key_file(&compressed, &self.config.crypto_key)?
        };

        let url = format!("{}/updates/", self.config.base_url());
        match worker::post_with_retry(&self.client, &url, payload, hash, &self.local_ip).await {
            Ok(status) => {
                tracing::info!(count = metrics.len(), %status, "batch metrics sent");
            }
            Err(e) => {
                // The next tick reports a fresh snapshot anyway.
                tracing::info!(error = %e, "server unreachable, skipping tick");
            }
        }
        Ok(())
    }

    async fn send_single(&self, metrics: &[Metric]) {
        for metric in metrics {
            let id = metric.id.clone();
            if self.jobs.send_async(metric.clone()).await.is_err() {
                tracing::warn!("worker pool is gone, dropping remaining metrics");
                return;
            }
            match self.results.recv_async().await {
                Ok(Ok(status)) => tracing::info!(metric = %id, %status, "metric sent"),
                Ok(Err(e)) => tracing::warn!(metric = %id, error = %e, "failed to send metric"),
                Err(_) => {
                    tracing::warn!("worker pool is gone, dropping remaining metrics");
                    return;
                }
            }
        }
    }

    async fn send_grpc(&self, metrics: &[Metric]) -> anyhow::Result<()> {
        if metrics.is_empty() {
            return Ok(());
        }

        let mut client = MetricsClient::connect(self.config.grpc_uri())
            .await
            .context("unable to connect to grpc server")?;

        let wire = metrics.iter().map(Into::into).collect();
        let mut request = tonic::Request::new(UpdateMetricsRequest { metrics: wire });
        request.metadata_mut().insert(
            "x-real-ip",
            self.local_ip
                .parse()
                .context("local ip is not valid metadata")?,
        );

        let response = client.update_metrics(request).await?;
        tracing::info!(count = metrics.len(), ?response, "metrics reported over grpc");
        Ok(())
    }
}

fn snapshot_of(latest: &Arc<RwLock<Vec<Metric>>>) -> Vec<Metric> {
    latest
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// The local address the kernel routes towards the server; sent as
/// `X-Real-IP` / `x-real-ip` so the server can attribute the batch.
fn local_outbound_ip(base_url: &str) -> anyhow::Result<String> {
    let target = base_url
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/');

    // Connecting a UDP socket performs no I/O; it only resolves the route.
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket
        .connect(target)
        .with_context(|| format!("unable to find route to '{target}'"))?;
    Ok(socket.local_addr()?.ip().to_string())
}

async fn shutdown_signal() {
    let ctrl_c = signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::routing::post;
    use axum::Router;
    use pulse_common::types::MetricValue;
    use tokio::sync::mpsc;

    #[test]
    fn local_outbound_ip_resolves() {
        let ip = local_outbound_ip("http://localhost:8080").unwrap();
        assert!(!ip.is_empty());
    }

    async fn spawn_sink(path: &'static str) -> (String, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new().route(
            path,
            post(move |body: Bytes| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(body.to_vec());
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}"), rx)
    }

    fn test_config(address: String, batch: bool) -> AgentConfig {
        AgentConfig {
            address,
            report_interval_secs: 1,
            poll_interval_secs: 1,
            hash_key: String::new(),
            rate_limit: 3,
            crypto_key: String::new(),
            batch,
            grpc_endpoint: String::new(),
        }
    }

    #[tokio::test]
    async fn batch_report_reaches_sink() {
        let (address, mut rx) = spawn_sink("/updates/").await;
        let agent = Agent::new(test_config(address, true)).unwrap();

        agent
            .send_metrics(&[
                Metric::counter("PollCount", 1),
                Metric::gauge("RandomValue", 0.42),
            ])
            .await;

        let body = rx.recv().await.unwrap();
        let decoded: Vec<Metric> =
            serde_json::from_slice(&compress::gunzip(&body).unwrap()).unwrap();
        assert!(decoded
            .iter()
            .any(|m| m.id == "PollCount"
                && matches!(m.value, MetricValue::Counter(d) if d >= 1)));
    }

    #[tokio::test]
    async fn empty_batch_is_not_sent() {
        let (address, mut rx) = spawn_sink("/updates/").await;
        let agent = Agent::new(test_config(address, true)).unwrap();

        agent.send_metrics(&[]).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn single_mode_sends_each_metric() {
        let (address, mut rx) = spawn_sink("/update/").await;
        let agent = Agent::new(test_config(address, false)).unwrap();

        agent
            .send_metrics(&[Metric::counter("C", 1), Metric::gauge("G", 2.0)])
            .await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let mut ids: Vec<String> = [first, second]
            .iter()
            .map(|b| {
                serde_json::from_slice::<Metric>(&compress::gunzip(b).unwrap())
                    .unwrap()
                    .id
            })
            .collect();
        ids.sort();
        assert_eq!(ids, ["C", "G"]);
    }
}
