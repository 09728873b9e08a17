mod config;
mod crypto;
mod dispatcher;
mod worker;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulse=info".parse()?))
        .init();

    let config = config::AgentConfig::load()?;
    tracing::info!(
        address = %config.address,
        poll_secs = config.poll_interval_secs,
        report_secs = config.report_interval_secs,
        rate_limit = config.rate_limit,
        batch = config.batch,
        grpc = !config.grpc_endpoint.is_empty(),
        "pulse-agent starting"
    );

    let agent = dispatcher::Agent::new(config)?;
    agent.run().await?;

    tracing::info!("agent stopped");
    Ok(())
}
