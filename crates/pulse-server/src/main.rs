use anyhow::{Context, Result};
use pulse_common::proto::metrics_server::MetricsServer;
use pulse_server::state::AppState;
use pulse_server::{app, audit, config, crypto, grpc};
use std::future::IntoFuture;
use std::net::SocketAddr;
use tokio::signal;
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulse=info".parse()?))
        .init();

    let config = config::ServerConfig::load()?;
    tracing::info!(
        address = %config.address,
        grpc = config.grpc,
        database = !config.database_dsn.is_empty(),
        store_file = %config.store_file,
        restore = config.restore,
        "pulse-server starting"
    );

    let storage = pulse_storage::open(&config.database_dsn, &config.store_file, config.restore)?;

    if config.grpc {
        run_grpc_server(&config, storage.clone()).await?;
    } else {
        run_http_server(&config, storage.clone()).await?;
    }

    if let Err(e) = storage.shutdown().await {
        tracing::error!(error = %e, "storage shutdown failed");
    }
    tracing::info!("server stopped");
    Ok(())
}

async fn run_grpc_server(
    config: &config::ServerConfig,
    storage: std::sync::Arc<dyn pulse_storage::MetricStore>,
) -> Result<()> {
    let port = config.address.rsplit(':').next().unwrap_or("8080");
    let addr: SocketAddr = format!("0.0.0.0:{port}")
        .parse()
        .with_context(|| format!("invalid server address '{}'", config.address))?;

    let guard = grpc::SubnetGuard::new(&config.trusted_subnet)?;
    let service =
        MetricsServer::with_interceptor(grpc::MetricsService::new(storage), guard.into_interceptor());

    tracing::info!(%addr, "grpc server started");
    tonic::transport::Server::builder()
        .add_service(service)
        .serve_with_shutdown(addr, shutdown_signal())
        .await
        .context("grpc server error")?;

    tracing::info!("grpc server stopped");
    Ok(())
}

async fn run_http_server(
    config: &config::ServerConfig,
    storage: std::sync::Arc<dyn pulse_storage::MetricStore>,
) -> Result<()> {
    let private_key = if config.crypto_key.is_empty() {
        None
    } else {
        Some(crypto::load_private_key(&config.crypto_key)?)
    };

    let (audit_tx, audit_rx) = audit::channel();
    let audit_handle = tokio::spawn(audit::run(
        audit_rx,
        config.audit_file.clone(),
        config.audit_url.clone(),
    ));

    let backup_handle = tokio::spawn(pulse_storage::run_backup(
        storage.clone(),
        config.store_interval_secs,
    ));

    let state = AppState::new(storage, config.hash_key.clone(), private_key, audit_tx);
    let app = app::build_app(state);

    let listener = tokio::net::TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("unable to bind '{}'", config.address))?;
    tracing::info!(address = %config.address, "server started");

    let server_handle = tokio::spawn(
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .into_future(),
    );

    shutdown_signal().await;
    tracing::info!("signal received, shutting down");

    match tokio::time::timeout(Duration::from_secs(5), server_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "HTTP server error"),
        Ok(Err(e)) => tracing::error!(error = %e, "HTTP server task failed"),
        Err(_) => tracing::warn!("graceful shutdown timed out"),
    }

    backup_handle.abort();
    // The router (and with it the last audit sender) is gone once the
    // server future resolves; give the consumer a moment to drain.
    let _ = tokio::time::timeout(Duration::from_secs(1), audit_handle).await;
    Ok(())
}

/// Resolves on INT, TERM or QUIT.
async fn shutdown_signal() {
    let ctrl_c = signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        let mut quit = signal::unix::signal(signal::unix::SignalKind::quit())
            .expect("failed to install SIGQUIT handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
            _ = quit.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
