use routegate::config::Config;
use routegate::proxy::{ProxyEngine, ProxyServer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const PKG_NAME: &str = env!("CARGO_PKG_NAME");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("routegate=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    if !config_path.exists() {
        info!(path = %config_path.display(), "Configuration file not found, using built-in defaults");
    }

    let config = Config::load_or_default(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    print_startup_banner(&config);

    let bind_addr = config.server.bind_addr()?;
    let engine = Arc::new(ProxyEngine::from_config(&config)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = ProxyServer::new(bind_addr, engine, shutdown_rx);
    let mut server_handle = tokio::spawn(server.run());

    // Wait for shutdown signal (Ctrl+C or SIGTERM), or for the server to exit on its own
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
            result = &mut server_handle => {
                return finish(result);
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
            }
            result = &mut server_handle => {
                return finish(result);
            }
        }
    }

    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(Duration::from_secs(5), server_handle).await {
        Ok(result) => finish(result)?,
        Err(_) => info!("Proxy server did not stop within 5s, exiting anyway"),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Bind failures and other server errors are fatal
fn finish(result: Result<anyhow::Result<()>, tokio::task::JoinError>) -> anyhow::Result<()> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(error = %e, "Proxy server error");
            Err(e)
        }
        Err(e) => Err(anyhow::anyhow!("Proxy server task failed: {}", e)),
    }
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting proxy server");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        request_timeout_secs = ?config.server.request_timeout_secs,
        "Server configuration"
    );
    info!(
        pool_max_idle = config.server.pool_max_idle_per_host,
        pool_idle_timeout_secs = config.server.pool_idle_timeout_secs,
        "Connection pool settings"
    );
    for (prefix, route) in &config.routes {
        info!(prefix = %prefix, backends = ?route.backends, "Route");
    }
    for rule in &config.rewrite {
        info!(from = %rule.from, to = %rule.to, "Response rewrite rule");
    }
}
