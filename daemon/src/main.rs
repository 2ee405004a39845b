use anyhow::{Context, Result};
use procwatch_daemon::{
    config::{Config, ServerConfig},
    handler::DaemonState,
    server::{HttpServer, TokenGate},
};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn load_config() -> Config {
    let config_path = Config::config_path();
    let mut config = if config_path.exists() {
        Config::load(&config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        })
    } else {
        info!("No config file found, using defaults");
        Config::default()
    };
    config.apply_env(|key| std::env::var(key).ok());
    config
}

fn resolve_bind(config: &Config) -> Result<SocketAddr> {
    let bind = config.bind_addr();
    bind.to_socket_addrs()
        .with_context(|| format!("invalid bind address {}", bind))?
        .next()
        .with_context(|| format!("bind address {} resolved to nothing", bind))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("procwatch daemon starting...");

    let config = load_config();
    if config.server.token == ServerConfig::default().token {
        warn!("Using the default API token; set PROCWATCH_TOKEN or server.token");
    }

    let addr = resolve_bind(&config)?;
    let state = Arc::new(DaemonState::new(&config.restart));
    let gate = TokenGate::new(config.server.token.clone());

    let server = HttpServer::bind(&addr, gate, state, shutdown_signal())
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("[procwatch] Running on http://{}", server.local_addr());

    server.run().await.context("HTTP server error")?;
    info!("procwatch daemon stopped");
    Ok(())
}
