//! Process bootstrap for the Kaisy adapter.
//!
//! Loads configuration, validates mandatory credentials (non-zero exit when
//! missing), initialises logging, wires SIGINT/SIGTERM to the supervisor's
//! shutdown broadcast, and runs the connection lifecycle to completion.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use kaisy::config;
use kaisy::feishu::client::{http_client, FeishuClient, PlatformApi};
use kaisy::feishu::token::{TenantTokenExchange, TokenCache};
use kaisy::logging;
use kaisy::supervisor::ConnectionSupervisor;

/// Feishu (Lark) adapter bridging chat events to an agent message bus.
#[derive(Debug, Parser)]
#[command(name = "kaisy", version)]
struct Cli {
    /// Path to the adapter config file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // `.env` first so environment overrides can come from it.
    let _ = dotenvy::dotenv();
    let mut config = config::load_config(&cli.config).context("failed to load configuration")?;
    config.apply_env_overrides();
    config.validate()?;

    let _logging_guard = if config.debug.logs_dir.trim().is_empty() {
        logging::init_console(&config.debug.level);
        None
    } else {
        Some(logging::init_production(
            Path::new(&config.debug.logs_dir),
            &config.debug.level,
        )?)
    };

    info!(app_id = %config.feishu.app_id, "kaisy starting");
    info!(
        host = %config.bus.host,
        port = config.bus.port,
        platform = %config.bus.platform,
        "bus endpoint"
    );

    let http = http_client();
    let exchange = Arc::new(TenantTokenExchange::new(
        http.clone(),
        &config.feishu.api_base,
        &config.feishu.app_id,
        &config.feishu.app_secret,
    ));
    let tokens = Arc::new(TokenCache::new(exchange));
    let api: Arc<dyn PlatformApi> = Arc::new(FeishuClient::new(
        http.clone(),
        &config.feishu.api_base,
        tokens,
    ));

    let mut supervisor = ConnectionSupervisor::new(config, http, api);
    let shutdown = supervisor.shutdown_handle();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        shutdown.trigger();
    });

    supervisor.run().await?;
    info!("kaisy shut down cleanly");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
