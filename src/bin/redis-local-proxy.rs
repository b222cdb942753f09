use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use redis_local_proxy::{
    Args, Config, ProxySupervisor, RuntimeConfig, init_logging, load_config, shutdown_signal,
};

fn main() -> Result<()> {
    let args = Args::parse();
    let config = build_config(&args)?;

    init_logging(&config.logging)?;

    let runtime_config = RuntimeConfig::from_args(args.thread_count());
    if runtime_config.is_single_threaded() {
        info!("Starting proxy with single-threaded runtime");
    } else {
        info!(
            "Starting proxy with {} worker threads",
            runtime_config.worker_threads()
        );
    }

    let rt = runtime_config.build_runtime()?;
    rt.block_on(run_proxies(config))
}

/// Config file (or defaults), then environment upstreams, then arguments
fn build_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config file '{}'", path.display()))?,
        None => Config::default(),
    };

    config.apply_env_upstreams(std::env::vars())?;
    args.apply_to(&mut config)?;
    config.validate()?;
    Ok(config)
}

async fn run_proxies(config: Config) -> Result<()> {
    info!("Configured {} upstreams:", config.upstreams.len());
    for upstream in &config.upstreams {
        info!(
            "  - {} ({} {}{})",
            upstream.display_label(),
            upstream.family,
            upstream.address,
            if upstream.cluster { ", cluster" } else { "" }
        );
    }

    let supervisor = ProxySupervisor::new(config);
    if let Err(e) = supervisor.start().await {
        error!("Failed to start proxies: {}", e);
        return Err(e.into());
    }

    shutdown_signal().await;
    info!("Shutdown signal received, stopping proxies...");
    supervisor.shutdown().await;
    supervisor.log_stats();
    info!("Graceful shutdown complete");
    Ok(())
}
