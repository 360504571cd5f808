use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use db_telemetry_pipeline::health::HealthServer;
use db_telemetry_pipeline::{PipelineConfig, PipelineRuntime};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "collector-config.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Health/readiness/metrics server address, overrides config
    #[arg(long)]
    health_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_thread_ids(true).with_level(true))
        .with(tracing_subscriber::filter::LevelFilter::from_level(level))
        .init();

    info!("starting db-telemetry-pipeline");

    let config = PipelineConfig::from_file(&args.config)?;
    config.validate().map_err(|e| anyhow::anyhow!(e))?;
    info!(databases = config.databases.len(), "configuration loaded");

    let health_addr: SocketAddr = args.health_addr.as_deref().unwrap_or(&config.health_addr).parse()?;

    let runtime = Arc::new(PipelineRuntime::bootstrap(config).await?);

    let health_server = HealthServer::new(runtime.clone());
    let health_task = tokio::spawn(async move {
        if let Err(err) = health_server.start(health_addr).await {
            error!(%err, "health server error");
        }
    });
    info!(%health_addr, "health server started");

    signal::ctrl_c().await?;
    info!("received shutdown signal, draining pipeline");

    health_task.abort();
    let _ = health_task.await;
    let runtime = Arc::try_unwrap(runtime)
        .unwrap_or_else(|_| panic!("pipeline runtime still has outstanding references at shutdown"));
    runtime.shutdown().await;

    info!("db-telemetry-pipeline shutdown complete");
    Ok(())
}
