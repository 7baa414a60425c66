//! Serves the mock Extensions and Telemetry APIs until Ctrl-C.
//!
//! Point an extension at it with `AWS_LAMBDA_RUNTIME_API=127.0.0.1:<PORT>`.
//! Logging is controlled with `RUST_LOG`.

use anyhow::{Context, Result};
use clap::Parser;
use lambda_extension_mock::MockHost;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Mock Lambda Extensions API host
#[derive(Parser, Debug)]
#[command(name = "mockapi")]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on
    port: u16,

    /// Milliseconds between INVOKE events
    #[arg(long, default_value_t = 1000)]
    invoke_interval_ms: u64,

    /// Milliseconds after registration before the SHUTDOWN event
    #[arg(long, default_value_t = 5000)]
    shutdown_after_ms: u64,

    /// Milliseconds between telemetry deliveries
    #[arg(long, default_value_t = 1000)]
    telemetry_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lambda_extension_mock=debug"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .context("failed to initialise tracing registry")?;

    let host = MockHost::builder()
        .ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
        .port(args.port)
        .invoke_interval(Duration::from_millis(args.invoke_interval_ms))
        .shutdown_after(Duration::from_millis(args.shutdown_after_ms))
        .telemetry_interval(Duration::from_millis(args.telemetry_interval_ms))
        .build()
        .await
        .context("failed to start mock host")?;

    tracing::info!(runtime_api = %host.runtime_api(), "Serving mock Extensions API");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    tracing::info!("Ctrl-C received, stopping");
    host.shutdown().await;
    Ok(())
}
