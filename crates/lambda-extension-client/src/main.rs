//! Lambda extension that logs lifecycle events and telemetry records.
//!
//! # Configuration
//!
//! Configuration is loaded from (in order of priority):
//! 1. Default values
//! 2. Config file: `/var/task/lambda-extension.toml`
//! 3. `AWS_LAMBDA_RUNTIME_API` (required)
//! 4. Environment variables with `LAMBDA_EXTENSION_` prefix
//!
//! Logging is controlled with `RUST_LOG`.

use anyhow::{Context, Result};
use lambda_extension_client::{
    BoxError, Client, Config, InvokeEvent, ShutdownEvent, TelemetryListener, TelemetryRecord,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LISTENER_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing().context("failed to initialise tracing subscriber")?;

    let config = Config::load().context("failed to load configuration")?;
    tracing::debug!(?config, "Configuration loaded");

    let cancel_token = CancellationToken::new();

    let mut client = Client::from_config(&config)
        .context("failed to create extensions client")?
        .on_invoke(log_invoke)
        .on_shutdown(log_shutdown);

    client
        .register()
        .await
        .context("failed to register extension")?;

    let listener_task = if config.telemetry.enabled {
        Some(start_telemetry(&client, &config, cancel_token.clone()).await?)
    } else {
        None
    };

    let interrupt_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping");
            interrupt_token.cancel();
        }
    });

    let result = client.run(cancel_token.clone()).await;

    cancel_token.cancel();
    if let Some(task) = listener_task {
        await_listener(task, LISTENER_GRACE).await;
    }

    result.context("event loop failed")?;
    Ok(())
}

async fn log_invoke(event: InvokeEvent) -> Result<(), BoxError> {
    tracing::info!(
        request_id = %event.request_id,
        deadline_ms = event.deadline_ms,
        function_arn = %event.invoked_function_arn,
        trace = event.tracing.as_ref().map(|t| t.value.as_str()).unwrap_or_default(),
        "Invocation started"
    );
    Ok(())
}

async fn log_shutdown(event: ShutdownEvent) -> Result<(), BoxError> {
    tracing::info!(
        reason = %event.shutdown_reason,
        deadline_ms = event.deadline_ms,
        "Shutting down"
    );
    Ok(())
}

/// Starts the telemetry listener and subscribes it to the Telemetry API.
async fn start_telemetry(
    client: &Client,
    config: &Config,
    cancel_token: CancellationToken,
) -> Result<JoinHandle<std::io::Result<()>>> {
    let (record_tx, mut record_rx) =
        mpsc::channel::<Vec<TelemetryRecord>>(config.telemetry.buffer_size.max(1));

    let listener = TelemetryListener::bind(config.telemetry.listener_port, record_tx, cancel_token)
        .await
        .context("failed to bind telemetry listener")?;

    let subscription = config.telemetry.subscription(listener.listener_uri());
    subscription
        .validate()
        .context("invalid telemetry subscription")?;

    let listener_task = tokio::spawn(listener.run());

    tokio::spawn(async move {
        while let Some(records) = record_rx.recv().await {
            for record in records {
                tracing::info!(
                    time = %record.time,
                    record_type = %record.record_type,
                    record = %record.record,
                    "Telemetry record"
                );
            }
        }
    });

    client
        .subscribe_telemetry(Some(&subscription))
        .await
        .context("failed to subscribe to Telemetry API")?;

    Ok(listener_task)
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lambda_extension_client=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).without_time())
        .with(filter)
        .try_init()
        .context("failed to initialise tracing registry")?;

    Ok(())
}

/// Waits up to `grace` for the telemetry listener to stop and logs how it
/// ended. Returns true only for a clean stop.
async fn await_listener(task: JoinHandle<std::io::Result<()>>, grace: Duration) -> bool {
    match tokio::time::timeout(grace, task).await {
        Ok(Ok(Ok(()))) => {
            tracing::debug!("Telemetry listener stopped");
            true
        }
        Ok(Ok(Err(e))) => {
            tracing::warn!(error = %e, "Telemetry listener failed");
            false
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Telemetry listener task failed");
            false
        }
        Err(_) => {
            tracing::warn!(?grace, "Telemetry listener did not stop in time");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_await_listener_reports_clean_stop() {
        let task = tokio::spawn(async { Ok(()) });
        assert!(await_listener(task, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_await_listener_reports_listener_error() {
        let task = tokio::spawn(async { Err(std::io::Error::other("accept failed")) });
        assert!(!await_listener(task, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_await_listener_gives_up_after_grace() {
        let task = tokio::spawn(std::future::pending::<std::io::Result<()>>());
        assert!(!await_listener(task, Duration::from_millis(50)).await);
    }
}
