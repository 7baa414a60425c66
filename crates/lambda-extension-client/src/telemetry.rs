//! Telemetry API subscription types and listener.
//!
//! This module provides the subscription document sent to the Lambda
//! Telemetry API and an HTTP listener that receives the records the host
//! pushes to the subscription destination.

use axum::{Router, body::Bytes, extract::State, http::StatusCode, routing::post};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Schema version used by the default subscription.
pub const DEFAULT_SCHEMA_VERSION: &str = "2022-12-13";

/// Port the default subscription destination points at.
pub const DEFAULT_LISTENER_PORT: u16 = 8080;

/// Types of telemetry streams.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryType {
    /// Platform events (start, runtimeDone, report, ...).
    Platform,
    /// Function logs from stdout/stderr.
    Function,
    /// Extension logs.
    Extension,
}

/// Buffering limits for a subscription. All values must be positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Buffering {
    /// Maximum number of records per batch.
    pub max_items: u32,
    /// Maximum batch size in bytes.
    pub max_bytes: u32,
    /// Maximum time in milliseconds to buffer before sending.
    pub timeout_ms: u32,
}

impl Default for Buffering {
    fn default() -> Self {
        Self {
            max_items: 500,
            max_bytes: 1024 * 1024,
            timeout_ms: 1000,
        }
    }
}

/// Where the host pushes telemetry records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Delivery protocol, `HTTP` in practice.
    pub protocol: String,
    /// URI records are posted to.
    #[serde(rename = "URI")]
    pub uri: String,
}

impl Destination {
    /// Creates an HTTP destination.
    pub fn http(uri: impl Into<String>) -> Self {
        Self {
            protocol: "HTTP".to_string(),
            uri: uri.into(),
        }
    }
}

/// Subscription request for the Telemetry API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySubscription {
    /// Schema version.
    pub schema_version: String,
    /// Telemetry streams to subscribe to.
    pub types: Vec<TelemetryType>,
    /// Buffering limits.
    pub buffering: Buffering,
    /// Destination for records.
    pub destination: Destination,
}

impl Default for TelemetrySubscription {
    /// Function and platform streams delivered to
    /// `http://sandbox.localdomain:8080`.
    fn default() -> Self {
        Self::new(format!(
            "http://sandbox.localdomain:{}",
            DEFAULT_LISTENER_PORT
        ))
    }
}

impl TelemetrySubscription {
    /// Creates a subscription for function and platform records delivered
    /// to `destination_uri` with default buffering.
    pub fn new(destination_uri: impl Into<String>) -> Self {
        Self {
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            types: vec![TelemetryType::Function, TelemetryType::Platform],
            buffering: Buffering::default(),
            destination: Destination::http(destination_uri),
        }
    }

    /// Sets the telemetry streams.
    pub fn with_types(mut self, types: Vec<TelemetryType>) -> Self {
        self.types = types;
        self
    }

    /// Sets custom buffering limits.
    pub fn with_buffering(mut self, buffering: Buffering) -> Self {
        self.buffering = buffering;
        self
    }

    /// Checks the subscription against the constraints the host enforces.
    ///
    /// The subscription handshake does not call this; it is offered to
    /// callers building subscriptions from external input.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), SubscriptionError> {
        if self.types.is_empty() {
            return Err(SubscriptionError::NoTypes);
        }
        if self.buffering.max_items == 0 {
            return Err(SubscriptionError::ZeroBuffering("maxItems"));
        }
        if self.buffering.max_bytes == 0 {
            return Err(SubscriptionError::ZeroBuffering("maxBytes"));
        }
        if self.buffering.timeout_ms == 0 {
            return Err(SubscriptionError::ZeroBuffering("timeoutMs"));
        }
        if self.destination.uri.is_empty() {
            return Err(SubscriptionError::EmptyDestination);
        }
        Ok(())
    }
}

/// Constraint violated by a [`TelemetrySubscription`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// No telemetry stream selected.
    #[error("subscription has no telemetry types")]
    NoTypes,

    /// A buffering limit is zero.
    #[error("buffering {0} must be positive")]
    ZeroBuffering(&'static str),

    /// The destination URI is empty.
    #[error("subscription destination URI is empty")]
    EmptyDestination,
}

/// One record pushed by the Telemetry API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Record time in ISO 8601 format.
    pub time: String,
    /// Record type (`function`, `platform.start`, ...).
    #[serde(rename = "type")]
    pub record_type: String,
    /// Record body; a string for log lines, an object for platform events.
    pub record: serde_json::Value,
}

/// HTTP listener for receiving Telemetry API records.
pub struct TelemetryListener {
    listener: TcpListener,
    port: u16,
    record_tx: mpsc::Sender<Vec<TelemetryRecord>>,
    cancel_token: CancellationToken,
}

impl TelemetryListener {
    /// Binds the listener on all interfaces.
    ///
    /// # Arguments
    ///
    /// * `port` - Port to listen on, `0` picks a free port
    /// * `record_tx` - Channel to send received batches
    /// * `cancel_token` - Token for graceful shutdown
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound.
    pub async fn bind(
        port: u16,
        record_tx: mpsc::Sender<Vec<TelemetryRecord>>,
        cancel_token: CancellationToken,
    ) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            listener,
            port,
            record_tx,
            cancel_token,
        })
    }

    /// Returns the bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the listener URI for use in subscription requests.
    ///
    /// Inside Lambda the host reaches the listener through
    /// `sandbox.localdomain`; elsewhere `127.0.0.1` is used.
    pub fn listener_uri(&self) -> String {
        if std::env::var("AWS_LAMBDA_FUNCTION_NAME").is_ok() {
            format!("http://sandbox.localdomain:{}", self.port)
        } else {
            format!("http://127.0.0.1:{}", self.port)
        }
    }

    /// Serves until the cancellation token is triggered.
    pub async fn run(self) -> Result<(), std::io::Error> {
        let state = ListenerState {
            record_tx: self.record_tx,
        };

        let app = Router::new()
            .route("/", post(handle_records))
            .with_state(Arc::new(state));

        tracing::info!(port = self.port, "Telemetry listener started");

        axum::serve(self.listener, app)
            .with_graceful_shutdown(self.cancel_token.cancelled_owned())
            .await
    }
}

struct ListenerState {
    record_tx: mpsc::Sender<Vec<TelemetryRecord>>,
}

/// Accepts one pushed batch.
///
/// Empty batches are acknowledged without reaching the consumer. A full
/// channel answers 503 so the host redelivers the batch later.
async fn handle_records(State(state): State<Arc<ListenerState>>, body: Bytes) -> StatusCode {
    let batch: Vec<TelemetryRecord> = match serde_json::from_slice(&body) {
        Ok(batch) => batch,
        Err(e) => {
            tracing::warn!(error = %e, bytes = body.len(), "Rejecting undecodable telemetry batch");
            return StatusCode::BAD_REQUEST;
        }
    };

    if batch.is_empty() {
        return StatusCode::OK;
    }

    tracing::debug!(
        records = batch.len(),
        by_type = ?records_by_type(&batch),
        "Telemetry batch received"
    );

    match state.record_tx.try_send(batch) {
        Ok(()) => StatusCode::OK,
        Err(mpsc::error::TrySendError::Full(batch)) => {
            tracing::warn!(deferred = batch.len(), "Telemetry consumer is behind, deferring batch");
            StatusCode::SERVICE_UNAVAILABLE
        }
        Err(mpsc::error::TrySendError::Closed(batch)) => {
            tracing::error!(dropped = batch.len(), "Telemetry consumer has stopped");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn records_by_type(batch: &[TelemetryRecord]) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for record in batch {
        *counts.entry(record.record_type.as_str()).or_insert(0) += 1;
    }
    counts
}
