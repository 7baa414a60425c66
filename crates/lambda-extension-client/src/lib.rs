//! Client for the AWS Lambda Extensions and Telemetry APIs.
//!
//! An extension runs beside the function in the same execution environment.
//! This crate registers it with the Extensions API, long-polls lifecycle
//! events (INVOKE, SHUTDOWN) and dispatches them to Tower services, and can
//! subscribe to the Telemetry API with a local listener receiving the
//! pushed records.
//!
//! ```no_run
//! use lambda_extension_client::{BoxError, Client, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load()?;
//! let mut client = Client::from_config(&config)?
//!     .on_invoke(|event| async move {
//!         tracing::info!(request_id = %event.request_id, "Invoked");
//!         Ok::<_, BoxError>(())
//!     })
//!     .on_shutdown(|_| async { Ok::<_, BoxError>(()) });
//!
//! client.register().await?;
//! client.subscribe_telemetry(None).await?;
//! client.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod telemetry;

pub use api::{EXTENSION_IDENTIFIER_HEADER, EXTENSION_NAME_HEADER, HostApi};
pub use client::Client;
pub use config::{Config, ConfigBuilder, ConfigError, Endpoints, RUNTIME_API_ENV, TelemetryConfig};
pub use error::{BoxError, ClientError, Result};
pub use event::{
    DecodeError, EventType, InvokeEvent, LifecycleEvent, RegisterRequest, RegisterResponse,
    ShutdownEvent, Tracing,
};
pub use handler::EventHandler;
pub use telemetry::{
    Buffering, DEFAULT_LISTENER_PORT, DEFAULT_SCHEMA_VERSION, Destination, SubscriptionError,
    TelemetryListener, TelemetryRecord, TelemetrySubscription, TelemetryType,
};
