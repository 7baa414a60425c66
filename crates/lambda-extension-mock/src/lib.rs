//! # Lambda Extensions API Mock Host
//!
//! A local stand-in for the host side of the Lambda Extensions and
//! Telemetry APIs, for exercising extensions without deploying them.
//!
//! Once an extension registers, the host emits an INVOKE event every
//! `invoke_interval` and a single SHUTDOWN event after `shutdown_after`.
//! A Telemetry API subscription makes the host push one `function` record
//! per `telemetry_interval` to the subscription destination.
//!
//! ```no_run
//! use lambda_extension_mock::MockHost;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let host = MockHost::builder()
//!     .invoke_interval(Duration::from_millis(100))
//!     .shutdown_after(Duration::from_millis(500))
//!     .build()
//!     .await?;
//!
//! println!("AWS_LAMBDA_RUNTIME_API={}", host.runtime_api());
//!
//! host.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
mod extensions_api;
mod host;
mod state;
mod telemetry_api;

pub use error::{MockError, MockResult};
pub use host::{MockHost, MockHostBuilder, MockHostConfig};
pub use state::{ExtensionInfo, SubscriptionInfo};
