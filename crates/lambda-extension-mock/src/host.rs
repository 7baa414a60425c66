//! Mock host server and its builder.

use crate::error::{MockError, MockResult};
use crate::extensions_api::create_extensions_api_router;
use crate::state::{ExtensionInfo, HostState, SubscriptionInfo};
use crate::telemetry_api::create_telemetry_api_router;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Settings of a [`MockHost`].
#[derive(Debug, Clone)]
pub struct MockHostConfig {
    /// Delay between INVOKE events.
    pub invoke_interval: Duration,

    /// Delay after registration before the SHUTDOWN event.
    pub shutdown_after: Duration,

    /// Delay between telemetry deliveries.
    pub telemetry_interval: Duration,

    /// Invocation timeout; sets the INVOKE deadline.
    pub timeout: Duration,

    /// Function name reported on registration and used in ARNs.
    pub function_name: String,

    /// Function version reported on registration.
    pub function_version: String,

    /// Function handler reported on registration.
    pub handler: String,

    /// Region used in ARNs.
    pub region: String,

    /// Account used in ARNs.
    pub account_id: String,
}

impl Default for MockHostConfig {
    fn default() -> Self {
        Self {
            invoke_interval: Duration::from_secs(1),
            shutdown_after: Duration::from_secs(5),
            telemetry_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(3),
            function_name: "helloWorld".to_string(),
            function_version: "$LATEST".to_string(),
            handler: "index.handler".to_string(),
            region: "us-east-1".to_string(),
            account_id: "123456789012".to_string(),
        }
    }
}

/// Builder for a [`MockHost`].
#[derive(Debug, Clone)]
#[must_use = "builders do nothing unless .build() is called"]
pub struct MockHostBuilder {
    config: MockHostConfig,
    ip: IpAddr,
    port: u16,
}

impl Default for MockHostBuilder {
    fn default() -> Self {
        Self {
            config: MockHostConfig::default(),
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        }
    }
}

impl MockHostBuilder {
    /// Creates a builder with default settings, listening on a random
    /// loopback port.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the address to listen on.
    pub fn ip(mut self, ip: IpAddr) -> Self {
        self.ip = ip;
        self
    }

    /// Sets the port to listen on. `0` picks a free port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the delay between INVOKE events.
    pub fn invoke_interval(mut self, interval: Duration) -> Self {
        self.config.invoke_interval = interval;
        self
    }

    /// Sets the delay after registration before the SHUTDOWN event.
    pub fn shutdown_after(mut self, delay: Duration) -> Self {
        self.config.shutdown_after = delay;
        self
    }

    /// Sets the delay between telemetry deliveries.
    pub fn telemetry_interval(mut self, interval: Duration) -> Self {
        self.config.telemetry_interval = interval;
        self
    }

    /// Sets the invocation timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Sets the function name.
    pub fn function_name(mut self, name: impl Into<String>) -> Self {
        self.config.function_name = name.into();
        self
    }

    /// Binds the listener and starts serving.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::BindError`] when the address cannot be bound.
    pub async fn build(self) -> MockResult<MockHost> {
        let cancel = CancellationToken::new();
        let state = Arc::new(HostState::new(self.config, cancel.clone()));

        let router = create_extensions_api_router(Arc::clone(&state))
            .merge(create_telemetry_api_router(Arc::clone(&state)))
            .fallback(|req: axum::extract::Request| async move {
                tracing::warn!(
                    method = %req.method(),
                    uri = %req.uri(),
                    "Unhandled request"
                );
                axum::http::StatusCode::NOT_FOUND
            });

        let listener = TcpListener::bind(SocketAddr::new(self.ip, self.port))
            .await
            .map_err(|e| MockError::BindError(e.to_string()))?;
        let addr = listener
            .local_addr()
            .map_err(|e| MockError::BindError(e.to_string()))?;

        let shutdown = cancel.clone();
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .map_err(|e| MockError::Server(e.to_string()))
        });

        tracing::info!(addr = %addr, "Mock host listening");

        Ok(MockHost {
            state,
            addr,
            cancel,
            server_handle,
        })
    }
}

/// A running mock of the Lambda Extensions and Telemetry APIs.
///
/// Dropping the host stops its event sources and server.
pub struct MockHost {
    state: Arc<HostState>,
    addr: SocketAddr,
    cancel: CancellationToken,
    server_handle: JoinHandle<MockResult<()>>,
}

impl MockHost {
    /// Creates a new builder.
    pub fn builder() -> MockHostBuilder {
        MockHostBuilder::new()
    }

    /// Returns the value for `AWS_LAMBDA_RUNTIME_API`: `host:port`, no scheme.
    pub fn runtime_api(&self) -> String {
        self.addr.to_string()
    }

    /// Returns the socket address the host listens on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the host settings.
    pub fn config(&self) -> &MockHostConfig {
        &self.state.config
    }

    /// Returns all registered extensions.
    pub async fn registered_extensions(&self) -> Vec<ExtensionInfo> {
        self.state.extensions().await
    }

    /// Returns all telemetry subscriptions received so far.
    pub async fn telemetry_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.state.subscriptions().await
    }

    /// Stops event sources and telemetry delivery, answers pending long
    /// polls with 503, and waits for the server to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        match (&mut self.server_handle).await {
            Ok(Ok(())) => tracing::info!("Mock host stopped"),
            Ok(Err(e)) => tracing::error!(error = %e, "Mock host server failed"),
            Err(e) => tracing::error!(error = %e, "Mock host server task failed"),
        }
    }
}

impl Drop for MockHost {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for MockHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHost")
            .field("addr", &self.addr)
            .field("config", &self.state.config)
            .finish()
    }
}
