//! Extension lifecycle client.
//!
//! [`Client`] drives an extension through the Extensions API lifecycle:
//! register once, optionally subscribe to the Telemetry API, then poll
//! `/event/next` and hand each event to the matching handler until a
//! SHUTDOWN event has been handled or the cancellation token fires.
//!
//! Poll failures are retried immediately, with no backoff and no attempt
//! limit, until cancellation is observed.

use crate::api::HostApi;
use crate::config::{Config, Endpoints};
use crate::error::{BoxError, ClientError, Result};
use crate::event::{EventType, InvokeEvent, LifecycleEvent, ShutdownEvent};
use crate::handler::{self, EventHandler};
use crate::telemetry::TelemetrySubscription;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tower::{Service, service_fn};

/// Client for a single extension.
///
/// Methods take `&mut self` and are meant to be called in sequence:
/// [`register`](Self::register), then optionally
/// [`subscribe_telemetry`](Self::subscribe_telemetry), then
/// [`run`](Self::run).
pub struct Client {
    name: String,
    api: HostApi,
    extension_id: Option<String>,
    invoke_handler: Option<EventHandler<InvokeEvent>>,
    shutdown_handler: Option<EventHandler<ShutdownEvent>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.name)
            .field("endpoints", self.api.endpoints())
            .field("extension_id", &self.extension_id)
            .field("invoke_handler", &self.invoke_handler.is_some())
            .field("shutdown_handler", &self.shutdown_handler.is_some())
            .finish()
    }
}

impl Client {
    /// Creates a client announcing itself as `name` to the given endpoints.
    pub fn new(name: impl Into<String>, endpoints: Endpoints) -> Self {
        Self {
            name: name.into(),
            api: HostApi::new(endpoints),
            extension_id: None,
            invoke_handler: None,
            shutdown_handler: None,
        }
    }

    /// Creates a client from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when the host address is not
    /// configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.extension_name.clone(), config.endpoints()?))
    }

    /// Replaces the HTTP client used for all calls.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.api = HostApi::with_http_client(self.api.endpoints().clone(), http);
        self
    }

    /// Sets the INVOKE handler.
    pub fn with_invoke_handler<S>(mut self, service: S) -> Self
    where
        S: Service<InvokeEvent, Response = ()> + Send + 'static,
        S::Error: Into<BoxError>,
        S::Future: Send + 'static,
    {
        self.invoke_handler = Some(handler::boxed(service));
        self
    }

    /// Sets the SHUTDOWN handler.
    pub fn with_shutdown_handler<S>(mut self, service: S) -> Self
    where
        S: Service<ShutdownEvent, Response = ()> + Send + 'static,
        S::Error: Into<BoxError>,
        S::Future: Send + 'static,
    {
        self.shutdown_handler = Some(handler::boxed(service));
        self
    }

    /// Sets the INVOKE handler from an async closure.
    ///
    /// ```no_run
    /// use lambda_extension_client::{BoxError, Client, Endpoints};
    ///
    /// let client = Client::new("my-extension", Endpoints::from_runtime_api("127.0.0.1:9001"))
    ///     .on_invoke(|event| async move {
    ///         println!("invoked: {}", event.request_id);
    ///         Ok::<_, BoxError>(())
    ///     });
    /// ```
    pub fn on_invoke<F, Fut, E>(self, f: F) -> Self
    where
        F: FnMut(InvokeEvent) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.with_invoke_handler(service_fn(f))
    }

    /// Sets the SHUTDOWN handler from an async closure.
    pub fn on_shutdown<F, Fut, E>(self, f: F) -> Self
    where
        F: FnMut(ShutdownEvent) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.with_shutdown_handler(service_fn(f))
    }

    /// Returns the extension name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the identifier issued on registration, if any.
    pub fn extension_id(&self) -> Option<&str> {
        self.extension_id.as_deref()
    }

    /// Returns the host endpoints.
    pub fn endpoints(&self) -> &Endpoints {
        self.api.endpoints()
    }

    /// Event types requested on registration: one per configured handler.
    pub fn subscribed_events(&self) -> Vec<EventType> {
        let mut events = Vec::with_capacity(2);
        if self.invoke_handler.is_some() {
            events.push(EventType::Invoke);
        }
        if self.shutdown_handler.is_some() {
            events.push(EventType::Shutdown);
        }
        events
    }

    /// Registers the extension and stores the issued identifier.
    ///
    /// Failures are not retried; the client stays unregistered and the
    /// caller decides whether to try again.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AlreadyRegistered`] on a second call, and any
    /// transport, status, decode or missing-identifier error from the host.
    pub async fn register(&mut self) -> Result<()> {
        if self.extension_id.is_some() {
            return Err(ClientError::AlreadyRegistered);
        }

        let events = self.subscribed_events();
        if events.is_empty() {
            tracing::warn!(name = %self.name, "No handlers set; registering for no events");
        }

        let (extension_id, metadata) = self.api.register(&self.name, events).await?;
        tracing::info!(
            extension_id = %extension_id,
            function_name = metadata.function_name.as_deref().unwrap_or_default(),
            "Extension registered"
        );

        self.extension_id = Some(extension_id);
        Ok(())
    }

    /// Subscribes to the Telemetry API.
    ///
    /// `None` sends [`TelemetrySubscription::default`]. Each call sends a
    /// new subscription; nothing is deduplicated.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotRegistered`] before a successful
    /// [`register`](Self::register), and [`ClientError::Status`] carrying the
    /// response body when the host rejects the subscription.
    pub async fn subscribe_telemetry(
        &self,
        subscription: Option<&TelemetrySubscription>,
    ) -> Result<()> {
        let extension_id = self
            .extension_id
            .as_deref()
            .ok_or(ClientError::NotRegistered)?;
        let subscription = subscription.cloned().unwrap_or_default();

        self.api
            .subscribe_telemetry(&self.name, extension_id, &subscription)
            .await
    }

    /// Runs the event loop.
    ///
    /// Returns `Ok(())` once a SHUTDOWN event has been handled, or when the
    /// token is cancelled. Cancellation aborts an in-flight poll but never
    /// interrupts a running handler.
    ///
    /// INVOKE handler failures are logged and polling continues. Failed
    /// polls are logged and retried immediately. Events of unknown type are
    /// logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotRegistered`] without any network call when
    /// [`register`](Self::register) has not succeeded, and
    /// [`ClientError::ShutdownHandler`] when the SHUTDOWN handler fails.
    pub async fn run(&mut self, cancel_token: CancellationToken) -> Result<()> {
        let extension_id = self
            .extension_id
            .clone()
            .ok_or(ClientError::NotRegistered)?;
        tracing::debug!(extension_id = %extension_id, "Starting event loop");

        loop {
            if cancel_token.is_cancelled() {
                tracing::info!("Event loop cancelled");
                return Ok(());
            }

            let event = match self.api.next_event(&extension_id, &cancel_token).await {
                Ok(event) => event,
                Err(e) if e.is_unknown_event() => {
                    tracing::warn!(error = %e, "Skipping event of unknown type");
                    continue;
                }
                Err(e) => {
                    if cancel_token.is_cancelled() {
                        tracing::info!("Event loop cancelled");
                        return Ok(());
                    }
                    tracing::error!(error = %e, "Failed to fetch next event");
                    continue;
                }
            };

            match event {
                LifecycleEvent::Invoke(invoke) => self.handle_invoke(invoke).await,
                LifecycleEvent::Shutdown(shutdown) => return self.handle_shutdown(shutdown).await,
            }
        }
    }

    async fn handle_invoke(&mut self, event: InvokeEvent) {
        tracing::debug!(
            request_id = %event.request_id,
            deadline_ms = event.deadline_ms,
            "Received INVOKE event"
        );

        let Some(handler) = self.invoke_handler.as_mut() else {
            tracing::warn!("No INVOKE handler set");
            return;
        };

        if let Err(e) = handler::dispatch(handler, event).await {
            tracing::error!(error = %e, "INVOKE handler failed");
        }
    }

    async fn handle_shutdown(&mut self, event: ShutdownEvent) -> Result<()> {
        tracing::info!(
            reason = %event.shutdown_reason,
            deadline_ms = event.deadline_ms,
            "Received SHUTDOWN event"
        );

        let Some(handler) = self.shutdown_handler.as_mut() else {
            tracing::warn!("No SHUTDOWN handler set");
            return Ok(());
        };

        handler::dispatch(handler, event).await.map_err(|e| {
            tracing::error!(error = %e, "SHUTDOWN handler failed");
            ClientError::ShutdownHandler(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    fn endpoints() -> Endpoints {
        Endpoints::from_runtime_api("127.0.0.1:9001")
    }

    #[test]
    fn test_subscribed_events_follow_handlers() {
        let client = Client::new("ext", endpoints());
        assert!(client.subscribed_events().is_empty());

        let client = client.on_shutdown(|_| async { Ok::<_, BoxError>(()) });
        assert_eq!(client.subscribed_events(), vec![EventType::Shutdown]);

        let client = client.on_invoke(|_| async { Ok::<_, BoxError>(()) });
        assert_eq!(
            client.subscribed_events(),
            vec![EventType::Invoke, EventType::Shutdown]
        );
    }

    #[test]
    fn test_new_client_is_unregistered() {
        let client = Client::new("ext", endpoints());

        assert_eq!(client.name(), "ext");
        assert!(client.extension_id().is_none());
        assert_eq!(client.endpoints(), &endpoints());
    }

    #[test]
    fn test_from_config_requires_runtime_api() {
        let config = Config::builder().extension_name("ext").build();
        assert!(matches!(
            Client::from_config(&config),
            Err(ClientError::Config(ConfigError::MissingRuntimeApi))
        ));

        let config = Config::builder()
            .extension_name("ext")
            .runtime_api("127.0.0.1:9001")
            .build();
        let client = Client::from_config(&config).unwrap();
        assert_eq!(client.name(), "ext");
        assert_eq!(client.endpoints(), &endpoints());
    }

    #[tokio::test]
    async fn test_run_before_register_fails() {
        let mut client = Client::new("ext", endpoints());

        let err = client.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::NotRegistered));
    }

    #[tokio::test]
    async fn test_subscribe_before_register_fails() {
        let client = Client::new("ext", endpoints());

        let err = client.subscribe_telemetry(None).await.unwrap_err();
        assert!(matches!(err, ClientError::NotRegistered));
    }

    #[test]
    fn test_debug_hides_handlers() {
        let client = Client::new("ext", endpoints()).on_invoke(|_| async { Ok::<_, BoxError>(()) });
        let debug = format!("{client:?}");

        assert!(debug.contains("invoke_handler: true"));
        assert!(debug.contains("shutdown_handler: false"));
    }
}
