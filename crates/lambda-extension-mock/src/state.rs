//! Shared state of the mock host: registered extensions, their event
//! streams, and telemetry subscriptions.

use crate::host::MockHostConfig;
use chrono::{DateTime, SecondsFormat, Utc};
use lambda_extension_client::{
    EventType, InvokeEvent, LifecycleEvent, ShutdownEvent, TelemetryRecord, TelemetrySubscription,
    Tracing,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Information about a registered extension.
#[derive(Debug, Clone)]
pub struct ExtensionInfo {
    /// Identifier issued on registration.
    pub id: String,

    /// Name from the `Lambda-Extension-Name` header.
    pub name: String,

    /// Events the extension subscribed to.
    pub events: Vec<EventType>,

    /// Timestamp when the extension registered.
    pub registered_at: DateTime<Utc>,
}

/// A Telemetry API subscription as received from an extension.
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    /// Identifier of the subscribing extension.
    pub extension_id: String,

    /// Name of the subscribing extension.
    pub extension_name: String,

    /// The subscription document, unmodified.
    pub subscription: TelemetrySubscription,
}

struct RegisteredExtension {
    info: ExtensionInfo,
    // Kept so the stream stays open for extensions with no event sources.
    _event_tx: mpsc::Sender<LifecycleEvent>,
    event_rx: Arc<Mutex<mpsc::Receiver<LifecycleEvent>>>,
}

/// Why `/event/next` could not produce an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NextEventError {
    NotRegistered,
    Closed,
}

pub(crate) struct HostState {
    pub config: MockHostConfig,
    pub cancel_token: CancellationToken,
    extensions: Mutex<HashMap<String, RegisteredExtension>>,
    subscriptions: Mutex<Vec<SubscriptionInfo>>,
    http_client: reqwest::Client,
}

impl HostState {
    pub fn new(config: MockHostConfig, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            cancel_token,
            extensions: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
            http_client: reqwest::Client::new(),
        }
    }

    /// Registers an extension and starts the event sources it asked for.
    ///
    /// Events go through a channel of capacity one, so a source blocks until
    /// the extension has taken the previous event.
    pub async fn register(self: &Arc<Self>, name: String, events: Vec<EventType>) -> ExtensionInfo {
        let info = ExtensionInfo {
            id: Uuid::new_v4().to_string(),
            name,
            events,
            registered_at: Utc::now(),
        };
        let (event_tx, event_rx) = mpsc::channel(1);

        for event_type in &info.events {
            match event_type {
                EventType::Invoke => self.spawn_invoke_source(event_tx.clone()),
                EventType::Shutdown => self.spawn_shutdown_source(event_tx.clone()),
            }
        }

        self.extensions.lock().await.insert(
            info.id.clone(),
            RegisteredExtension {
                info: info.clone(),
                _event_tx: event_tx,
                event_rx: Arc::new(Mutex::new(event_rx)),
            },
        );

        info
    }

    pub async fn get_extension(&self, extension_id: &str) -> Option<ExtensionInfo> {
        self.extensions
            .lock()
            .await
            .get(extension_id)
            .map(|ext| ext.info.clone())
    }

    pub async fn extensions(&self) -> Vec<ExtensionInfo> {
        self.extensions
            .lock()
            .await
            .values()
            .map(|ext| ext.info.clone())
            .collect()
    }

    /// Waits for the next event of an extension.
    pub async fn next_event(&self, extension_id: &str) -> Result<LifecycleEvent, NextEventError> {
        let event_rx = {
            let extensions = self.extensions.lock().await;
            let ext = extensions
                .get(extension_id)
                .ok_or(NextEventError::NotRegistered)?;
            Arc::clone(&ext.event_rx)
        };

        let mut event_rx = event_rx.lock().await;
        event_rx.recv().await.ok_or(NextEventError::Closed)
    }

    /// Records a subscription and starts pushing records to its destination.
    pub async fn subscribe(
        self: &Arc<Self>,
        extension_id: String,
        extension_name: String,
        subscription: TelemetrySubscription,
    ) {
        // Extensions address the listener through sandbox.localdomain, which
        // only resolves inside Lambda.
        let destination = subscription
            .destination
            .uri
            .replace("sandbox.localdomain", "127.0.0.1");

        self.subscriptions.lock().await.push(SubscriptionInfo {
            extension_id,
            extension_name,
            subscription,
        });

        self.spawn_telemetry_delivery(destination);
    }

    pub async fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.subscriptions.lock().await.clone()
    }

    fn spawn_invoke_source(self: &Arc<Self>, event_tx: mpsc::Sender<LifecycleEvent>) {
        let state = Arc::clone(self);
        let period = self.config.invoke_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = state.cancel_token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let event = state.invoke_event();
                tracing::info!("Emitting INVOKE event");

                tokio::select! {
                    _ = state.cancel_token.cancelled() => break,
                    sent = event_tx.send(event) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn spawn_shutdown_source(self: &Arc<Self>, event_tx: mpsc::Sender<LifecycleEvent>) {
        let state = Arc::clone(self);

        tokio::spawn(async move {
            tokio::select! {
                _ = state.cancel_token.cancelled() => return,
                _ = tokio::time::sleep(state.config.shutdown_after) => {}
            }

            let event = state.shutdown_event();
            tracing::info!("Emitting SHUTDOWN event");

            tokio::select! {
                _ = state.cancel_token.cancelled() => {}
                _ = event_tx.send(event) => {}
            }
        });
    }

    fn spawn_telemetry_delivery(self: &Arc<Self>, destination: String) {
        let state = Arc::clone(self);
        let period = self.config.telemetry_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            let mut sequence = 0u64;

            loop {
                tokio::select! {
                    _ = state.cancel_token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let batch = vec![TelemetryRecord {
                    time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                    record_type: "function".to_string(),
                    record: serde_json::Value::String(format!("record-{sequence}")),
                }];
                sequence += 1;

                match state
                    .http_client
                    .post(&destination)
                    .json(&batch)
                    .send()
                    .await
                {
                    Ok(response) => {
                        tracing::debug!(status = %response.status(), destination, "Sent telemetry");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, destination, "Telemetry delivery failed, stopping");
                        break;
                    }
                }
            }
        });
    }

    fn invoke_event(&self) -> LifecycleEvent {
        let now = Utc::now();
        let deadline = now + chrono::Duration::milliseconds(self.config.timeout.as_millis() as i64);

        LifecycleEvent::Invoke(InvokeEvent {
            event_type: EventType::Invoke,
            deadline_ms: deadline.timestamp_millis(),
            request_id: Uuid::new_v4().to_string(),
            invoked_function_arn: format!(
                "arn:aws:lambda:{}:{}:function:{}",
                self.config.region, self.config.account_id, self.config.function_name
            ),
            tracing: Some(Tracing {
                trace_type: "X-Amzn-Trace-Id".to_string(),
                value: trace_header(now),
            }),
        })
    }

    fn shutdown_event(&self) -> LifecycleEvent {
        let deadline = Utc::now() + chrono::Duration::milliseconds(2000);

        LifecycleEvent::Shutdown(ShutdownEvent {
            event_type: EventType::Shutdown,
            deadline_ms: deadline.timestamp_millis(),
            shutdown_reason: "spindown".to_string(),
        })
    }
}

/// Generates an X-Ray trace header: `Root=1-{8-hex-time}-{24-hex-random};Parent=..;Sampled=1`.
fn trace_header(timestamp: DateTime<Utc>) -> String {
    let epoch_time = timestamp.timestamp() as u32;
    let root = format!("{:032x}", Uuid::new_v4().as_u128());
    let parent = format!("{:032x}", Uuid::new_v4().as_u128());

    format!(
        "Root=1-{:08x}-{};Parent={};Sampled=1",
        epoch_time,
        &root[..24],
        &parent[..16]
    )
}
