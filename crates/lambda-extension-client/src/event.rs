//! Extensions API lifecycle event types and decoding.
//!
//! Implements the event payloads documented at:
//! <https://docs.aws.amazon.com/lambda/latest/dg/runtimes-extensions-api.html>
//!
//! The host sends one JSON object per `/event/next` call. The `eventType`
//! field selects the shape of the rest of the object, so decoding reads the
//! discriminator first and then decodes the whole payload into the matching
//! variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle events that extensions can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    /// Invocation event - sent when a new invocation starts.
    Invoke,

    /// Shutdown event - sent when the execution environment is torn down.
    Shutdown,
}

impl EventType {
    /// Returns the wire name of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Invoke => "INVOKE",
            EventType::Shutdown => "SHUTDOWN",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trace context attached to an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracing {
    /// Trace header type, `X-Amzn-Trace-Id` on AWS.
    #[serde(rename = "type")]
    pub trace_type: String,

    /// Trace header value.
    pub value: String,
}

/// Payload of an `INVOKE` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeEvent {
    /// Always [`EventType::Invoke`].
    pub event_type: EventType,

    /// Invocation deadline in Unix milliseconds.
    #[serde(default)]
    pub deadline_ms: i64,

    /// Request ID of the invocation.
    #[serde(default)]
    pub request_id: String,

    /// ARN of the invoked function.
    #[serde(default)]
    pub invoked_function_arn: String,

    /// Trace context, when the host propagates one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing: Option<Tracing>,
}

/// Payload of a `SHUTDOWN` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownEvent {
    /// Always [`EventType::Shutdown`].
    pub event_type: EventType,

    /// Shutdown deadline in Unix milliseconds.
    #[serde(default)]
    pub deadline_ms: i64,

    /// Reason given by the host (`spindown`, `timeout`, `failure`, ...).
    #[serde(default)]
    pub shutdown_reason: String,
}

/// A decoded lifecycle event. Exactly one shape is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LifecycleEvent {
    /// A new invocation started.
    Invoke(InvokeEvent),

    /// The execution environment is shutting down.
    Shutdown(ShutdownEvent),
}

/// Errors produced while decoding a lifecycle event payload.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not valid JSON or does not match the variant's shape.
    #[error("malformed event payload")]
    Malformed(#[source] serde_json::Error),

    /// The payload has no `eventType` field.
    #[error("event payload has no eventType")]
    MissingEventType,

    /// The `eventType` is neither `INVOKE` nor `SHUTDOWN`.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),
}

#[derive(Deserialize)]
struct Discriminator {
    #[serde(rename = "eventType")]
    event_type: Option<String>,
}

impl LifecycleEvent {
    /// Decodes a raw `/event/next` response body.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the body is not JSON, has no
    /// `eventType`, names an unrecognised event type, or carries a field of
    /// the wrong type. Absent fields take their zero value.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let discriminator: Discriminator =
            serde_json::from_slice(payload).map_err(DecodeError::Malformed)?;

        match discriminator.event_type.as_deref() {
            Some("INVOKE") => serde_json::from_slice(payload)
                .map(LifecycleEvent::Invoke)
                .map_err(DecodeError::Malformed),
            Some("SHUTDOWN") => serde_json::from_slice(payload)
                .map(LifecycleEvent::Shutdown)
                .map_err(DecodeError::Malformed),
            Some(other) => Err(DecodeError::UnknownEventType(other.to_string())),
            None => Err(DecodeError::MissingEventType),
        }
    }

    /// Returns the type of this event.
    pub fn event_type(&self) -> EventType {
        match self {
            LifecycleEvent::Invoke(_) => EventType::Invoke,
            LifecycleEvent::Shutdown(_) => EventType::Shutdown,
        }
    }

    /// Returns the event deadline in Unix milliseconds.
    pub fn deadline_ms(&self) -> i64 {
        match self {
            LifecycleEvent::Invoke(event) => event.deadline_ms,
            LifecycleEvent::Shutdown(event) => event.deadline_ms,
        }
    }
}

/// Registration request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Events the extension wants to receive.
    pub events: Vec<EventType>,
}

/// Function metadata returned by the host on registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    /// Name of the function the extension is attached to.
    #[serde(default)]
    pub function_name: Option<String>,

    /// Version of the function.
    #[serde(default)]
    pub function_version: Option<String>,

    /// Handler of the function.
    #[serde(default)]
    pub handler: Option<String>,
}
