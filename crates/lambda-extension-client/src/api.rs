//! HTTP calls against the Extensions and Telemetry APIs.
//!
//! Implements the client side of:
//! <https://docs.aws.amazon.com/lambda/latest/dg/runtimes-extensions-api.html>
//! <https://docs.aws.amazon.com/lambda/latest/dg/telemetry-api.html>

use crate::config::Endpoints;
use crate::error::{ClientError, Result};
use crate::event::{EventType, LifecycleEvent, RegisterRequest, RegisterResponse};
use crate::telemetry::TelemetrySubscription;
use tokio_util::sync::CancellationToken;

/// Header carrying the extension name.
pub const EXTENSION_NAME_HEADER: &str = "Lambda-Extension-Name";

/// Header carrying the extension identifier issued on registration.
pub const EXTENSION_IDENTIFIER_HEADER: &str = "Lambda-Extension-Identifier";

/// Stateless wrapper around the host endpoints.
#[derive(Debug, Clone)]
pub struct HostApi {
    endpoints: Endpoints,
    http: reqwest::Client,
}

impl HostApi {
    /// Creates an API wrapper with a default HTTP client.
    ///
    /// The client has no request timeout; `/event/next` is a long poll.
    pub fn new(endpoints: Endpoints) -> Self {
        Self::with_http_client(endpoints, reqwest::Client::new())
    }

    /// Creates an API wrapper with a caller-supplied HTTP client.
    pub fn with_http_client(endpoints: Endpoints, http: reqwest::Client) -> Self {
        Self { endpoints, http }
    }

    /// Returns the endpoints this wrapper talks to.
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// `POST /register`. Returns the extension identifier and the host's
    /// function metadata.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-success status, an undecodable body,
    /// or a missing or empty `Lambda-Extension-Identifier` header.
    pub async fn register(
        &self,
        name: &str,
        events: Vec<EventType>,
    ) -> Result<(String, RegisterResponse)> {
        let url = self.endpoints.register_url();
        tracing::info!(url = %url, name, ?events, "Registering extension");

        let response = self
            .http
            .post(&url)
            .header(EXTENSION_NAME_HEADER, name)
            .json(&RegisterRequest { events })
            .send()
            .await?;

        let status = response.status();
        let extension_id = response
            .headers()
            .get(EXTENSION_IDENTIFIER_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_owned);
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(ClientError::status(status, &body));
        }

        let metadata: RegisterResponse =
            serde_json::from_slice(&body).map_err(ClientError::RegisterResponse)?;
        tracing::debug!(status = status.as_u16(), ?metadata, "Register response received");

        let extension_id = extension_id.ok_or(ClientError::MissingExtensionId {
            status: status.as_u16(),
        })?;

        Ok((extension_id, metadata))
    }

    /// `GET /event/next`. Blocks until the host has an event, or until
    /// `cancel_token` fires.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-success status, an undecodable
    /// payload, or cancellation ([`ClientError::Cancelled`]).
    pub async fn next_event(
        &self,
        extension_id: &str,
        cancel_token: &CancellationToken,
    ) -> Result<LifecycleEvent> {
        let url = self.endpoints.next_event_url();
        tracing::debug!(url = %url, extension_id, "Waiting for next event");

        let request = async {
            let response = self
                .http
                .get(&url)
                .header(EXTENSION_IDENTIFIER_HEADER, extension_id)
                .send()
                .await?;

            let status = response.status();
            let body = response.bytes().await?;
            if !status.is_success() {
                return Err(ClientError::status(status, &body));
            }

            Ok::<_, ClientError>(LifecycleEvent::decode(&body)?)
        };

        tokio::select! {
            _ = cancel_token.cancelled() => Err(ClientError::Cancelled),
            result = request => result,
        }
    }

    /// `PUT` the subscription document to the Telemetry API.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or a non-success status; the response body
    /// is kept in [`ClientError::Status`].
    pub async fn subscribe_telemetry(
        &self,
        name: &str,
        extension_id: &str,
        subscription: &TelemetrySubscription,
    ) -> Result<()> {
        let url = &self.endpoints.telemetry;
        tracing::info!(
            url = %url,
            name,
            types = ?subscription.types,
            destination = %subscription.destination.uri,
            "Subscribing to Telemetry API"
        );

        let response = self
            .http
            .put(url)
            .header(EXTENSION_NAME_HEADER, name)
            .header(EXTENSION_IDENTIFIER_HEADER, extension_id)
            .json(subscription)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(ClientError::status(status, &body));
        }

        tracing::info!(
            status = status.as_u16(),
            response = %String::from_utf8_lossy(&body),
            "Subscribed to Telemetry API"
        );
        Ok(())
    }
}
