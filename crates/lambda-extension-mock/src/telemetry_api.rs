//! Telemetry API endpoint of the mock host.
//!
//! Implements the host side of:
//! <https://docs.aws.amazon.com/lambda/latest/dg/telemetry-api.html>

use crate::extensions_api::required_header;
use crate::state::HostState;
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::put,
};
use lambda_extension_client::{
    EXTENSION_IDENTIFIER_HEADER, EXTENSION_NAME_HEADER, TelemetrySubscription,
};
use std::sync::Arc;

pub(crate) fn create_telemetry_api_router(state: Arc<HostState>) -> Router {
    Router::new()
        .route("/2022-07-01/telemetry", put(subscribe_telemetry))
        .with_state(state)
}

/// PUT /2022-07-01/telemetry
async fn subscribe_telemetry(
    State(state): State<Arc<HostState>>,
    headers: HeaderMap,
    Json(subscription): Json<TelemetrySubscription>,
) -> Response {
    let extension_id = match required_header(&headers, EXTENSION_IDENTIFIER_HEADER) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let Some(extension) = state.get_extension(&extension_id).await else {
        return (StatusCode::FORBIDDEN, "Extension not registered").into_response();
    };

    if subscription.destination.protocol != "HTTP" {
        return (StatusCode::BAD_REQUEST, "Only HTTP protocol is supported").into_response();
    }

    if subscription.destination.uri.is_empty() {
        return (StatusCode::BAD_REQUEST, "Destination URI is required").into_response();
    }

    let extension_name = headers
        .get(EXTENSION_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or(extension.name);

    tracing::info!(
        extension_id = %extension_id,
        extension_name = %extension_name,
        types = ?subscription.types,
        destination = %subscription.destination.uri,
        "Extension subscribed to telemetry"
    );

    state
        .subscribe(extension_id, extension_name, subscription)
        .await;

    (StatusCode::OK, "OK").into_response()
}
