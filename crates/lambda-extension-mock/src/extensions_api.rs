//! Extensions API endpoints of the mock host.
//!
//! Implements the host side of:
//! <https://docs.aws.amazon.com/lambda/latest/dg/runtimes-extensions-api.html>

use crate::state::{HostState, NextEventError};
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use lambda_extension_client::{
    EXTENSION_IDENTIFIER_HEADER, EXTENSION_NAME_HEADER, RegisterRequest, RegisterResponse,
};
use std::sync::Arc;

pub(crate) fn create_extensions_api_router(state: Arc<HostState>) -> Router {
    Router::new()
        .route("/2020-01-01/extension/register", post(register_extension))
        .route("/2020-01-01/extension/event/next", get(next_event))
        .with_state(state)
}

/// Reads a required string header, answering 400 when it is absent or not
/// valid ASCII.
pub(crate) fn required_header(headers: &HeaderMap, name: &str) -> Result<String, Response> {
    match headers.get(name) {
        Some(value) => match value.to_str() {
            Ok(s) if !s.is_empty() => Ok(s.to_string()),
            _ => Err((StatusCode::BAD_REQUEST, format!("Invalid {name} header")).into_response()),
        },
        None => Err((StatusCode::BAD_REQUEST, format!("Missing {name} header")).into_response()),
    }
}

/// POST /2020-01-01/extension/register
async fn register_extension(
    State(state): State<Arc<HostState>>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Response {
    let extension_name = match required_header(&headers, EXTENSION_NAME_HEADER) {
        Ok(name) => name,
        Err(response) => return response,
    };

    let extension = state.register(extension_name, request.events).await;
    tracing::info!(
        extension_id = %extension.id,
        name = %extension.name,
        events = ?extension.events,
        "Extension registered"
    );

    let mut response_headers = HeaderMap::new();
    if let Ok(id) = HeaderValue::from_str(&extension.id) {
        response_headers.insert(EXTENSION_IDENTIFIER_HEADER, id);
    }

    let body = RegisterResponse {
        function_name: Some(state.config.function_name.clone()),
        function_version: Some(state.config.function_version.clone()),
        handler: Some(state.config.handler.clone()),
    };

    (StatusCode::OK, response_headers, Json(body)).into_response()
}

/// GET /2020-01-01/extension/event/next
///
/// Long poll: blocks until the extension's next event is due.
async fn next_event(State(state): State<Arc<HostState>>, headers: HeaderMap) -> Response {
    let extension_id = match required_header(&headers, EXTENSION_IDENTIFIER_HEADER) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let event = tokio::select! {
        _ = state.cancel_token.cancelled() => {
            return (StatusCode::SERVICE_UNAVAILABLE, "Host is shutting down").into_response();
        }
        event = state.next_event(&extension_id) => event,
    };

    match event {
        Ok(event) => {
            tracing::debug!(
                extension_id = %extension_id,
                event_type = %event.event_type(),
                "Delivering event"
            );
            Json(event).into_response()
        }
        Err(NextEventError::NotRegistered) => {
            (StatusCode::FORBIDDEN, "Extension not registered").into_response()
        }
        Err(NextEventError::Closed) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Event stream closed").into_response()
        }
    }
}
