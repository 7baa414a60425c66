//! Integration tests for the mock host over raw HTTP.

use lambda_extension_client::{EventType, LifecycleEvent, TelemetryRecord, TelemetrySubscription};
use lambda_extension_mock::MockHost;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;

async fn fast_host() -> MockHost {
    MockHost::builder()
        .invoke_interval(Duration::from_millis(50))
        .shutdown_after(Duration::from_millis(300))
        .telemetry_interval(Duration::from_millis(50))
        .build()
        .await
        .unwrap()
}

/// Registers an extension and returns its identifier.
async fn register_extension(
    client: &Client,
    base_url: &str,
    name: &str,
    events: Vec<EventType>,
) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let response = client
        .post(format!("{}/2020-01-01/extension/register", base_url))
        .header("Lambda-Extension-Name", name)
        .json(&json!({ "events": events }))
        .send()
        .await?;

    assert_eq!(response.status(), 200);

    let extension_id = response
        .headers()
        .get("Lambda-Extension-Identifier")
        .ok_or("Missing Lambda-Extension-Identifier header")?
        .to_str()?
        .to_string();

    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["functionName"], "helloWorld");

    Ok(extension_id)
}

async fn next_event(
    client: &Client,
    base_url: &str,
    extension_id: &str,
) -> Result<LifecycleEvent, Box<dyn std::error::Error + Send + Sync>> {
    let request = client
        .get(format!("{}/2020-01-01/extension/event/next", base_url))
        .header("Lambda-Extension-Identifier", extension_id)
        .send();

    let response = timeout(Duration::from_secs(2), request).await??;
    assert_eq!(response.status(), 200);

    let body = response.bytes().await?;
    Ok(LifecycleEvent::decode(&body)?)
}

#[tokio::test]
async fn test_register_requires_name_header() {
    let host = fast_host().await;
    let base_url = format!("http://{}", host.runtime_api());

    let response = Client::new()
        .post(format!("{}/2020-01-01/extension/register", base_url))
        .json(&json!({ "events": ["INVOKE"] }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    assert!(host.registered_extensions().await.is_empty());
    host.shutdown().await;
}

#[tokio::test]
async fn test_next_event_rejects_unknown_identifier() {
    let host = fast_host().await;
    let base_url = format!("http://{}", host.runtime_api());
    let client = Client::new();

    let response = client
        .get(format!("{}/2020-01-01/extension/event/next", base_url))
        .header("Lambda-Extension-Identifier", "not-registered")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    let response = client
        .get(format!("{}/2020-01-01/extension/event/next", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    host.shutdown().await;
}

#[tokio::test]
async fn test_invokes_then_single_shutdown() {
    let host = fast_host().await;
    let base_url = format!("http://{}", host.runtime_api());
    let client = Client::new();

    let extension_id = register_extension(
        &client,
        &base_url,
        "test-extension",
        vec![EventType::Invoke, EventType::Shutdown],
    )
    .await
    .unwrap();

    let extensions = host.registered_extensions().await;
    assert_eq!(extensions.len(), 1);
    assert_eq!(extensions[0].name, "test-extension");
    assert_eq!(extensions[0].id, extension_id);

    let mut invokes = 0;
    loop {
        match next_event(&client, &base_url, &extension_id).await.unwrap() {
            LifecycleEvent::Invoke(event) => {
                assert!(!event.request_id.is_empty());
                assert!(event.invoked_function_arn.ends_with(":function:helloWorld"));
                invokes += 1;
            }
            LifecycleEvent::Shutdown(event) => {
                assert_eq!(event.shutdown_reason, "spindown");
                break;
            }
        }
    }

    assert!(invokes >= 1, "expected at least one INVOKE, got {invokes}");
    host.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_answers_pending_poll() {
    let host = fast_host().await;
    let base_url = format!("http://{}", host.runtime_api());
    let client = Client::new();

    let extension_id = register_extension(&client, &base_url, "idle", vec![])
        .await
        .unwrap();

    let poll = tokio::spawn({
        let client = client.clone();
        let url = format!("{}/2020-01-01/extension/event/next", base_url);
        async move {
            client
                .get(url)
                .header("Lambda-Extension-Identifier", extension_id)
                .send()
                .await
        }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!poll.is_finished());

    host.shutdown().await;

    let response = timeout(Duration::from_secs(2), poll)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), 503);
}

#[tokio::test]
async fn test_telemetry_rejects_non_http_protocol() {
    let host = fast_host().await;
    let base_url = format!("http://{}", host.runtime_api());
    let client = Client::new();

    let extension_id = register_extension(&client, &base_url, "ext", vec![])
        .await
        .unwrap();

    let mut subscription = TelemetrySubscription::default();
    subscription.destination.protocol = "TCP".to_string();

    let response = client
        .put(format!("{}/2022-07-01/telemetry", base_url))
        .header("Lambda-Extension-Name", "ext")
        .header("Lambda-Extension-Identifier", &extension_id)
        .json(&subscription)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    assert!(host.telemetry_subscriptions().await.is_empty());
    host.shutdown().await;
}

#[tokio::test]
async fn test_telemetry_records_are_pushed() {
    use axum::{Json, Router, routing::post};
    use tokio::sync::mpsc;

    let (tx, mut rx) = mpsc::channel::<Vec<TelemetryRecord>>(8);
    let receiver = Router::new().route(
        "/",
        post(move |Json(batch): Json<Vec<TelemetryRecord>>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(batch).await;
                "OK"
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move { axum::serve(listener, receiver).await });

    let host = fast_host().await;
    let base_url = format!("http://{}", host.runtime_api());
    let client = Client::new();
    let extension_id = register_extension(&client, &base_url, "ext", vec![])
        .await
        .unwrap();

    let subscription = TelemetrySubscription::new(format!("http://sandbox.localdomain:{port}"));
    let response = client
        .put(format!("{}/2022-07-01/telemetry", base_url))
        .header("Lambda-Extension-Name", "ext")
        .header("Lambda-Extension-Identifier", &extension_id)
        .json(&subscription)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let batch = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].record_type, "function");
    assert_eq!(batch[0].record, json!("record-0"));

    let subscriptions = host.telemetry_subscriptions().await;
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].extension_id, extension_id);
    assert_eq!(subscriptions[0].subscription, subscription);

    host.shutdown().await;
    server.abort();
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let host = fast_host().await;

    let url = format!(
        "http://{}/2018-06-01/runtime/invocation/next",
        host.runtime_api()
    );
    let response = Client::new()
        .get(url)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    host.shutdown().await;
}
