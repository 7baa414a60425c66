//! Scripted Extensions API host for client integration tests.
//!
//! Each endpoint answers from a script set up by the test, and every request
//! is recorded so tests can assert on what the client sent.

#![allow(dead_code)]

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use lambda_extension_client::Endpoints;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const EXTENSION_ID: &str = "3f5b2c4e-ext-id";

/// What the host answers.
#[derive(Debug, Clone)]
pub struct Script {
    register_status: u16,
    register_id: Option<String>,
    register_body: String,
    events: VecDeque<(u16, String)>,
    fail_polls: bool,
    telemetry_status: u16,
    telemetry_body: String,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            register_status: 200,
            register_id: Some(EXTENSION_ID.to_string()),
            register_body: r#"{"functionName":"helloWorld","functionVersion":"$LATEST","handler":"index.handler"}"#
                .to_string(),
            events: VecDeque::new(),
            fail_polls: false,
            telemetry_status: 200,
            telemetry_body: "OK".to_string(),
        }
    }
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_response(mut self, status: u16, id: Option<&str>, body: &str) -> Self {
        self.register_status = status;
        self.register_id = id.map(str::to_owned);
        self.register_body = body.to_string();
        self
    }

    /// Queues one `/event/next` answer. Once the queue is drained, polls
    /// hang forever unless [`fail_polls`](Self::fail_polls) is set.
    pub fn event(mut self, status: u16, body: impl Into<String>) -> Self {
        self.events.push_back((status, body.into()));
        self
    }

    /// Answers 500 to every poll after the queue is drained.
    pub fn fail_polls(mut self) -> Self {
        self.fail_polls = true;
        self
    }

    pub fn telemetry_response(mut self, status: u16, body: &str) -> Self {
        self.telemetry_status = status;
        self.telemetry_body = body.to_string();
        self
    }
}

/// A request as seen by the host.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub name: Option<String>,
    pub identifier: Option<String>,
    pub body: String,
}

#[derive(Debug, Default)]
struct Recorded {
    register: Vec<RecordedRequest>,
    next: Vec<RecordedRequest>,
    telemetry: Vec<RecordedRequest>,
}

struct HostState {
    script: Mutex<Script>,
    recorded: Mutex<Recorded>,
}

pub struct ScriptedHost {
    state: Arc<HostState>,
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ScriptedHost {
    pub async fn start(script: Script) -> Self {
        let state = Arc::new(HostState {
            script: Mutex::new(script),
            recorded: Mutex::new(Recorded::default()),
        });

        let router = Router::new()
            .route("/2020-01-01/extension/register", post(register))
            .route("/2020-01-01/extension/event/next", get(next_event))
            .route("/2022-07-01/telemetry", put(telemetry))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            state,
            addr,
            handle,
        }
    }

    pub fn runtime_api(&self) -> String {
        self.addr.to_string()
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints::from_runtime_api(&self.runtime_api())
    }

    pub fn register_requests(&self) -> Vec<RecordedRequest> {
        self.state.recorded.lock().unwrap().register.clone()
    }

    pub fn next_requests(&self) -> Vec<RecordedRequest> {
        self.state.recorded.lock().unwrap().next.clone()
    }

    pub fn next_calls(&self) -> usize {
        self.state.recorded.lock().unwrap().next.len()
    }

    pub fn telemetry_requests(&self) -> Vec<RecordedRequest> {
        self.state.recorded.lock().unwrap().telemetry.clone()
    }
}

impl Drop for ScriptedHost {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn record(headers: &HeaderMap, body: &[u8]) -> RecordedRequest {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };
    RecordedRequest {
        name: header("Lambda-Extension-Name"),
        identifier: header("Lambda-Extension-Identifier"),
        body: String::from_utf8_lossy(body).into_owned(),
    }
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap()
}

async fn register(State(state): State<Arc<HostState>>, headers: HeaderMap, body: Bytes) -> Response {
    state
        .recorded
        .lock()
        .unwrap()
        .register
        .push(record(&headers, &body));

    let script = state.script.lock().unwrap().clone();
    let mut response_headers = HeaderMap::new();
    if let Some(id) = script.register_id {
        response_headers.insert("Lambda-Extension-Identifier", HeaderValue::from_str(&id).unwrap());
    }
    (
        status(script.register_status),
        response_headers,
        script.register_body,
    )
        .into_response()
}

async fn next_event(State(state): State<Arc<HostState>>, headers: HeaderMap) -> Response {
    state
        .recorded
        .lock()
        .unwrap()
        .next
        .push(record(&headers, &[]));

    let (next, fail_polls) = {
        let mut script = state.script.lock().unwrap();
        (script.events.pop_front(), script.fail_polls)
    };

    match next {
        Some((code, body)) => (status(code), body).into_response(),
        None if fail_polls => {
            tokio::time::sleep(Duration::from_millis(5)).await;
            (StatusCode::INTERNAL_SERVER_ERROR, "host unavailable").into_response()
        }
        None => std::future::pending().await,
    }
}

async fn telemetry(State(state): State<Arc<HostState>>, headers: HeaderMap, body: Bytes) -> Response {
    state
        .recorded
        .lock()
        .unwrap()
        .telemetry
        .push(record(&headers, &body));

    let script = state.script.lock().unwrap().clone();
    (status(script.telemetry_status), script.telemetry_body).into_response()
}

pub fn invoke_json(request_id: &str) -> String {
    format!(
        r#"{{"eventType":"INVOKE","deadlineMs":1700000003000,"requestId":"{request_id}","invokedFunctionArn":"arn:aws:lambda:us-east-1:123456789012:function:helloWorld","tracing":{{"type":"X-Amzn-Trace-Id","value":"Root=1-5759e988-bd862e3fe1be46a994272793;Sampled=1"}}}}"#
    )
}

pub fn shutdown_json(reason: &str) -> String {
    format!(r#"{{"eventType":"SHUTDOWN","deadlineMs":1700000002000,"shutdownReason":"{reason}"}}"#)
}
