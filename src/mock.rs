//! Ephemeral mock servers.
//!
//! A mock binds a method and a URL pattern (with `{VAR}` path segments)
//! to a response template plus request-matching checks and extractors.
//! While a test runs, a listener serves the declared mocks, records every
//! invocation through a monitor channel and answers unmatched requests
//! with 404. When the test completes the recorded invocations are
//! reconciled against the declaration: every mock must have been called
//! at least once, and any non-Pass outcome demotes a passing test.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::checks::{run_checks, Check, CheckContext};
use crate::extractor::{extract_variables, ExtractorMap};
use crate::request::{Request, Response, ValueMap};
use crate::scope::{new_replacer, Variables};
use crate::status::Status;
use crate::test::Test;

#[derive(Error, Debug)]
pub enum MockError {
    #[error("mock {name:?}: {reason}")]
    Malformed { name: String, reason: String },

    #[error("cannot bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("{0}")]
    Internal(String),
}

/// Response template of a mock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase", deny_unknown_fields)]
pub struct MockResponse {
    pub status_code: u16,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub header: ValueMap,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub body: String,
}

impl Default for MockResponse {
    fn default() -> Self {
        MockResponse {
            status_code: 200,
            header: ValueMap::new(),
            body: String::new(),
        }
    }
}

/// Table-based value mapping applied after extraction: the value of
/// `Variable` is looked up in `Table` and stored under `To` (or back
/// under `Variable` if `To` is empty).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase", deny_unknown_fields)]
pub struct Mapping {
    pub variable: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub to: String,

    pub table: BTreeMap<String, String>,
}

/// A declarative stand-in HTTP endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase", deny_unknown_fields)]
pub struct Mock {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Method to match; empty means GET.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub method: String,

    /// URL with optional `{VAR}` path segments, e.g.
    /// `http://localhost:8880/user/{USERID}`.
    #[serde(rename = "URL")]
    pub url: String,

    /// Checks applied to every matching incoming request.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<Check>,

    /// Extractors applied to the incoming request.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub var_ex: ExtractorMap,

    pub response: MockResponse,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: Variables,

    /// Table-based substitutions applied before rendering the response.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub map: Vec<Mapping>,

    /// Scope captured at load time, used when rendering the response.
    #[serde(skip)]
    pub scope: Variables,
}

impl Mock {
    pub fn method_or_get(&self) -> &str {
        if self.method.is_empty() {
            "GET"
        } else {
            &self.method
        }
    }

    fn parsed_url(&self) -> Result<url::Url, MockError> {
        url::Url::parse(&self.url).map_err(|e| MockError::Malformed {
            name: self.name.clone(),
            reason: format!("bad URL {:?}: {}", self.url, e),
        })
    }

    /// Match an incoming method and path; on success the positional path
    /// variables are returned.
    pub fn matches(&self, method: &str, path: &str) -> Option<Variables> {
        if !method.eq_ignore_ascii_case(self.method_or_get()) {
            return None;
        }
        let pattern = self.parsed_url().ok()?;
        let pattern_segments: Vec<&str> =
            pattern.path().split('/').filter(|s| !s.is_empty()).collect();
        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if pattern_segments.len() != path_segments.len() {
            return None;
        }

        let mut vars = Variables::new();
        for (pat, actual) in pattern_segments.iter().zip(path_segments.iter()) {
            if let Some(name) = pat.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                vars.insert(name.to_string(), (*actual).to_string());
            } else if pat != actual {
                return None;
            }
        }
        Some(vars)
    }
}

/// One recorded mock invocation (or a synthesized verdict for a mock
/// that was never called).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MockOutcome {
    /// "Mock N: name" for declared mocks, "Not Found <url>" for strays.
    pub name: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub method: String,
    #[serde(rename = "URL")]
    pub url: String,
}

struct ServerState {
    mocks: Vec<Mock>,
    monitor: mpsc::UnboundedSender<MockOutcome>,
    client: reqwest::Client,
}

/// A running group of mock listeners plus the monitor channel.
pub struct MockServer {
    shutdown: watch::Sender<bool>,
    listeners: Vec<tokio::task::JoinHandle<()>>,
    monitor_rx: mpsc::UnboundedReceiver<MockOutcome>,
}

impl MockServer {
    /// Start listeners for all mocks. Checks are prepared here; a
    /// prepare failure makes the whole start fail.
    pub async fn start(mut mocks: Vec<Mock>) -> Result<MockServer, MockError> {
        for (i, mock) in mocks.iter_mut().enumerate() {
            // Prepend the serial number so invocations are identifiable.
            mock.name = format!("Mock {}: {}", i, mock.name);
            for check in &mut mock.checks {
                check.prepare().map_err(|e| MockError::Malformed {
                    name: mock.name.clone(),
                    reason: e.to_string(),
                })?;
            }
        }

        let mut addresses = BTreeSet::new();
        for mock in &mocks {
            let url = mock.parsed_url()?;
            let port = url.port_or_known_default().ok_or_else(|| MockError::Malformed {
                name: mock.name.clone(),
                reason: "mock URL without port".into(),
            })?;
            addresses.insert(port);
        }

        let (monitor_tx, monitor_rx) = mpsc::unbounded_channel::<MockOutcome>();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let client = reqwest::Client::new();
        let state = Arc::new(ServerState {
            mocks,
            monitor: monitor_tx,
            client,
        });

        let mut listeners = Vec::new();
        for port in addresses {
            let addr = SocketAddr::from(([127, 0, 0, 1], port));
            let listener = TcpListener::bind(addr).await.map_err(|e| MockError::Bind {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
            info!(%addr, "mock listener bound");

            let state = state.clone();
            let mut shutdown = shutdown_rx.clone();
            listeners.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        accepted = listener.accept() => {
                            let (stream, peer) = match accepted {
                                Ok(pair) => pair,
                                Err(e) => {
                                    warn!(error = %e, "mock accept failed");
                                    continue;
                                }
                            };
                            debug!(%peer, "mock connection");
                            let state = state.clone();
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let state = state.clone();
                                    async move { handle(req, state).await }
                                });
                                if let Err(e) = hyper::server::conn::http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!(error = %e, "mock connection error");
                                }
                            });
                        }
                        _ = shutdown.changed() => {
                            debug!("mock listener stopping");
                            break;
                        }
                    }
                }
            }));
        }

        Ok(MockServer {
            shutdown: shutdown_tx,
            listeners,
            monitor_rx,
        })
    }

    /// Stop all listeners and return the linear invocation history.
    ///
    /// Handlers report through an unbounded channel before answering, so
    /// everything a finished test triggered is already queued here.
    /// Lingering keep-alive connections may still hold senders, which is
    /// why this drains without waiting for the channel to close.
    pub async fn stop(mut self) -> Vec<MockOutcome> {
        let _ = self.shutdown.send(true);
        for listener in self.listeners {
            let _ = listener.await;
        }
        let mut outcomes = Vec::new();
        while let Ok(outcome) = self.monitor_rx.try_recv() {
            debug!(mock = %outcome.name, status = %outcome.status, "mock invocation recorded");
            outcomes.push(outcome);
        }
        outcomes
    }
}

async fn handle(
    req: hyper::Request<hyper::body::Incoming>,
    state: Arc<ServerState>,
) -> Result<hyper::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes().to_vec(),
        Err(_) => Vec::new(),
    };
    let method = parts.method.as_str().to_string();
    let path = parts.uri.path().to_string();
    let full_url = parts.uri.to_string();

    for mock in &state.mocks {
        let Some(path_vars) = mock.matches(&method, &path) else {
            continue;
        };

        // The incoming request is captured like a response so the
        // regular check set can assert on it.
        let mut header = ValueMap::new();
        for (name, value) in &parts.headers {
            header
                .entry(name.to_string())
                .or_default()
                .push(value.to_str().unwrap_or("").to_string());
        }
        let capture = Response {
            status_code: 200,
            header,
            body: body.clone(),
            request: Request {
                method: method.clone(),
                url: full_url.clone(),
                ..Request::default()
            },
            ..Response::default()
        };

        let ctx = CheckContext {
            client: &state.client,
        };
        let results = run_checks(&mock.checks, &capture, &ctx).await;
        let worst = results.iter().map(|r| r.status).max().unwrap_or(Status::Pass);
        let error = results
            .iter()
            .find(|r| r.status > Status::Pass)
            .and_then(|r| r.error.clone());

        let (vars, _extraction_failures) = extract_variables(&mock.var_ex, &capture, &mock.name);

        let outcome = MockOutcome {
            name: mock.name.clone(),
            status: worst,
            error,
            method: method.clone(),
            url: full_url.clone(),
        };
        let _ = state.monitor.send(outcome);

        return Ok(render_response(mock, &path_vars, &vars));
    }

    let _ = state.monitor.send(MockOutcome {
        name: format!("Not Found {}", full_url),
        status: Status::Fail,
        error: Some(format!("no mock for {}", full_url)),
        method,
        url: full_url.clone(),
    });
    let mut resp = hyper::Response::new(Full::new(Bytes::from(format!(
        "no mock for {}\n",
        full_url
    ))));
    *resp.status_mut() = hyper::StatusCode::NOT_FOUND;
    Ok(resp)
}

// Render the response template with the mock's scope, the extracted
// variables and the path variables.
fn render_response(
    mock: &Mock,
    path_vars: &Variables,
    extracted: &Variables,
) -> hyper::Response<Full<Bytes>> {
    let mut scope = mock.scope.clone();
    for (k, v) in &mock.variables {
        scope.entry(k.clone()).or_insert_with(|| v.clone());
    }
    for (k, v) in extracted {
        scope.insert(k.clone(), v.clone());
    }
    for (k, v) in path_vars {
        scope.insert(k.clone(), v.clone());
    }
    for mapping in &mock.map {
        if let Some(current) = scope.get(&mapping.variable) {
            if let Some(mapped) = mapping.table.get(current) {
                let target = if mapping.to.is_empty() {
                    mapping.variable.clone()
                } else {
                    mapping.to.clone()
                };
                scope.insert(target, mapped.clone());
            }
        }
    }

    let body;
    let mut builder = hyper::Response::builder().status(
        hyper::StatusCode::from_u16(mock.response.status_code)
            .unwrap_or(hyper::StatusCode::OK),
    );
    match new_replacer(&scope) {
        Ok(repl) => {
            body = repl.replace(&mock.response.body);
            for (name, values) in &mock.response.header {
                for value in values {
                    builder = builder.header(name.as_str(), repl.replace(value));
                }
            }
        }
        Err(_) => {
            body = mock.response.body.clone();
        }
    }

    builder
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| hyper::Response::new(Full::new(Bytes::new())))
}

/// Reconcile recorded invocations against the declared mocks and attach
/// the outcomes to the test. Every mock must have been called at least
/// once; any non-Pass outcome demotes a passing test to Fail.
pub fn reconcile(test: &mut Test, mut outcomes: Vec<MockOutcome>, mocks: &[Mock]) {
    let invoked: BTreeSet<String> = outcomes
        .iter()
        .filter_map(|o| o.name.split(':').next().map(|p| p.trim().to_string()))
        .collect();

    for (i, mock) in mocks.iter().enumerate() {
        let label = format!("Mock {}", i);
        if invoked.contains(&label) {
            continue;
        }
        outcomes.push(MockOutcome {
            name: if mock.name.starts_with("Mock ") {
                mock.name.clone()
            } else {
                format!("Mock {}: {}", i, mock.name)
            },
            status: Status::Error,
            error: Some("mock not called".into()),
            method: mock.method_or_get().to_string(),
            url: mock.url.clone(),
        });
    }

    let worst = outcomes
        .iter()
        .map(|o| o.status)
        .max()
        .unwrap_or(Status::Pass);
    if worst > Status::Pass && test.result.status == Status::Pass {
        let detail = outcomes
            .iter()
            .filter(|o| o.status > Status::Pass)
            .map(|o| {
                format!(
                    "{}: {}",
                    o.name,
                    o.error.as_deref().unwrap_or("failed")
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        test.result.status = Status::Fail;
        test.result.error = Some(format!(
            "direct checks passed but mocks failed: {}",
            detail
        ));
    }

    test.result.mock_outcomes = outcomes;
}
