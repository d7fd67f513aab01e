//! Transport capability: the only code that touches the wire
//!
//! The mediator owns a `Transport` and never hands it out. Collaborators
//! reach the network exclusively through `NetworkMediator::request`.

use crate::error::{EgressError, Result, TransportErrorKind};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, Url};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default transport timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A fully authorised, sanitized request ready for the wire
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub body: Option<Bytes>,
}

/// Raw transport response
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Injected network capability
///
/// Timeouts are the transport's responsibility; a timeout surfaces as
/// `EgressError::Transport { kind: Timeout, .. }`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the request and read the full response body
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;

    /// Transport name (e.g., "http", "stub")
    fn name(&self) -> &str;
}

/// HTTP(S) transport backed by `reqwest`
///
/// Redirects are not followed: a 3xx is returned to the caller, who must
/// issue a new mediated request so the target is checked against policy.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("a3s-egress/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EgressError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

fn classify(e: &reqwest::Error) -> TransportErrorKind {
    if e.is_timeout() {
        TransportErrorKind::Timeout
    } else if e.is_connect() {
        TransportErrorKind::Connect
    } else if e.is_body() || e.is_decode() {
        TransportErrorKind::Body
    } else {
        TransportErrorKind::Request
    }
}

fn transport_error(e: reqwest::Error) -> EgressError {
    let kind = classify(&e);
    // reqwest's Display includes the URL; keep only the failure class text
    let e = e.without_url();
    EgressError::transport(kind, e.to_string())
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let mut builder = self.client.request(request.method, request.url);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(transport_error)?;
        Ok(TransportResponse { status, body })
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Canned transport for self-tests and unit tests
///
/// Never opens a connection.
pub struct StubTransport {
    outcome: StubOutcome,
    calls: AtomicU64,
}

enum StubOutcome {
    Respond { status: u16, body: Bytes },
    Fail(TransportErrorKind),
}

impl StubTransport {
    /// Always answer with `status` and `body`
    pub fn respond(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            outcome: StubOutcome::Respond {
                status,
                body: body.into(),
            },
            calls: AtomicU64::new(0),
        }
    }

    /// Always fail with `kind`
    pub fn fail(kind: TransportErrorKind) -> Self {
        Self {
            outcome: StubOutcome::Fail(kind),
            calls: AtomicU64::new(0),
        }
    }

    /// Number of requests that reached this transport
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(&self, _request: TransportRequest) -> Result<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            StubOutcome::Respond { status, body } => Ok(TransportResponse {
                status: *status,
                body: body.clone(),
            }),
            StubOutcome::Fail(kind) => Err(EgressError::transport(*kind, "stubbed failure")),
        }
    }

    fn name(&self) -> &str {
        "stub"
    }
}
