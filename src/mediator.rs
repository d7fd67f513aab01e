//! Network mediator: the single chokepoint for outbound traffic
//!
//! Every outbound call is described by a `NetworkRequestDescriptor` and
//! passed to `NetworkMediator::request`. The mediator:
//!
//! 1. extracts the target host from the URL
//! 2. asks the `PolicyStore` whether the host is permitted
//! 3. on denial, records `network_blocked` and returns `SecurityViolation`
//!    without attempting any connection
//! 4. sanitizes query text before it is placed on the URL
//! 5. delegates the call to the injected `Transport`
//! 6. records `network_egress` with metadata only (status, size, duration)
//! 7. returns the metadata, with the body handed back out-of-band
//!
//! Offline mode is total because the policy denies every host, not because
//! call sites are inspected.

use crate::audit::{AuditEvent, AuditSink};
use crate::error::{EgressError, Result};
use crate::policy::{normalize_host, PolicyStore};
use crate::sanitizer::QuerySanitizer;
use crate::transport::{Transport, TransportRequest};
use bytes::Bytes;
use reqwest::{Method, Url};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// URL parameter used by `with_query_text`
pub const DEFAULT_QUERY_PARAM: &str = "q";

/// Host reported when none can be extracted from the URL
pub const UNPARSEABLE_HOST: &str = "<unparseable>";

/// Free-text query to be sanitized and attached as a URL parameter
#[derive(Debug, Clone)]
pub struct QueryText {
    pub param: String,
    pub text: String,
}

/// Description of one outbound call; built per call and never persisted
///
/// Only text attached with [`with_query`](Self::with_query) or
/// [`with_query_text`](Self::with_query_text) is sanitized. `url` goes on the
/// wire and into the audit log as given (minus any credentials), so user
/// text must never be baked into it.
#[derive(Debug, Clone)]
pub struct NetworkRequestDescriptor {
    pub method: Method,
    pub url: String,
    pub query: Option<QueryText>,
    pub body: Option<Bytes>,
}

impl NetworkRequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: None,
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Attach user text under URL parameter `param`
    pub fn with_query(mut self, param: impl Into<String>, text: impl Into<String>) -> Self {
        self.query = Some(QueryText {
            param: param.into(),
            text: text.into(),
        });
        self
    }

    /// Attach user text under the default `q` parameter
    pub fn with_query_text(self, text: impl Into<String>) -> Self {
        self.with_query(DEFAULT_QUERY_PARAM, text)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// What the caller learns about a completed request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub request_id: String,
    pub status: u16,
    pub size_bytes: u64,
    #[serde(with = "millis")]
    pub elapsed: Duration,
    /// Final URL as sent (post-sanitization)
    pub url: String,
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64() * 1000.0)
    }
}

/// Result of an allowed, completed request
///
/// The body is delivered here and nowhere else; the audit path only ever
/// sees `metadata.size_bytes`.
#[derive(Debug, Clone)]
pub struct MediatedResponse {
    pub metadata: ResponseMetadata,
    pub body: Bytes,
}

/// Decision counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MediatorStats {
    /// Requests that reached the transport and got a response
    pub allowed: u64,
    /// Requests denied by policy
    pub blocked: u64,
    /// Allowed requests that failed at the transport
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    allowed: AtomicU64,
    blocked: AtomicU64,
    failed: AtomicU64,
}

/// The enforcement point for all outbound network access
///
/// Cheap to clone; clones share policy, sink, transport, and counters.
#[derive(Clone)]
pub struct NetworkMediator {
    policy: Arc<PolicyStore>,
    sanitizer: QuerySanitizer,
    audit: Arc<dyn AuditSink>,
    transport: Arc<dyn Transport>,
    counters: Arc<Counters>,
}

impl NetworkMediator {
    pub fn new(
        policy: Arc<PolicyStore>,
        audit: Arc<dyn AuditSink>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let sanitizer = QuerySanitizer::new(*policy.sanitization());
        Self {
            policy,
            sanitizer,
            audit,
            transport,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Same policy and sanitizer, different transport and sink
    ///
    /// Used by the self-test so probes never reach the real network or the
    /// deployed audit log.
    pub(crate) fn probe(&self, audit: Arc<dyn AuditSink>, transport: Arc<dyn Transport>) -> Self {
        Self {
            policy: Arc::clone(&self.policy),
            sanitizer: self.sanitizer,
            audit,
            transport,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn policy(&self) -> &PolicyStore {
        &self.policy
    }

    pub fn sanitizer(&self) -> &QuerySanitizer {
        &self.sanitizer
    }

    /// The sink this mediator records into
    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn stats(&self) -> MediatorStats {
        MediatorStats {
            allowed: self.counters.allowed.load(Ordering::Relaxed),
            blocked: self.counters.blocked.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Mediate one outbound request
    ///
    /// Returns `SecurityViolation` when policy denies the target,
    /// `Transport` when an allowed request fails on the wire, and
    /// `AuditWrite` when the decision could not be recorded.
    pub async fn request(&self, descriptor: NetworkRequestDescriptor) -> Result<MediatedResponse> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("egress", request_id = %request_id);
        self.mediate(request_id, descriptor).instrument(span).await
    }

    async fn mediate(
        &self,
        request_id: String,
        descriptor: NetworkRequestDescriptor,
    ) -> Result<MediatedResponse> {
        let mut url = match self.authorize(&descriptor.url) {
            Ok(url) => url,
            Err(host) => return self.block(&request_id, host),
        };

        if let Some(query) = &descriptor.query {
            let sanitized = self.sanitizer.sanitize(&query.text);
            url.query_pairs_mut().append_pair(&query.param, &sanitized);
        }

        let method = descriptor.method.clone();
        let request = TransportRequest {
            method: descriptor.method,
            url: url.clone(),
            body: descriptor.body,
        };

        let started = Instant::now();
        let outcome = self.transport.send(request).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(response) => {
                let size_bytes = response.body.len() as u64;
                self.audit.record(AuditEvent::network_egress(
                    &request_id,
                    method.as_str(),
                    url.as_str(),
                    Some(response.status),
                    size_bytes,
                    elapsed,
                    None,
                ))?;
                self.counters.allowed.fetch_add(1, Ordering::Relaxed);

                tracing::info!(
                    method = %method,
                    host = url.host_str().unwrap_or_default(),
                    status = response.status,
                    bytes = size_bytes,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Egress request completed"
                );

                Ok(MediatedResponse {
                    metadata: ResponseMetadata {
                        request_id,
                        status: response.status,
                        size_bytes,
                        elapsed,
                        url: url.to_string(),
                    },
                    body: response.body,
                })
            }
            Err(err) => {
                let marker = match &err {
                    EgressError::Transport { kind, .. } => kind.as_str(),
                    _ => "error",
                };
                self.audit.record(AuditEvent::network_egress(
                    &request_id,
                    method.as_str(),
                    url.as_str(),
                    None,
                    0,
                    elapsed,
                    Some(marker),
                ))?;
                self.counters.failed.fetch_add(1, Ordering::Relaxed);

                tracing::warn!(
                    method = %method,
                    host = url.host_str().unwrap_or_default(),
                    failure = marker,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Egress request failed"
                );
                Err(err)
            }
        }
    }

    /// Parse the URL and check it against policy
    ///
    /// On denial returns the host to report. Credentials are stripped from
    /// an allowed URL so they reach neither the wire nor the audit log.
    /// Nothing here resolves DNS.
    fn authorize(&self, raw: &str) -> std::result::Result<Url, String> {
        let mut url = Url::parse(raw).map_err(|_| UNPARSEABLE_HOST.to_string())?;
        let host = url
            .host_str()
            .map(normalize_host)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| UNPARSEABLE_HOST.to_string())?;

        let scheme_ok = matches!(url.scheme(), "http" | "https");
        if scheme_ok && self.policy.is_allowed(&host) {
            if !url.username().is_empty() || url.password().is_some() {
                tracing::debug!(host = %host, "Stripping credentials from request URL");
                // http(s) URLs with a host always accept these
                let _ = url.set_username("");
                let _ = url.set_password(None);
            }
            Ok(url)
        } else {
            Err(host)
        }
    }

    fn block(&self, request_id: &str, host: String) -> Result<MediatedResponse> {
        let mode = self.policy.mode();
        self.audit
            .record(AuditEvent::network_blocked(request_id, &host, mode))?;
        self.counters.blocked.fetch_add(1, Ordering::Relaxed);

        tracing::warn!(host = %host, mode = %mode, "Network request blocked");
        Err(EgressError::SecurityViolation { host, mode })
    }
}

impl std::fmt::Debug for NetworkMediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMediator")
            .field("mode", &self.policy.mode())
            .field("audit", &self.audit.name())
            .field("transport", &self.transport.name())
            .finish()
    }
}
