//! # a3s-egress
//!
//! Network egress policy, mediation, and audit trail for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-egress` is the security core for a locally-run assistant that must
//! prove it never leaks data off the machine. Every outbound request goes
//! through one [`NetworkMediator`], which checks it against an immutable
//! [`PolicyStore`], sanitizes any query text, and writes a metadata-only
//! [`AuditEvent`] to an append-only log. Offline mode denies every host.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use a3s_egress::{MemoryAuditSink, NetworkMediator, NetworkRequestDescriptor, PolicyStore};
//! use a3s_egress::transport::StubTransport;
//!
//! # async fn example() -> a3s_egress::Result<()> {
//! let mediator = NetworkMediator::new(
//!     Arc::new(PolicyStore::offline()),
//!     Arc::new(MemoryAuditSink::default()),
//!     Arc::new(StubTransport::respond(200, "")),
//! );
//!
//! let err = mediator
//!     .request(NetworkRequestDescriptor::get("https://example.com/"))
//!     .await
//!     .unwrap_err();
//! assert!(err.is_violation());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modes
//!
//! - **offline**: no outbound access at all
//! - **egress**: outbound access to allowlisted domains (and their subdomains) only
//!
//! ## Architecture
//!
//! - **PolicyStore**: mode, allowlist and sanitization limits, loaded once
//! - **QuerySanitizer**: pure, idempotent scrubbing of outbound query text
//! - **AuditSink** trait: append-only event log (file or memory)
//! - **Transport** trait: the only code that touches the wire
//! - **NetworkMediator**: the enforcement chokepoint
//! - **SelfTestHarness**: verifies the chokepoint against the deployed policy

pub mod audit;
pub mod cli;
pub mod config;
pub mod error;
pub mod guard;
pub mod mediator;
pub mod policy;
pub mod sanitizer;
pub mod selftest;
pub mod transport;

// Re-export core types
pub use audit::{
    AuditEvent, AuditEventKind, AuditSink, AuditStream, FileAuditSink, MemoryAuditSink,
};
pub use config::EgressConfig;
pub use error::{EgressError, Result, TransportErrorKind};
pub use guard::EgressGuard;
pub use mediator::{
    MediatedResponse, MediatorStats, NetworkMediator, NetworkRequestDescriptor, ResponseMetadata,
};
pub use policy::{AllowlistEntry, PolicyStore, SanitizationPolicy, SecurityMode};
pub use sanitizer::QuerySanitizer;
pub use selftest::{SelfTestHarness, SelfTestReport, SelfTestResult};
pub use transport::{HttpTransport, StubTransport, Transport};
