//! Audit sink trait: the append-only recorder for security events
//!
//! Every sink serialises concurrent `record` calls so that no two events
//! interleave mid-write. `record` never drops an event silently: if the
//! backing store cannot be written the call returns
//! [`EgressError::AuditWrite`](crate::EgressError::AuditWrite).

use crate::error::Result;
use futures::stream::BoxStream;

pub mod event;
pub mod file;
pub mod memory;

pub use event::{AuditEvent, AuditEventKind, QUERY_LOG_MAX_CHARS};
pub use file::FileAuditSink;
pub use memory::MemoryAuditSink;

/// Lazy, unbounded stream of newly appended events
///
/// The stream never ends on its own; drop it to stop following.
pub type AuditStream = BoxStream<'static, Result<AuditEvent>>;

/// Append-only structured event recorder
pub trait AuditSink: Send + Sync {
    /// Append one event
    ///
    /// Events from a single caller are persisted in call order.
    fn record(&self, event: AuditEvent) -> Result<()>;

    /// Return up to `max_lines` of the most recent events, oldest first
    fn read_recent(&self, max_lines: usize) -> Result<Vec<AuditEvent>>;

    /// Follow events appended after this call
    ///
    /// Each call starts a fresh, independent stream.
    fn follow(&self) -> AuditStream;

    /// Sink name (e.g., "file", "memory")
    fn name(&self) -> &str;
}
