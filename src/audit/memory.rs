//! In-memory audit sink for development, tests, and self-test capture

use super::{AuditEvent, AuditSink, AuditStream};
use crate::error::{EgressError, Result};
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

const DEFAULT_CAPACITY: usize = 10_000;
const FOLLOW_BUFFER: usize = 1024;

/// Bounded in-process audit log with live followers
pub struct MemoryAuditSink {
    events: Mutex<VecDeque<AuditEvent>>,
    max_events: usize,
    tx: broadcast::Sender<AuditEvent>,
}

impl MemoryAuditSink {
    /// Create a sink keeping at most `max_events` (oldest evicted first)
    pub fn new(max_events: usize) -> Self {
        let (tx, _) = broadcast::channel(FOLLOW_BUFFER);
        Self {
            events: Mutex::new(VecDeque::new()),
            max_events,
            tx,
        }
    }

    /// Snapshot of every retained event, oldest first
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<()> {
        {
            let mut events = self.events.lock().map_err(|_| EgressError::AuditWrite {
                target: "memory".to_string(),
                reason: "audit buffer lock poisoned".to_string(),
            })?;
            if self.max_events > 0 && events.len() >= self.max_events {
                events.pop_front();
            }
            events.push_back(event.clone());
        }
        // No live followers is not an error
        let _ = self.tx.send(event);
        Ok(())
    }

    fn read_recent(&self, max_lines: usize) -> Result<Vec<AuditEvent>> {
        let events = self.events.lock().map_err(|_| EgressError::AuditWrite {
            target: "memory".to_string(),
            reason: "audit buffer lock poisoned".to_string(),
        })?;
        let skip = events.len().saturating_sub(max_lines);
        Ok(events.iter().skip(skip).cloned().collect())
    }

    fn follow(&self) -> AuditStream {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|item| async move {
                match item {
                    Ok(event) => Some(Ok(event)),
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Audit follower lagged");
                        None
                    }
                }
            })
            .boxed()
    }

    fn name(&self) -> &str {
        "memory"
    }
}
