//! File-backed audit sink: JSON Lines, append-only
//!
//! The file is opened once in append mode and never truncated or rewritten.
//! Writers are serialised by a mutex; each event is written as one complete
//! line with a single `write_all`.

use super::{AuditEvent, AuditSink, AuditStream};
use crate::error::{EgressError, Result};
use futures::StreamExt;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// How often `follow` checks the file for new lines
const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Append-only JSON Lines audit log
pub struct FileAuditSink {
    path: PathBuf,
    /// `None` when opened for inspection only
    file: Option<Mutex<File>>,
    poll_interval: Duration,
}

impl FileAuditSink {
    /// Open (or create) the log at `path`, creating parent directories
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| write_failure(&path, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| write_failure(&path, e))?;

        tracing::debug!(path = %path.display(), "Audit log opened");

        Ok(Self {
            path,
            file: Some(Mutex::new(file)),
            poll_interval: FOLLOW_POLL_INTERVAL,
        })
    }

    /// Open the log for reading and following only
    ///
    /// Touches nothing on disk: a missing log reads as empty, and `record`
    /// fails with `AuditWrite`.
    pub fn open_read_only(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
            poll_interval: FOLLOW_POLL_INTERVAL,
        }
    }

    /// Override the `follow` polling interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_failure(path: &Path, e: impl std::fmt::Display) -> EgressError {
    EgressError::AuditWrite {
        target: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// Parse a log line, skipping (and reporting) anything unreadable
fn parse_line(line: &str) -> Option<AuditEvent> {
    if line.trim().is_empty() {
        return None;
    }
    match AuditEvent::from_line(line) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping unreadable audit log line");
            None
        }
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) -> Result<()> {
        let mut line = event.to_line()?;
        line.push('\n');

        let Some(file) = &self.file else {
            return Err(write_failure(&self.path, "audit log opened read-only"));
        };
        let mut file = file
            .lock()
            .map_err(|_| write_failure(&self.path, "audit file lock poisoned"))?;

        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| {
                tracing::error!(
                    path = %self.path.display(),
                    event = event.name(),
                    error = %e,
                    "Audit write failed"
                );
                write_failure(&self.path, e)
            })
    }

    fn read_recent(&self, max_lines: usize) -> Result<Vec<AuditEvent>> {
        if max_lines == 0 {
            return Ok(Vec::new());
        }
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut recent = VecDeque::with_capacity(max_lines.min(4096));
        // Split on raw bytes so a line with invalid UTF-8 is skipped, not fatal
        for line in BufReader::new(file).split(b'\n') {
            let line = line?;
            if let Some(event) = parse_line(&String::from_utf8_lossy(&line)) {
                if recent.len() == max_lines {
                    recent.pop_front();
                }
                recent.push_back(event);
            }
        }
        Ok(recent.into_iter().collect())
    }

    fn follow(&self) -> AuditStream {
        let start = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let tail = Tail {
            path: self.path.clone(),
            offset: start,
            partial: Vec::new(),
            ready: VecDeque::new(),
            poll_interval: self.poll_interval,
            failing: false,
        };
        futures::stream::unfold(tail, |mut tail| async move {
            loop {
                if let Some(event) = tail.ready.pop_front() {
                    return Some((Ok::<_, EgressError>(event), tail));
                }
                tail.poll().await;
                if tail.ready.is_empty() {
                    tokio::time::sleep(tail.poll_interval).await;
                }
            }
        })
        .boxed()
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Polling reader state for `follow`
struct Tail {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
    ready: VecDeque<AuditEvent>,
    poll_interval: Duration,
    /// Set while reads keep failing, so the failure is reported once
    failing: bool,
}

impl Tail {
    async fn poll(&mut self) {
        match self.read_appended().await {
            Ok(()) => {
                if self.failing {
                    tracing::info!(path = %self.path.display(), "Audit follow resumed");
                }
                self.failing = false;
            }
            Err(e) if self.failing => {
                tracing::debug!(path = %self.path.display(), error = %e, "Audit follow read failed");
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Audit follow read failed");
                self.failing = true;
            }
        }
    }

    async fn read_appended(&mut self) -> std::io::Result<()> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        let len = file.metadata().await?.len();
        if len < self.offset {
            // replaced or truncated underneath us; start over
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(());
        }

        file.seek(std::io::SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        let read = file.read_to_end(&mut buf).await?;
        self.offset += read as u64;
        self.partial.extend_from_slice(&buf);

        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = parse_line(&line) {
                self.ready.push_back(event);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sink_in(dir: &tempfile::TempDir) -> FileAuditSink {
        FileAuditSink::open(dir.path().join("logs").join("audit.log")).unwrap()
    }

    #[test]
    fn test_creates_parent_and_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(&dir);
        sink.record(AuditEvent::error("a", "one")).unwrap();
        sink.record(AuditEvent::error("b", "two")).unwrap();

        let raw = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.ends_with('\n'));
        for line in raw.lines() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["event"], "error");
        }
    }

    #[test]
    fn test_reopen_preserves_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        sink_in(&dir).record(AuditEvent::error("a", "one")).unwrap();
        let sink = sink_in(&dir);
        sink.record(AuditEvent::error("b", "two")).unwrap();
        assert_eq!(sink.read_recent(10).unwrap().len(), 2);
    }

    #[test]
    fn test_read_recent_returns_tail_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(&dir);
        for i in 0..10 {
            sink.record(AuditEvent::self_test_result(format!("t{i}"), true, ""))
                .unwrap();
        }
        let recent = sink.read_recent(3).unwrap();
        let names: Vec<String> = recent
            .iter()
            .map(|e| match &e.kind {
                crate::audit::AuditEventKind::SelfTestResult { name, .. } => name.clone(),
                _ => String::new(),
            })
            .collect();
        assert_eq!(names, vec!["t7", "t8", "t9"]);
        assert!(sink.read_recent(0).unwrap().is_empty());
    }

    #[test]
    fn test_read_recent_skips_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(&dir);
        sink.record(AuditEvent::error("a", "one")).unwrap();
        {
            let mut f = OpenOptions::new().append(true).open(sink.path()).unwrap();
            writeln!(f, "not json").unwrap();
        }
        sink.record(AuditEvent::error("b", "two")).unwrap();
        assert_eq!(sink.read_recent(10).unwrap().len(), 2);
    }

    #[test]
    fn test_read_recent_skips_invalid_utf8_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(&dir);
        sink.record(AuditEvent::error("a", "one")).unwrap();
        {
            let mut f = OpenOptions::new().append(true).open(sink.path()).unwrap();
            f.write_all(b"\xff\xfe garbage\n").unwrap();
        }
        sink.record(AuditEvent::error("b", "two")).unwrap();

        let events = sink.read_recent(10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.name() == "error"));
    }

    #[test]
    fn test_read_only_touches_nothing_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("audit.log");
        let viewer = FileAuditSink::open_read_only(&path);

        assert!(viewer.read_recent(10).unwrap().is_empty());
        assert!(!path.parent().unwrap().exists());

        let err = viewer.record(AuditEvent::error("a", "one")).unwrap_err();
        assert!(matches!(err, EgressError::AuditWrite { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_read_only_sees_writer_events() {
        let dir = tempfile::tempdir().unwrap();
        let writer = sink_in(&dir);
        writer.record(AuditEvent::error("a", "one")).unwrap();

        let viewer = FileAuditSink::open_read_only(writer.path());
        assert_eq!(viewer.read_recent(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_follow_recovers_after_log_removed() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(&dir).with_poll_interval(Duration::from_millis(10));
        let mut stream = sink.follow();

        std::fs::remove_file(sink.path()).unwrap();
        // several failing polls, then the log comes back
        tokio::time::sleep(Duration::from_millis(50)).await;
        let writer = FileAuditSink::open(sink.path()).unwrap();
        writer.record(AuditEvent::error("back", "again")).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.name(), "error");
    }

    #[test]
    fn test_concurrent_records_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(sink_in(&dir));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        sink.record(AuditEvent::error(
                            format!("thread-{t}"),
                            format!("{i}-{}", "x".repeat(512)),
                        ))
                        .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let raw = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(raw.lines().count(), 400);
        for line in raw.lines() {
            AuditEvent::from_line(line).unwrap();
        }
    }

    #[test]
    fn test_open_unwritable_location_is_audit_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileAuditSink::open(dir.path()).err().unwrap();
        assert!(err.is_fatal());
        assert!(matches!(err, EgressError::AuditWrite { .. }));
    }

    #[tokio::test]
    async fn test_follow_yields_appended_events() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(&dir).with_poll_interval(Duration::from_millis(10));
        sink.record(AuditEvent::error("old", "already there")).unwrap();

        let mut stream = sink.follow();
        sink.record(AuditEvent::self_test_result("new", true, "appended")).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.name(), "self_test_result");
    }
}
