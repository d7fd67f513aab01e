use colored::Colorize;
use futures::StreamExt;

use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::error::Result;

/// Execute the `audit-log` command: print recent events, then optionally
/// follow the log until Ctrl-C.
pub async fn execute(sink: &dyn AuditSink, lines: usize, follow: bool, json: bool) -> Result<()> {
    // Subscribe before reading history so nothing appended in between is missed
    let stream = follow.then(|| sink.follow());

    let recent = sink.read_recent(lines)?;
    if recent.is_empty() && !follow {
        println!("No audit events recorded yet.");
        return Ok(());
    }
    for event in &recent {
        print_event(event, json)?;
    }

    let Some(mut stream) = stream else {
        return Ok(());
    };
    if !json {
        println!("{}", "── following (Ctrl-C to stop) ──".dimmed());
    }
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = stream.next() => match next {
                Some(Ok(event)) => print_event(&event, json)?,
                Some(Err(e)) => tracing::warn!(error = %e, "Audit follow error"),
                None => break,
            },
        }
    }
    Ok(())
}

fn print_event(event: &AuditEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", event.to_line()?);
    } else {
        println!(
            "{} {} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            colored_name(&event.kind),
            summary(&event.kind)
        );
    }
    Ok(())
}

fn colored_name(kind: &AuditEventKind) -> colored::ColoredString {
    let name = format!("{:<18}", kind.name());
    match kind {
        AuditEventKind::NetworkBlocked { .. } | AuditEventKind::Error { .. } => name.red(),
        AuditEventKind::NetworkEgress { error: Some(_), .. } => name.yellow(),
        AuditEventKind::NetworkEgress { .. } => name.cyan(),
        AuditEventKind::SelfTestResult { passed: false, .. } => name.red(),
        _ => name.normal(),
    }
}

/// One-line human summary of an event's fields
fn summary(kind: &AuditEventKind) -> String {
    match kind {
        AuditEventKind::NetworkEgress {
            method,
            url,
            status_code,
            response_size_bytes,
            execution_time_ms,
            error,
            ..
        } => {
            let status = status_code
                .map(|s| s.to_string())
                .unwrap_or_else(|| error.clone().unwrap_or_else(|| "-".to_string()));
            format!(
                "{} {} -> {} ({} bytes, {:.1}ms)",
                method, url, status, response_size_bytes, execution_time_ms
            )
        }
        AuditEventKind::NetworkBlocked { host, mode, .. } => {
            format!("{} denied under mode {}", host, mode)
        }
        AuditEventKind::QueryIssued {
            query,
            num_results,
            execution_time_ms,
        } => format!(
            "{:?} -> {} results ({:.1}ms)",
            query, num_results, execution_time_ms
        ),
        AuditEventKind::ModelInference {
            model,
            input_tokens,
            output_tokens,
            inference_time_ms,
        } => format!(
            "{} {}+{} tokens ({:.1}ms)",
            model, input_tokens, output_tokens, inference_time_ms
        ),
        AuditEventKind::SelfTestResult {
            name,
            passed,
            message,
        } => format!(
            "{} {}: {}",
            name,
            if *passed { "PASSED" } else { "FAILED" },
            message
        ),
        AuditEventKind::DocumentIngestion {
            source_path,
            doc_type,
            num_chunks,
        } => format!("{} ({}, {} chunks)", source_path, doc_type, num_chunks),
        AuditEventKind::Error {
            error_type,
            message,
        } => format!("{}: {}", error_type, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::SecurityMode;
    use std::time::Duration;

    #[test]
    fn test_summary_blocked() {
        let event = AuditEvent::network_blocked("id", "evil.example", SecurityMode::Offline);
        assert_eq!(summary(&event.kind), "evil.example denied under mode offline");
    }

    #[test]
    fn test_summary_failed_egress_shows_marker() {
        let event = AuditEvent::network_egress(
            "id",
            "GET",
            "https://arxiv.org/",
            None,
            0,
            Duration::from_millis(5),
            Some("timeout"),
        );
        let line = summary(&event.kind);
        assert!(line.starts_with("GET https://arxiv.org/ -> timeout"));
    }

    #[test]
    fn test_summary_self_test() {
        let event = AuditEvent::self_test_result("query_sanitization", false, "quotes remain");
        assert_eq!(
            summary(&event.kind),
            "query_sanitization FAILED: quotes remain"
        );
    }
}
