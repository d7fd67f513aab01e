use colored::Colorize;

use crate::error::Result;
use crate::policy::{PolicyStore, SecurityMode};

/// Execute the `status` command: display the loaded security policy.
pub fn execute(policy: &PolicyStore, audit_path: &std::path::Path) -> Result<()> {
    let mode = match policy.mode() {
        SecurityMode::Offline => policy.mode().to_string().green().bold(),
        SecurityMode::Egress => policy.mode().to_string().yellow().bold(),
    };
    println!("{:<18} {}", "Mode:", mode);

    let entries: Vec<String> = policy.allowlist().map(|e| e.to_string()).collect();
    if entries.is_empty() {
        println!("{:<18} {}", "Allowlist:", "(none)".dimmed());
    } else if policy.mode() == SecurityMode::Offline {
        println!(
            "{:<18} {} {}",
            "Allowlist:",
            entries.join(", ").dimmed(),
            "(inactive)".dimmed()
        );
    } else {
        println!("{:<18} {}", "Allowlist:", entries.join(", ").cyan());
    }

    let sanitization = policy.sanitization();
    println!(
        "{:<18} max {} chars, strip quotes: {}, strip specials: {}",
        "Sanitization:",
        sanitization.max_query_length,
        sanitization.strip_quote_characters,
        sanitization.strip_special_characters
    );
    println!("{:<18} {}", "Audit log:", audit_path.display());
    Ok(())
}
