use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use a3s_egress::cli::{Cli, Commands};
use a3s_egress::config::{self, EgressConfig};
use a3s_egress::{EgressGuard, FileAuditSink, QuerySanitizer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Diagnostics go to stderr; stdout stays for command output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {e}", "[a3s-egress]".red().bold());
            std::process::exit(1);
        }
    }
}

/// Returns `false` when the command completed but reported a failure
async fn run(cli: Cli) -> a3s_egress::Result<bool> {
    let path = config::resolve_path(cli.config.as_deref());
    let config = EgressConfig::load(&path)?;

    match cli.command {
        Commands::SelfTest => {
            let guard = EgressGuard::from_config(&config)?;
            return a3s_egress::cli::self_test::execute(&guard).await;
        }
        Commands::AuditLog {
            lines,
            follow,
            json,
        } => {
            // Validate policy even though only the log is read
            config.policy()?;
            let sink = FileAuditSink::open_read_only(config.audit_path());
            a3s_egress::cli::audit_log::execute(&sink, lines, follow, json).await?;
        }
        Commands::Status => {
            let policy = config.policy()?;
            a3s_egress::cli::status::execute(&policy, config.audit_path())?;
        }
        Commands::Sanitize { text } => {
            let policy = config.policy()?;
            let sanitizer = QuerySanitizer::new(*policy.sanitization());
            a3s_egress::cli::sanitize::execute(&text, &sanitizer)?;
        }
    }

    Ok(true)
}
