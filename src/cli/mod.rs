pub mod audit_log;
pub mod sanitize;
pub mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// A3S Egress - Network egress policy and audit trail
#[derive(Debug, Parser)]
#[command(name = "a3s-egress", version, about)]
pub struct Cli {
    /// Config file (default: $A3S_EGRESS_CONFIG or ./configs/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the security self-test against the loaded policy
    SelfTest,

    /// Show recent audit events
    AuditLog {
        /// Number of recent events to show
        #[arg(long, short = 'n', default_value_t = 20)]
        lines: usize,

        /// Keep printing new events until interrupted
        #[arg(long, short = 'f')]
        follow: bool,

        /// Print raw JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Show the active mode, allowlist, and sanitization policy
    Status,

    /// Preview how query text would be sanitized before leaving the process
    Sanitize {
        /// Text to sanitize
        text: String,
    },
}
