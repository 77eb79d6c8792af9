//! Command-line argument parsing

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "redline-worker",
    about = "Redline contract review worker",
    version,
    long_about = "Runs contract review workflows: fires schedules, sweeps expired \
                  audit events and executes single documents from the command line."
)]
pub struct Args {
    /// Path to configuration file; environment defaults apply when omitted
    #[arg(short, long, env = "REDLINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Enable JSON log format (useful for production)
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fire schedules and sweep the audit log until interrupted
    Serve {
        /// JSON file with schedules to register at startup
        #[arg(long)]
        schedules: Option<PathBuf>,
    },

    /// Review one document and print the outcome as JSON
    Run {
        /// Template to execute
        #[arg(short, long, default_value = "standard_review")]
        template: String,

        /// Document to review
        document: PathBuf,

        /// Caller preference, e.g. "fast" or "thorough"
        #[arg(long)]
        preference: Option<String>,

        /// Document category hint
        #[arg(long)]
        category: Option<String>,

        /// Lower the template's retry budget
        #[arg(long)]
        max_retries: Option<u32>,

        /// Actor recorded on audit events
        #[arg(long)]
        actor: Option<String>,
    },

    /// List registered templates
    Templates {
        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        include_inactive: bool,
    },
}

impl Args {
    /// Validate the arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(ref path) = self.config {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
        }
        match &self.command {
            Command::Serve {
                schedules: Some(path),
            } if !path.exists() => bail!("Schedule file not found: {}", path.display()),
            Command::Run { document, .. } if !document.exists() => {
                bail!("Document not found: {}", document.display())
            }
            _ => Ok(()),
        }
    }
}
