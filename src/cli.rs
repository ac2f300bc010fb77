use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "dockpulse",
    author,
    version,
    about = "Container resource statistics collector and telemetry forwarder",
    long_about = None
)]
pub struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "/etc/dockpulse/config.yaml",
        env = "DOCKPULSE_CONFIG"
    )]
    pub config: PathBuf,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, env = "DOCKPULSE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "DOCKPULSE_LOG_FORMAT")]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the periodic collector (default if no command specified)
    Run,

    /// Run a single collection cycle and print its report
    Once,

    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show current version
    Version,
}

pub fn parse() -> Cli {
    Cli::parse()
}

impl Cli {
    pub fn effective_log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn effective_log_format(&self) -> &str {
        self.log_format.as_deref().unwrap_or("json")
    }
}
