//! Command-line interface

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// AgentQueue - durable prompt-execution orchestrator
#[derive(Debug, Parser)]
#[command(name = "aq", version, about)]
pub struct Cli {
    /// Path to a configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the scheduler and HTTP control plane in the foreground
    Run {
        /// Namespace override; derived from the working directory when unset
        #[arg(long)]
        namespace: Option<String>,

        /// State directory override
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// HTTP port override
        #[arg(long)]
        port: Option<u16>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from(["aq", "run", "--namespace", "dev", "--port", "9999"]);
        match cli.command {
            Commands::Run { namespace, port, .. } => {
                assert_eq!(namespace.as_deref(), Some("dev"));
                assert_eq!(port, Some(9999));
            }
        }
    }

    #[test]
    fn test_parse_with_config() {
        let cli = Cli::parse_from(["aq", "--config", "/etc/aq.yml", "run"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/aq.yml")));
    }
}
