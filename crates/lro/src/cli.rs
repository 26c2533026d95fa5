//! CLI argument definitions using clap derive macros.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Analysis Operation Orchestrator CLI
///
/// Submit documents for analysis and follow long-running operations.
#[derive(Parser, Debug)]
#[command(name = "lro")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Print raw JSON instead of a summary
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit work through lro-server
    Submit(SubmitArgs),

    /// Show an operation's status or result
    Status {
        /// Operation ID
        operation_id: String,
    },

    /// Wait for an operation to finish
    Wait {
        /// Operation ID
        operation_id: String,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },

    /// Release interest in an operation
    Cancel {
        /// Operation ID
        operation_id: String,
    },

    /// Check lro-server health
    Health,

    /// Run one submission in-process, straight against the upstream service
    Run(PayloadArgs),

    /// Print the request fingerprint of a payload
    Fingerprint(PayloadArgs),

    /// Show version information
    Version,
}

#[derive(Args, Debug, Clone)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub payload: PayloadArgs,

    /// Wait for the terminal result
    #[arg(long)]
    pub wait: bool,

    /// Retry the whole submission this many times on transient errors
    #[arg(long, default_value_t = 0)]
    pub retries: u32,
}

#[derive(Args, Debug, Clone)]
pub struct PayloadArgs {
    /// JSON payload file (overrides the individual flags)
    #[arg(long, short = 'f')]
    pub file: Option<PathBuf>,

    /// Analyzer ID
    #[arg(long, short = 'a', required_unless_present = "file")]
    pub analyzer: Option<String>,

    /// Document URL
    #[arg(long, short = 'd', required_unless_present = "file")]
    pub document: Option<String>,

    /// Inline analyzer schema (JSON file)
    #[arg(long, conflicts_with = "schema_url")]
    pub schema_file: Option<PathBuf>,

    /// Analyzer schema stored in blob storage
    #[arg(long)]
    pub schema_url: Option<String>,

    /// Extra analyze parameter (key=value, value parsed as JSON when possible)
    #[arg(long = "param", short = 'p', value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Output shape
    #[arg(long, value_enum, default_value_t = ShapeArg::Records)]
    pub shape: ShapeArg,

    /// Caller correlation ID
    #[arg(long)]
    pub request_id: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeArg {
    Records,
    Tabular,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_submit_flags() {
        let cli = Cli::try_parse_from([
            "lro",
            "submit",
            "-a",
            "invoice",
            "-d",
            "https://docs.example.com/a.pdf",
            "-p",
            "locale=en-US",
            "--wait",
            "--retries",
            "2",
        ])
        .unwrap();

        match cli.command {
            Commands::Submit(args) => {
                assert_eq!(args.payload.analyzer.as_deref(), Some("invoice"));
                assert_eq!(args.payload.params, vec!["locale=en-US".to_string()]);
                assert!(args.wait);
                assert_eq!(args.retries, 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_payload_requires_analyzer_without_file() {
        assert!(Cli::try_parse_from(["lro", "fingerprint", "-d", "https://x/a.pdf"]).is_err());
        assert!(Cli::try_parse_from(["lro", "fingerprint", "-f", "payload.json"]).is_ok());
    }
}
