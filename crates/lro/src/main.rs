//! lro - Analysis Operation Orchestrator CLI
//!
//! Talks to lro-server, or runs a single submission in-process with `lro run`.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;
mod commands;
mod config;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; logs go to stderr so --json output stays clean
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::from_default_env()
                .add_directive("lro=info".parse()?)
                .add_directive("lro_core=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    // Load configuration
    let config = config::Config::load()?;

    // Execute command
    match cli.command {
        Commands::Submit(args) => commands::submit::execute(args, &config, json).await,
        Commands::Status { operation_id } => {
            commands::status::status(&operation_id, &config, json).await
        }
        Commands::Wait {
            operation_id,
            timeout_secs,
        } => commands::status::wait(&operation_id, timeout_secs, &config, json).await,
        Commands::Cancel { operation_id } => commands::status::cancel(&operation_id, &config).await,
        Commands::Health => commands::health::execute(&config, json).await,
        Commands::Run(args) => commands::run::execute(&args, &config, json).await,
        Commands::Fingerprint(args) => commands::fingerprint::execute(&args, json),
        Commands::Version => {
            println!("lro {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
