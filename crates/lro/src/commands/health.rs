//! Server health command.

use anyhow::Result;
use colored::Colorize;

use super::client;
use crate::config::Config;

pub async fn execute(config: &Config, json: bool) -> Result<()> {
    let client = client(config)?;

    let health = match client.health().await {
        Ok(health) => health,
        Err(e) => {
            if !json {
                println!("  {} ({}): {}", "✗ unreachable".red(), client.base_url(), e);
            }
            return Err(e.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&health)?);
        return Ok(());
    }

    println!("{}", "lro-server".cyan().bold());
    println!("{}", "─".repeat(50));
    let status = if health.status == "healthy" {
        format!("✓ {}", health.status).green()
    } else {
        format!("○ {}", health.status).yellow()
    };
    println!("  Server:    {} ({})", client.base_url(), status);
    println!("  Version:   {}", health.version);
    println!("  Uptime:    {}s", health.uptime_secs);

    let ops = &health.operations;
    println!();
    println!("  Operations: {}", ops.operations);
    println!("    in flight: {}", ops.in_flight);
    println!("    succeeded: {}", ops.succeeded);
    println!("    failed:    {}", ops.failed);
    println!("    timed out: {}", ops.timed_out);
    println!("  Cached results: {}", ops.cached_results);
    Ok(())
}
