//! Operation status commands: status, wait, cancel.

use std::time::Duration;

use anyhow::{Result, bail};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use lro_core::client::{ApiClient, ResultOutcome};
use tokio::time::Instant;

use super::{client, print_result};
use crate::config::Config;

const DEFAULT_WAIT: Duration = Duration::from_secs(1);

pub async fn status(operation_id: &str, config: &Config, json: bool) -> Result<()> {
    let client = client(config)?;

    match client.get_result(operation_id).await? {
        ResultOutcome::Completed(result) => print_result(&result, json),
        ResultOutcome::Processing {
            operation_id,
            status,
            poll_count,
            ..
        } => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "operation_id": operation_id,
                        "status": status,
                        "poll_count": poll_count,
                    })
                );
            } else {
                println!("{}", format!("Operation {}", operation_id).cyan().bold());
                println!("{}", "─".repeat(50));
                println!("  Status: {}", status.as_str().yellow());
                println!("  Polls:  {}", poll_count);
            }
            Ok(())
        }
    }
}

pub async fn wait(operation_id: &str, timeout_secs: u64, config: &Config, json: bool) -> Result<()> {
    let client = client(config)?;
    wait_for(&client, operation_id, Duration::from_secs(timeout_secs), json).await
}

/// Follow an operation until it settles, honoring the server's Retry-After.
pub(crate) async fn wait_for(
    client: &ApiClient,
    operation_id: &str,
    timeout: Duration,
    json: bool,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let spinner = spinner(&format!("Waiting for {}", operation_id));

    loop {
        let outcome = match client.get_result(operation_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                spinner.finish_and_clear();
                return Err(e.into());
            }
        };

        match outcome {
            ResultOutcome::Completed(result) => {
                spinner.finish_and_clear();
                return print_result(&result, json);
            }
            ResultOutcome::Processing {
                status,
                poll_count,
                retry_after,
                ..
            } => {
                spinner.set_message(format!(
                    "{} {} (polls: {})",
                    operation_id,
                    status.as_str(),
                    poll_count
                ));

                let now = Instant::now();
                if now >= deadline {
                    spinner.finish_and_clear();
                    bail!(
                        "Gave up waiting for {} after {}s; it is still {}",
                        operation_id,
                        timeout.as_secs(),
                        status.as_str()
                    );
                }
                let delay = retry_after.unwrap_or(DEFAULT_WAIT).min(deadline - now);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

pub async fn cancel(operation_id: &str, config: &Config) -> Result<()> {
    let client = client(config)?;
    client.cancel(operation_id).await?;
    println!("{} {}", "Released".green(), operation_id);
    Ok(())
}

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
