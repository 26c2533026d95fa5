//! Submit command.

use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use lro_core::client::{ApiClient, SubmitOutcome};
use lro_core::WorkPayload;
use tracing::warn;

use super::{build_payload, client, print_result, status};
use crate::cli::SubmitArgs;
use crate::config::Config;

/// Default bound on `--wait` when the caller gives none.
const WAIT_TIMEOUT: Duration = Duration::from_secs(600);

pub async fn execute(args: SubmitArgs, config: &Config, json: bool) -> Result<()> {
    let payload = build_payload(&args.payload)?;
    let client = client(config)?;

    match submit_with_retries(&client, &payload, args.retries).await? {
        SubmitOutcome::Completed(result) => print_result(&result, json),
        SubmitOutcome::Accepted {
            operation_id,
            status,
            ..
        } => {
            if args.wait {
                return status::wait_for(&client, &operation_id, WAIT_TIMEOUT, json).await;
            }
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "operation_id": operation_id, "status": status })
                );
            } else {
                println!(
                    "{} {} ({})",
                    "Accepted".yellow().bold(),
                    operation_id,
                    status.as_str()
                );
                println!("  Follow with: lro wait {}", operation_id);
            }
            Ok(())
        }
    }
}

/// Submit, retrying the whole submission on transient errors with doubling backoff.
async fn submit_with_retries(
    client: &ApiClient,
    payload: &WorkPayload,
    retries: u32,
) -> Result<SubmitOutcome> {
    let mut attempt = 0;
    loop {
        match client.submit(payload).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if e.is_retryable() && attempt < retries => {
                let delay = backoff(attempt);
                warn!(attempt = attempt + 1, error = %e, "Submission failed, retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(500u64.saturating_mul(1 << attempt.min(6)))
}
