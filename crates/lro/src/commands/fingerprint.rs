//! Fingerprint command.

use anyhow::Result;
use lro_core::RequestFingerprint;

use super::build_payload;
use crate::cli::PayloadArgs;

pub fn execute(args: &PayloadArgs, json: bool) -> Result<()> {
    let payload = build_payload(args)?;
    let fingerprint = RequestFingerprint::of(&payload)?;

    if json {
        println!("{}", serde_json::json!({ "fingerprint": fingerprint.as_str() }));
    } else {
        println!("{}", fingerprint.as_str());
    }
    Ok(())
}
