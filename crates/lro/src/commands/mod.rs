//! Command implementations for lro CLI.
//!
//! Each submodule implements the logic for a command group.

pub mod fingerprint;
pub mod health;
pub mod run;
pub mod status;
pub mod submit;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use lro_core::client::ApiClient;
use lro_core::{CanonicalResult, OutputShape, SchemaSource, WorkPayload};
use serde_json::Value;

use crate::cli::{PayloadArgs, ShapeArg};
use crate::config::Config;

/// Build a server client from configuration.
pub(crate) fn client(config: &Config) -> Result<ApiClient> {
    let client = ApiClient::new(config.server_url())?;
    Ok(match &config.api_token {
        Some(token) => client.with_token(token),
        None => client,
    })
}

/// Assemble a payload from a JSON file or from individual flags.
pub(crate) fn build_payload(args: &PayloadArgs) -> Result<WorkPayload> {
    if let Some(path) = &args.file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload file {}", path.display()))?;
        return serde_json::from_str(&content).context("Failed to parse payload file");
    }

    let (Some(analyzer), Some(document)) = (&args.analyzer, &args.document) else {
        bail!("--analyzer and --document are required without --file");
    };

    let mut payload = WorkPayload::new(analyzer, document).with_output_shape(match args.shape {
        ShapeArg::Records => OutputShape::Records,
        ShapeArg::Tabular => OutputShape::Tabular,
    });

    if let Some(path) = &args.schema_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema file {}", path.display()))?;
        let definition: Value =
            serde_json::from_str(&content).context("Schema file is not valid JSON")?;
        payload = payload.with_schema(SchemaSource::Inline { definition });
    } else if let Some(url) = &args.schema_url {
        payload = payload.with_schema(SchemaSource::Blob { url: url.clone() });
    }

    for param in &args.params {
        let (key, value) = parse_param(param)?;
        payload = payload.with_parameter(key, value);
    }

    if let Some(id) = &args.request_id {
        payload = payload.with_client_request_id(id);
    }

    Ok(payload)
}

/// Split `key=value`; the value is taken as JSON when it parses, else as a string.
fn parse_param(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("Invalid parameter '{}', expected KEY=VALUE", raw);
    };
    if key.trim().is_empty() {
        bail!("Invalid parameter '{}', key is empty", raw);
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

/// Print a canonical result, as JSON or as a summary.
pub(crate) fn print_result(result: &CanonicalResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!("{}", format!("Result {}", result.id).cyan().bold());
    println!("{}", "─".repeat(50));
    println!("  Status:  {}", result.status.green());
    println!("  Items:   {}", result.content_items.len());
    for (key, value) in &result.metadata {
        println!("  {}: {}", key.dimmed(), value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args() -> PayloadArgs {
        PayloadArgs {
            file: None,
            analyzer: Some("invoice".into()),
            document: Some("https://docs.example.com/a.pdf".into()),
            schema_file: None,
            schema_url: None,
            params: vec![],
            shape: ShapeArg::Records,
            request_id: None,
        }
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("pages=3").unwrap(),
            ("pages".to_string(), serde_json::json!(3))
        );
        assert_eq!(
            parse_param("locale=en-US").unwrap(),
            ("locale".to_string(), serde_json::json!("en-US"))
        );
        assert_eq!(
            parse_param("filter=a=b").unwrap(),
            ("filter".to_string(), serde_json::json!("a=b"))
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=3").is_err());
    }

    #[test]
    fn test_build_payload_from_flags() {
        let mut args = args();
        args.params = vec!["locale=en-US".into()];
        args.schema_url = Some("https://blobs.example.com/schema.json".into());
        args.shape = ShapeArg::Tabular;
        args.request_id = Some("req-1".into());

        let payload = build_payload(&args).unwrap();
        assert_eq!(payload.analyzer_id, "invoice");
        assert_eq!(payload.output_shape, OutputShape::Tabular);
        assert_eq!(payload.parameters["locale"], "en-US");
        assert_eq!(payload.client_request_id.as_deref(), Some("req-1"));
        assert_eq!(
            payload.schema,
            Some(SchemaSource::Blob {
                url: "https://blobs.example.com/schema.json".into()
            })
        );
    }

    #[test]
    fn test_build_payload_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"analyzer_id": "receipt", "document_url": "https://docs.example.com/r.png"}}"#
        )
        .unwrap();

        let mut args = args();
        args.file = Some(file.path().to_path_buf());
        let payload = build_payload(&args).unwrap();
        assert_eq!(payload.analyzer_id, "receipt");
        assert_eq!(payload.document_url, "https://docs.example.com/r.png");
    }
}
