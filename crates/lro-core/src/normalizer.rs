//! Response normalization into [`CanonicalResult`].
//!
//! The upstream returns content under several shapes depending on call path and
//! service version. Known paths are tried in a fixed order; the first array found
//! wins. Normalization never fails: an unrecognized body yields an empty
//! content list and a diagnostic note in the metadata.

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::classify::body_status;
use crate::status::normalize_status;
use crate::types::{CanonicalResult, OutputShape};

/// Extraction paths in priority order: (label, JSON pointer)
const EXTRACTION_PATHS: &[(&str, &str)] = &[
    ("contents", "/contents"),
    ("result.contents", "/result/contents"),
    ("analyzeResult.contents", "/analyzeResult/contents"),
    ("analyzeResult.tables", "/analyzeResult/tables"),
    ("result.analyzeResult.tables", "/result/analyzeResult/tables"),
];

/// Diagnostic keys copied into metadata when the upstream reports them.
const DIAGNOSTIC_KEYS: &[&str] = &["analyzerId", "apiVersion", "createdAt", "modelVersion", "warnings"];

#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions<'a> {
    /// Id to use when the upstream omitted one
    pub fallback_id: Option<&'a str>,
    pub shape: OutputShape,
}

/// Build the canonical result for any upstream payload shape.
pub fn normalize(body: &Value, options: &NormalizeOptions<'_>) -> CanonicalResult {
    let mut metadata = Map::new();

    let raw_status = body_status(body);
    let status = raw_status
        .as_deref()
        .map(normalize_status)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "succeeded".to_string());
    if let Some(raw) = raw_status {
        metadata.insert("upstream_status".into(), json!(raw));
    }

    let id = string_at(body, "/id")
        .or_else(|| string_at(body, "/result/id"))
        .or_else(|| options.fallback_id.map(str::to_string))
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    for key in DIAGNOSTIC_KEYS {
        let found = body
            .pointer(&format!("/result/{}", key))
            .or_else(|| body.pointer(&format!("/analyzeResult/{}", key)))
            .or_else(|| body.get(*key));
        if let Some(value) = found {
            metadata.insert((*key).to_string(), value.clone());
        }
    }

    let matched = EXTRACTION_PATHS
        .iter()
        .find_map(|(label, pointer)| body.pointer(pointer).and_then(Value::as_array).map(|items| (*label, items)));

    let mut content_items = match matched {
        Some((label, items)) => {
            debug!(extraction_path = label, items = items.len(), "Matched content path");
            metadata.insert("extraction_path".into(), json!(label));
            items.clone()
        }
        None => {
            debug!("No known content path matched");
            metadata.insert(
                "note".into(),
                json!("no recognized content shape in upstream payload"),
            );
            Vec::new()
        }
    };

    let is_table_path = matched.is_some_and(|(label, _)| label.ends_with("tables"));
    if options.shape == OutputShape::Tabular && !is_table_path && !content_items.is_empty() {
        if content_items.iter().any(|item| item.get("fields").is_some_and(Value::is_object)) {
            content_items = records_to_tables(&content_items);
            metadata.insert(
                "conversion".into(),
                json!("records flattened to tables (best effort)"),
            );
        } else {
            metadata.insert(
                "conversion".into(),
                json!("tabular output requested but content has no fields to tabulate"),
            );
        }
    }
    metadata.insert(
        "shape".into(),
        json!(match options.shape {
            OutputShape::Records => "records",
            OutputShape::Tabular => "tabular",
        }),
    );

    CanonicalResult {
        id,
        status,
        content_items,
        metadata,
    }
}

fn string_at(body: &Value, pointer: &str) -> Option<String> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tabular conversion
// ─────────────────────────────────────────────────────────────────────────────

enum FieldValue {
    Scalar(Value),
    Array(Vec<Value>),
    Object(Map<String, Value>),
}

/// Unwrap a typed upstream field (`{"type": "string", "valueString": "x"}`)
/// or pass a plain JSON value through.
fn field_value(field: &Value) -> FieldValue {
    match field {
        Value::Object(map) if map.contains_key("type") || map.keys().any(|k| k.starts_with("value")) => {
            if let Some(Value::Array(items)) = map.get("valueArray") {
                return FieldValue::Array(items.clone());
            }
            if let Some(Value::Object(obj)) = map.get("valueObject") {
                return FieldValue::Object(obj.clone());
            }
            let scalar = map
                .iter()
                .find(|(k, _)| k.starts_with("value"))
                .map(|(_, v)| v.clone())
                .or_else(|| map.get("content").cloned())
                .unwrap_or(Value::Null);
            FieldValue::Scalar(scalar)
        }
        Value::Object(map) => FieldValue::Object(map.clone()),
        Value::Array(items) => FieldValue::Array(items.clone()),
        other => FieldValue::Scalar(other.clone()),
    }
}

fn cell(value: &Value) -> Value {
    match field_value(value) {
        FieldValue::Scalar(v) => v,
        FieldValue::Array(items) => Value::Array(items.iter().map(cell).collect()),
        FieldValue::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), cell(v))).collect()),
    }
}

fn table(name: &str, columns: Vec<String>, rows: Vec<Value>) -> Value {
    json!({
        "kind": "table",
        "name": name,
        "columns": columns,
        "rows": rows,
    })
}

/// Flatten record-shaped items: scalar fields become `[field, value]` rows of a
/// `fields` table, and each array field becomes its own table.
fn records_to_tables(items: &[Value]) -> Vec<Value> {
    let mut scalar_rows = Vec::new();
    let mut tables = Vec::new();

    for fields in items
        .iter()
        .filter_map(|item| item.get("fields").and_then(Value::as_object))
    {
        for (name, field) in fields {
            match field_value(field) {
                FieldValue::Scalar(v) => scalar_rows.push(json!([name, v])),
                FieldValue::Object(map) => {
                    for (key, v) in &map {
                        scalar_rows.push(json!([format!("{}.{}", name, key), cell(v)]));
                    }
                }
                FieldValue::Array(elements) => tables.push(array_table(name, &elements)),
            }
        }
    }

    let mut out = Vec::with_capacity(tables.len() + 1);
    if !scalar_rows.is_empty() {
        out.push(table(
            "fields",
            vec!["field".to_string(), "value".to_string()],
            scalar_rows,
        ));
    }
    out.extend(tables);
    out
}

fn array_table(name: &str, elements: &[Value]) -> Value {
    let unwrapped: Vec<FieldValue> = elements.iter().map(field_value).collect();

    let mut columns: Vec<String> = Vec::new();
    for element in &unwrapped {
        match element {
            FieldValue::Object(map) => {
                for key in map.keys() {
                    if !columns.iter().any(|c| c == key) {
                        columns.push(key.clone());
                    }
                }
            }
            _ => {
                if !columns.iter().any(|c| c == "value") {
                    columns.push("value".to_string());
                }
            }
        }
    }

    let rows = unwrapped
        .iter()
        .map(|element| {
            let row: Vec<Value> = columns
                .iter()
                .map(|column| match element {
                    FieldValue::Object(map) => map.get(column).map(cell).unwrap_or(Value::Null),
                    FieldValue::Scalar(v) if column == "value" => v.clone(),
                    FieldValue::Array(items) if column == "value" => {
                        Value::Array(items.iter().map(cell).collect())
                    }
                    _ => Value::Null,
                })
                .collect();
            Value::Array(row)
        })
        .collect();

    table(name, columns, rows)
}
