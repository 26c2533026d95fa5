//! Analyzer field-schema shaping.
//!
//! Definitions arrive with `fields` either as an array of named entries or as
//! a name-keyed object, at the top level or under `fieldSchema`. The upstream
//! contract version this crate is pinned to accepts only the object form under
//! `fieldSchema`, so everything is rewritten into that shape.

use serde_json::{Map, Value, json};

const DEFAULT_FIELD_TYPE: &str = "string";

/// Rewrite an analyzer definition into the pinned object-form field schema.
///
/// An empty field list is valid and yields an empty `fields` object.
pub fn normalize_field_schema(definition: &Value) -> Result<Value, String> {
    let Value::Object(source) = definition else {
        return Err("analyzer definition must be a JSON object".to_string());
    };

    let mut out = source.clone();
    let nested = source
        .get("fieldSchema")
        .and_then(Value::as_object)
        .cloned();

    let raw_fields = nested
        .as_ref()
        .and_then(|fs| fs.get("fields"))
        .or_else(|| source.get("fields"))
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));

    let fields = match raw_fields {
        Value::Array(entries) => fields_from_array(entries)?,
        Value::Object(map) => fields_from_object(map)?,
        Value::Null => Map::new(),
        other => {
            return Err(format!(
                "fields must be an array or an object, got {}",
                type_name(&other)
            ));
        }
    };

    out.remove("fields");
    let mut field_schema = nested.unwrap_or_default();
    field_schema.insert("fields".to_string(), Value::Object(fields));
    out.insert("fieldSchema".to_string(), Value::Object(field_schema));

    Ok(Value::Object(out))
}

fn fields_from_array(entries: Vec<Value>) -> Result<Map<String, Value>, String> {
    let mut fields = Map::new();
    for (index, entry) in entries.into_iter().enumerate() {
        let Value::Object(mut entry) = entry else {
            return Err(format!("field #{index} must be an object"));
        };
        let name = match entry.remove("name") {
            Some(Value::String(name)) if !name.trim().is_empty() => name,
            _ => return Err(format!("field #{index} is missing a name")),
        };
        if fields.contains_key(&name) {
            return Err(format!("duplicate field name '{name}'"));
        }
        fields.insert(name, with_default_type(entry));
    }
    Ok(fields)
}

fn fields_from_object(map: Map<String, Value>) -> Result<Map<String, Value>, String> {
    let mut fields = Map::new();
    for (name, def) in map {
        if name.trim().is_empty() {
            return Err("field names must not be empty".to_string());
        }
        let def = match def {
            Value::Object(def) => def,
            // Shorthand: "name": "string"
            Value::String(kind) => {
                let mut def = Map::new();
                def.insert("type".to_string(), json!(kind));
                def
            }
            other => {
                return Err(format!(
                    "field '{name}' must be an object, got {}",
                    type_name(&other)
                ));
            }
        };
        fields.insert(name, with_default_type(def));
    }
    Ok(fields)
}

fn with_default_type(mut def: Map<String, Value>) -> Value {
    def.entry("type")
        .or_insert_with(|| json!(DEFAULT_FIELD_TYPE));
    Value::Object(def)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
