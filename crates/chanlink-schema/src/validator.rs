use jsonschema::Validator;
use serde_json::{Map, Value};

use crate::document::MessageSchema;
use crate::error::{Result, SchemaError};

pub(crate) fn compile(channel: &str, schema: &MessageSchema, strict: bool) -> Result<Validator> {
    let mut value = schema.to_json_schema();
    if strict {
        apply_strict_mode(&mut value);
    }

    jsonschema::validator_for(&value).map_err(|err| SchemaError::CompileFailed {
        channel: channel.to_string(),
        message: err.to_string(),
    })
}

pub(crate) fn validate_value(channel: &str, payload: &Value, validator: &Validator) -> Result<()> {
    let mut errors = validator.iter_errors(payload);
    if let Some(first) = errors.next() {
        let mut message = first.to_string();
        for err in errors.take(3) {
            message.push_str("; ");
            message.push_str(&err.to_string());
        }
        return Err(SchemaError::ValidationFailed {
            channel: channel.to_string(),
            message,
        });
    }

    Ok(())
}

/// Close every object schema reachable through `properties`.
fn apply_strict_mode(value: &mut Value) {
    let Value::Object(map) = value else {
        return;
    };

    if is_object_schema(map) && !map.contains_key("additionalProperties") {
        map.insert("additionalProperties".to_string(), Value::Bool(false));
    }

    if let Some(Value::Object(properties)) = map.get_mut("properties") {
        for property in properties.values_mut() {
            apply_strict_mode(property);
        }
    }
    if let Some(items) = map.get_mut("items") {
        apply_strict_mode(items);
    }
}

fn is_object_schema(map: &Map<String, Value>) -> bool {
    match map.get("type") {
        Some(Value::String(kind)) => kind == "object",
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Value::String(kind) if kind == "object")),
        _ => map.contains_key("properties"),
    }
}
