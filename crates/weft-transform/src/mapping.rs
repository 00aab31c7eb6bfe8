//! Declarative field mapping: copy values between dot paths with an optional
//! type transform and default.

use serde_json::{Map, Value};

use weft_core::definition::{FieldMapping, MappingTransform};
use weft_core::error::{Result, WeftError};

use crate::path::{lookup, set_path};
use crate::value::{as_number, display, is_truthy, number};

/// Apply every mapping to `source`, producing a fresh object. Mappings whose
/// source is missing (or null) and that carry no default are left out.
pub fn extract_variables(source: &Value, mappings: &[FieldMapping]) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for mapping in mappings {
        let found = lookup(source, &mapping.from).filter(|v| !v.is_null());
        let value = match (found, &mapping.default) {
            (Some(v), _) => v,
            (None, Some(default)) => default.clone(),
            (None, None) => continue,
        };
        let value = match mapping.transform {
            Some(t) => apply_transform(value, t)
                .map_err(|e| WeftError::Mapping(format!("{} -> {}: {}", mapping.from, mapping.to, e)))?,
            None => value,
        };
        set_path(&mut out, &mapping.to, value);
    }
    Ok(out)
}

/// Convert a single value.
pub fn apply_transform(value: Value, transform: MappingTransform) -> std::result::Result<Value, String> {
    Ok(match transform {
        MappingTransform::String => Value::String(display(&value)),
        MappingTransform::Number => as_number(&value).map(number).unwrap_or(Value::Null),
        MappingTransform::Boolean => Value::Bool(match &value {
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "false" | "0" | "no" | "off" | "" => false,
                _ => true,
            },
            other => is_truthy(other),
        }),
        MappingTransform::Json => match value {
            Value::String(s) => serde_json::from_str(&s).map_err(|e| format!("invalid JSON: {}", e))?,
            other => other,
        },
        MappingTransform::Uppercase => Value::String(display(&value).to_uppercase()),
        MappingTransform::Lowercase => Value::String(display(&value).to_lowercase()),
        MappingTransform::Trim => Value::String(display(&value).trim().to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_destination_with_string_transform() {
        let out = extract_variables(
            &json!({"a": {"b": 5}}),
            &[FieldMapping::new("a.b", "x.y").with_transform(MappingTransform::String)],
        )
        .unwrap();
        assert_eq!(Value::Object(out), json!({"x": {"y": "5"}}));
    }

    #[test]
    fn defaults_and_missing_fields() {
        let out = extract_variables(
            &json!({"name": null}),
            &[
                FieldMapping::new("name", "who").with_default(json!("anon")),
                FieldMapping::new("age", "age"),
            ],
        )
        .unwrap();
        assert_eq!(Value::Object(out), json!({"who": "anon"}));
    }

    #[test]
    fn transforms() {
        assert_eq!(apply_transform(json!("42"), MappingTransform::Number).unwrap(), json!(42));
        assert_eq!(apply_transform(json!("abc"), MappingTransform::Number).unwrap(), Value::Null);
        assert_eq!(apply_transform(json!("false"), MappingTransform::Boolean).unwrap(), json!(false));
        assert_eq!(apply_transform(json!(1), MappingTransform::Boolean).unwrap(), json!(true));
        assert_eq!(apply_transform(json!(" Hi "), MappingTransform::Trim).unwrap(), json!("Hi"));
        assert_eq!(apply_transform(json!("hi"), MappingTransform::Uppercase).unwrap(), json!("HI"));
        assert_eq!(
            apply_transform(json!(r#"{"k":[1]}"#), MappingTransform::Json).unwrap(),
            json!({"k": [1]})
        );
    }

    #[test]
    fn invalid_json_is_a_mapping_error() {
        let err = extract_variables(
            &json!({"raw": "{not json"}),
            &[FieldMapping::new("raw", "parsed").with_transform(MappingTransform::Json)],
        )
        .unwrap_err();
        assert!(matches!(err, WeftError::Mapping(_)));
    }
}
