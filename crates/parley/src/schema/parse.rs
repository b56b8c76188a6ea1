//! JSON value → checked value.

use serde_json::Value;

use super::{TypeKind, TypeSpec};
use crate::error::LlmError;

/// Checks `value` against `spec` and returns it unchanged on success.
///
/// Validates JSON type, required-field presence, enum membership and,
/// for objects that do not allow them, the absence of undeclared keys.
/// Nothing is coerced: `"13"` is not an integer and `13.0` is not an
/// integer either.
///
/// On failure returns [`LlmError::SchemaMismatch`] whose `path` is the
/// JSON pointer of the offending node.
///
/// ```rust
/// use parley::schema::{TypeSpec, parse};
/// use serde_json::json;
///
/// let spec = TypeSpec::object().field("age", TypeSpec::integer()).build();
/// assert!(parse(json!({"age": 13}), &spec).is_ok());
///
/// let err = parse(json!({"age": "13"}), &spec).unwrap_err();
/// assert!(err.to_string().contains("/age"));
/// ```
pub fn parse(value: Value, spec: &TypeSpec) -> Result<Value, LlmError> {
    let mut path = String::new();
    check(&value, spec, &mut path)?;
    Ok(value)
}

fn check(value: &Value, spec: &TypeSpec, path: &mut String) -> Result<(), LlmError> {
    match &spec.kind {
        TypeKind::Boolean => expect(value.is_boolean(), "boolean", value, path),
        TypeKind::Integer => expect(value.is_i64() || value.is_u64(), "integer", value, path),
        TypeKind::Number => expect(value.is_number(), "number", value, path),
        TypeKind::String => expect(value.is_string(), "string", value, path),
        TypeKind::Enum { values } => {
            let Some(s) = value.as_str() else {
                return expect(false, "string", value, path);
            };
            if values.iter().any(|v| v == s) {
                Ok(())
            } else {
                Err(LlmError::mismatch(
                    path.as_str(),
                    format!("'{s}' is not one of [{}]", values.join(", ")),
                ))
            }
        }
        TypeKind::Array { item } => {
            let Some(items) = value.as_array() else {
                return expect(false, "array", value, path);
            };
            for (i, element) in items.iter().enumerate() {
                let len = path.len();
                path.push('/');
                path.push_str(&i.to_string());
                check(element, item, path)?;
                path.truncate(len);
            }
            Ok(())
        }
        TypeKind::Object(obj) => {
            let Some(map) = value.as_object() else {
                return expect(false, "object", value, path);
            };
            for field in &obj.fields {
                let len = path.len();
                push_token(path, &field.name);
                match map.get(&field.name) {
                    Some(child) => check(child, &field.spec, path)?,
                    None if field.required => {
                        return Err(LlmError::mismatch(
                            path.as_str(),
                            "missing required field",
                        ));
                    }
                    None => {}
                }
                path.truncate(len);
            }
            if !obj.allow_additional {
                if let Some(extra) = map
                    .keys()
                    .find(|k| !obj.fields.iter().any(|f| &f.name == *k))
                {
                    push_token(path, extra);
                    return Err(LlmError::mismatch(path.as_str(), "unexpected field"));
                }
            }
            Ok(())
        }
    }
}

fn expect(ok: bool, wanted: &str, value: &Value, path: &str) -> Result<(), LlmError> {
    if ok {
        Ok(())
    } else {
        Err(LlmError::mismatch(
            path,
            format!("expected {wanted}, got {}", kind_name(value)),
        ))
    }
}

/// Appends one RFC 6901 reference token.
fn push_token(path: &mut String, token: &str) {
    path.push('/');
    path.push_str(&token.replace('~', "~0").replace('/', "~1"));
}

pub(super) fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
