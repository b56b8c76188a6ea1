//! TypeSpec → JSON Schema.

use serde_json::{Map, Value, json};

use super::{TypeKind, TypeSpec};
use crate::error::LlmError;

/// Name of the synthetic property used when a provider needs an object at
/// the schema root.
pub const WRAPPER_FIELD: &str = "data";

/// Renders a [`TypeSpec`] as a JSON Schema document.
///
/// Pure and deterministic: the same spec always yields the same value, with
/// `properties` in field declaration order and `required` listing exactly
/// the fields marked required. Objects that do not allow additional
/// properties carry `"additionalProperties": false`.
pub fn compile(spec: &TypeSpec) -> Value {
    let mut schema = match &spec.kind {
        TypeKind::Boolean => json!({"type": "boolean"}),
        TypeKind::Integer => json!({"type": "integer"}),
        TypeKind::Number => json!({"type": "number"}),
        TypeKind::String => json!({"type": "string"}),
        TypeKind::Enum { values } => json!({"type": "string", "enum": values}),
        TypeKind::Array { item } => json!({"type": "array", "items": compile(item)}),
        TypeKind::Object(obj) => {
            let mut properties = Map::new();
            let mut required = Vec::new();
            for field in &obj.fields {
                properties.insert(field.name.clone(), compile(&field.spec));
                if field.required {
                    required.push(Value::String(field.name.clone()));
                }
            }
            json!({
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": obj.allow_additional,
            })
        }
    };
    if let (Some(description), Value::Object(map)) = (&spec.description, &mut schema) {
        map.insert("description".into(), Value::String(description.clone()));
    }
    schema
}

/// A spec compiled for one provider dialect.
///
/// When the provider only accepts object roots and the caller's spec is
/// something else, the spec is wrapped as `{"data": <spec>}` before
/// compilation. [`unwrap_value`](Self::unwrap_value) reverses this so the
/// caller never sees the wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSchema {
    schema: Value,
    wrapped: bool,
}

impl CompiledSchema {
    /// Checks the spec's invariants and compiles it.
    pub fn new(spec: &TypeSpec, requires_root_object: bool) -> Result<Self, LlmError> {
        spec.check()?;
        if requires_root_object && !spec.is_object() {
            let wrapper = TypeSpec::object().field(WRAPPER_FIELD, spec.clone()).build();
            return Ok(Self {
                schema: compile(&wrapper),
                wrapped: true,
            });
        }
        Ok(Self {
            schema: compile(spec),
            wrapped: false,
        })
    }

    /// The wire schema.
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Consumes self, returning the wire schema.
    pub fn into_schema(self) -> Value {
        self.schema
    }

    /// Whether the synthetic root wrapper was applied.
    pub fn is_wrapped(&self) -> bool {
        self.wrapped
    }

    /// Strips the synthetic wrapper from a provider payload, if one was
    /// applied.
    pub fn unwrap_value(&self, value: Value) -> Result<Value, LlmError> {
        if !self.wrapped {
            return Ok(value);
        }
        match value {
            Value::Object(mut map) => map.remove(WRAPPER_FIELD).ok_or_else(|| {
                LlmError::mismatch("", format!("missing wrapper field '{WRAPPER_FIELD}'"))
            }),
            other => Err(LlmError::mismatch(
                "",
                format!("expected wrapper object, got {}", super::parse::kind_name(&other)),
            )),
        }
    }
}
