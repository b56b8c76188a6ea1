//! Declarative type schemas for structured output and tool parameters.
//!
//! A [`TypeSpec`] is a closed tree of scalar, enum, array and object nodes.
//! It is the single description of shape the engine works with:
//!
//! - [`compile`] renders it to a JSON Schema document for the wire,
//! - [`parse`] checks a returned JSON value against it,
//! - [`CompiledSchema`] adds the synthetic root-object wrapper some
//!   providers need and strips it again on the way back.
//!
//! # Building specs
//!
//! ```rust
//! use parley::schema::TypeSpec;
//!
//! let person = TypeSpec::object()
//!     .field("name", TypeSpec::string().describe("First name"))
//!     .field("age", TypeSpec::integer())
//!     .optional("mood", TypeSpec::enumeration(["happy", "sad"]))
//!     .build();
//!
//! assert!(person.check().is_ok());
//! ```

mod compile;
mod parse;

pub use compile::{CompiledSchema, WRAPPER_FIELD, compile};
pub use parse::parse;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// One node of a type schema: a kind plus an optional description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSpec {
    /// What values this node accepts.
    #[serde(flatten)]
    pub kind: TypeKind,
    /// Human-readable hint forwarded to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The closed set of node kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TypeKind {
    /// `true` or `false`.
    Boolean,
    /// A whole number. Floats are rejected, even `13.0`.
    Integer,
    /// Any JSON number.
    Number,
    /// Any JSON string.
    String,
    /// One string out of a fixed, non-empty set.
    Enum {
        /// The allowed values, in declaration order.
        values: Vec<String>,
    },
    /// A homogeneous list.
    Array {
        /// The element type.
        item: Box<TypeSpec>,
    },
    /// A record with ordered, named fields.
    Object(ObjectSpec),
}

/// The body of an object node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectSpec {
    /// Fields in declaration order. Names are unique.
    pub fields: Vec<Field>,
    /// Whether keys beyond `fields` are permitted.
    #[serde(default)]
    pub allow_additional: bool,
}

/// A named field inside an [`ObjectSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Property name.
    pub name: String,
    /// Property type.
    pub spec: TypeSpec,
    /// Whether the property must be present.
    pub required: bool,
}

impl TypeSpec {
    fn of(kind: TypeKind) -> Self {
        Self {
            kind,
            description: None,
        }
    }

    /// A boolean node.
    pub fn boolean() -> Self {
        Self::of(TypeKind::Boolean)
    }

    /// An integer node.
    pub fn integer() -> Self {
        Self::of(TypeKind::Integer)
    }

    /// A number node.
    pub fn number() -> Self {
        Self::of(TypeKind::Number)
    }

    /// A string node.
    pub fn string() -> Self {
        Self::of(TypeKind::String)
    }

    /// A string enum node.
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::of(TypeKind::Enum {
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    /// An array node.
    pub fn array(item: TypeSpec) -> Self {
        Self::of(TypeKind::Array {
            item: Box::new(item),
        })
    }

    /// Starts an object node.
    pub fn object() -> ObjectBuilder {
        ObjectBuilder::default()
    }

    /// Attaches a description to this node.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns `true` if this node is an object.
    pub fn is_object(&self) -> bool {
        matches!(self.kind, TypeKind::Object(_))
    }

    /// Returns `true` if this node or any descendant permits additional
    /// object properties.
    pub fn allows_additional(&self) -> bool {
        match &self.kind {
            TypeKind::Object(obj) => {
                obj.allow_additional || obj.fields.iter().any(|f| f.spec.allows_additional())
            }
            TypeKind::Array { item } => item.allows_additional(),
            _ => false,
        }
    }

    /// Returns `true` if every object in the tree marks all of its fields
    /// required.
    pub fn all_fields_required(&self) -> bool {
        match &self.kind {
            TypeKind::Object(obj) => obj
                .fields
                .iter()
                .all(|f| f.required && f.spec.all_fields_required()),
            TypeKind::Array { item } => item.all_fields_required(),
            _ => true,
        }
    }

    /// Validates the tree's structural invariants.
    ///
    /// Field names must be unique within each object and every enum must
    /// list at least one value. Array nodes always carry exactly one item
    /// type by construction.
    pub fn check(&self) -> Result<(), LlmError> {
        self.check_at("")
    }

    fn check_at(&self, path: &str) -> Result<(), LlmError> {
        match &self.kind {
            TypeKind::Enum { values } if values.is_empty() => Err(LlmError::InvalidRequest(
                format!("enum at '{path}' has no values"),
            )),
            TypeKind::Array { item } => item.check_at(&format!("{path}/items")),
            TypeKind::Object(obj) => {
                let mut seen = HashSet::new();
                for field in &obj.fields {
                    if !seen.insert(field.name.as_str()) {
                        return Err(LlmError::InvalidRequest(format!(
                            "duplicate field '{}' in object at '{path}'",
                            field.name
                        )));
                    }
                    field.spec.check_at(&format!("{path}/{}", field.name))?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Builder for object nodes.
///
/// Field order is preserved; it becomes the `properties` order on the wire.
#[derive(Debug, Default)]
pub struct ObjectBuilder {
    spec: ObjectSpec,
    description: Option<String>,
}

impl ObjectBuilder {
    /// Adds a required field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, spec: TypeSpec) -> Self {
        self.spec.fields.push(Field {
            name: name.into(),
            spec,
            required: true,
        });
        self
    }

    /// Adds an optional field.
    #[must_use]
    pub fn optional(mut self, name: impl Into<String>, spec: TypeSpec) -> Self {
        self.spec.fields.push(Field {
            name: name.into(),
            spec,
            required: false,
        });
        self
    }

    /// Permits keys beyond the declared fields.
    ///
    /// Only some providers can express this; the others reject the
    /// request with [`LlmError::Capability`].
    #[must_use]
    pub fn allow_additional(mut self) -> Self {
        self.spec.allow_additional = true;
        self
    }

    /// Attaches a description to the object node.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Finishes the object node.
    pub fn build(self) -> TypeSpec {
        TypeSpec {
            kind: TypeKind::Object(self.spec),
            description: self.description,
        }
    }
}

impl From<ObjectBuilder> for TypeSpec {
    fn from(builder: ObjectBuilder) -> Self {
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> TypeSpec {
        TypeSpec::object()
            .field("name", TypeSpec::string())
            .field("age", TypeSpec::integer())
            .build()
    }

    #[test]
    fn test_builder_preserves_field_order() {
        let TypeKind::Object(obj) = person().kind else {
            panic!("expected object");
        };
        let names: Vec<_> = obj.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["name", "age"]);
        assert!(obj.fields.iter().all(|f| f.required));
        assert!(!obj.allow_additional);
    }

    #[test]
    fn test_check_rejects_duplicate_fields() {
        let spec = TypeSpec::object()
            .field("a", TypeSpec::string())
            .optional("a", TypeSpec::integer())
            .build();
        let err = spec.check().unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(msg) if msg.contains("duplicate field 'a'")));
    }

    #[test]
    fn test_check_rejects_empty_enum_when_nested() {
        let spec = TypeSpec::object()
            .field(
                "tags",
                TypeSpec::array(TypeSpec::enumeration(Vec::<String>::new())),
            )
            .build();
        let err = spec.check().unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(msg) if msg.contains("/tags/items")));
    }

    #[test]
    fn test_allows_additional_is_recursive() {
        let inner = TypeSpec::object().allow_additional().build();
        let outer = TypeSpec::object()
            .field("list", TypeSpec::array(inner))
            .build();
        assert!(outer.allows_additional());
        assert!(!person().allows_additional());
    }

    #[test]
    fn test_all_fields_required() {
        assert!(person().all_fields_required());
        let spec = TypeSpec::object()
            .optional("nick", TypeSpec::string())
            .build();
        assert!(!spec.all_fields_required());
        assert!(TypeSpec::string().all_fields_required());
    }

    #[test]
    fn test_describe_sets_description() {
        let spec = TypeSpec::number().describe("Temperature in Celsius");
        assert_eq!(spec.description.as_deref(), Some("Temperature in Celsius"));
    }

    #[test]
    fn test_type_spec_serde_shape() {
        let spec = TypeSpec::array(TypeSpec::string()).describe("names");
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "array");
        assert_eq!(json["item"]["type"], "string");
        assert_eq!(json["description"], "names");

        let back: TypeSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
    }
}
