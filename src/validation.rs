//! Schema validation helpers.
//!
//! This module validates a desired [`Object`] against a [`ResourceSchema`]
//! before it is reconciled, producing [`Diagnostic`]s with the path of each
//! problem.
//!
//! # Example
//!
//! ```
//! use hemmer_reconciler::schema::{FieldDescriptor, ResourceSchema};
//! use hemmer_reconciler::validation::validate;
//! use hemmer_reconciler::Object;
//!
//! let schema = ResourceSchema::new("Thing", "things/{{name}}")
//!     .with_field("name", FieldDescriptor::string().required())
//!     .with_field("count", FieldDescriptor::int());
//!
//! // Valid input
//! let input = Object::new().with("name", "test").with("count", 42);
//! assert!(validate(&schema, &input).is_empty());
//!
//! // Invalid input - wrong type for count
//! let input = Object::new().with("name", "test").with("count", "not a number");
//! let diagnostics = validate(&schema, &input);
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("count".to_string()));
//! ```

use crate::diff::join_path;
use crate::schema::{Block, Diagnostic, DiagnosticSeverity, FieldDescriptor, FieldKind, ResourceSchema};
use crate::value::{Object, Setting, Value};

/// Validate a desired state against a schema.
///
/// Returns a list of diagnostics. An empty list means the state is valid.
///
/// # Validation Rules
///
/// - Required fields must be set, not unset or cleared
/// - Setting an output-only field produces a warning
/// - Values must match the field kind; integers are accepted for floats and
///   integral floats for integers
/// - Nested objects, maps, lists and sets are validated recursively
/// - Enum values are not checked against a closed set
pub fn validate(schema: &ResourceSchema, desired: &Object) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, desired, "", &mut diagnostics);
    diagnostics
}

/// Validate a desired state, returning `Err` with the error diagnostics if there are any.
///
/// Warnings alone do not fail validation.
pub fn validate_result(schema: &ResourceSchema, desired: &Object) -> Result<(), Vec<Diagnostic>> {
    let errors: Vec<Diagnostic> = validate(schema, desired)
        .into_iter()
        .filter(|d| d.severity == DiagnosticSeverity::Error)
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check if a desired state has no validation errors.
///
/// Use [`validate`] to get detailed error information.
pub fn is_valid(schema: &ResourceSchema, desired: &Object) -> bool {
    validate_result(schema, desired).is_ok()
}

/// Parse a JSON document with the schema and validate the result.
///
/// A document that is not a JSON object yields a single error diagnostic.
pub fn validate_json(schema: &ResourceSchema, json: &serde_json::Value) -> Vec<Diagnostic> {
    match Object::from_json(&schema.block, json) {
        Ok(desired) => validate(schema, &desired),
        Err(e) => vec![Diagnostic::error("Expected object").with_detail(e.to_string())],
    }
}

fn validate_block(block: &Block, obj: &Object, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    for (name, field) in block.fields() {
        let field_path = join_path(path, name);
        validate_field(field, obj.get(name), &field_path, diagnostics);
    }
}

fn validate_field(
    field: &FieldDescriptor,
    setting: Setting<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match setting {
        Setting::Unset | Setting::Cleared => {
            if field.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Setting::Value(value) => {
            if field.is_output_only() {
                diagnostics.push(
                    Diagnostic::warning(format!("Attribute '{}' is output-only", path))
                        .with_detail("The server computes this value; it is compared but never sent")
                        .with_attribute(path),
                );
            }
            validate_kind(&field.kind, value, path, diagnostics);
        },
    }
}

fn validate_kind(kind: &FieldKind, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    match kind {
        FieldKind::String | FieldKind::Enum | FieldKind::Reference => {
            if value.as_str().is_none() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        FieldKind::Int => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int", value));
            }
        },
        FieldKind::Float => {
            if value.as_f64().is_none() {
                diagnostics.push(type_error(path, "float", value));
            }
        },
        FieldKind::Bool => {
            if !matches!(value, Value::Bool(_)) {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        FieldKind::List(element) | FieldKind::Set(element) => match value.as_items() {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{}.{}", path, i);
                    validate_kind(element, item, &item_path, diagnostics);
                }
            },
            None => diagnostics.push(type_error(path, "list", value)),
        },
        FieldKind::Map(element) => match value.as_object() {
            Some(obj) => {
                for (key, entry) in obj.iter() {
                    if let Setting::Value(entry) = entry {
                        validate_kind(element, entry, &join_path(path, key), diagnostics);
                    }
                }
            },
            None => diagnostics.push(type_error(path, "map", value)),
        },
        FieldKind::Object(block) => match value.as_object() {
            Some(obj) => validate_block(block, obj, path, diagnostics),
            None => diagnostics.push(type_error(path, "object", value)),
        },
    }
}

// Helper functions

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Int(_) => true,
        // Accept floats with no fractional part that fit in i64
        Value::Float(f) => f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64,
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, value: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, value.type_name()))
        .with_attribute(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ResourceSchema {
        ResourceSchema::new("Thing", "things/{{name}}")
            .with_field("name", FieldDescriptor::string().required())
            .with_field("count", FieldDescriptor::int())
            .with_field("ratio", FieldDescriptor::float())
            .with_field("enabled", FieldDescriptor::bool())
            .with_field("tier", FieldDescriptor::enumeration())
            .with_field("labels", FieldDescriptor::map(FieldKind::String))
            .with_field("tags", FieldDescriptor::set(FieldKind::String))
            .with_field(
                "config",
                FieldDescriptor::object(
                    Block::new()
                        .with_field("key_type", FieldDescriptor::string().required())
                        .with_field("size", FieldDescriptor::int()),
                ),
            )
            .with_field("state", FieldDescriptor::enumeration().output_only())
    }

    #[test]
    fn test_valid_state() {
        let desired = Object::new()
            .with("name", "thing")
            .with("count", 3)
            .with("ratio", 1)
            .with("enabled", true)
            .with("labels", Object::new().with("env", "prod"))
            .with("tags", Value::Set(vec![Value::from("a")]))
            .with("config", Object::new().with("key_type", "RSA").with("size", 2048.0));
        assert!(validate(&schema(), &desired).is_empty());
        assert!(is_valid(&schema(), &desired));
    }

    #[test]
    fn test_missing_required() {
        let diagnostics = validate(&schema(), &Object::new());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("name"));

        let cleared = Object::new().with_cleared("name");
        assert!(!is_valid(&schema(), &cleared));
    }

    #[test]
    fn test_nested_required_only_when_present() {
        let absent = Object::new().with("name", "thing");
        assert!(is_valid(&schema(), &absent));

        let present = Object::new()
            .with("name", "thing")
            .with("config", Object::new().with("size", 1));
        let diagnostics = validate(&schema(), &present);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("config.key_type"));
    }

    #[test]
    fn test_type_errors() {
        let desired = Object::new()
            .with("name", 1)
            .with("count", 1.5)
            .with("enabled", "yes")
            .with("labels", Object::new().with("env", 1))
            .with("tags", "a");
        let diagnostics = validate(&schema(), &desired);
        let paths: Vec<_> = diagnostics
            .iter()
            .filter_map(|d| d.attribute.as_deref())
            .collect();
        assert_eq!(paths, vec!["name", "count", "enabled", "labels.env", "tags"]);
    }

    #[test]
    fn test_unknown_enum_values_are_accepted() {
        let desired = Object::new().with("name", "thing").with("tier", "SOMETHING_NEW");
        assert!(validate(&schema(), &desired).is_empty());
    }

    #[test]
    fn test_output_only_warning() {
        let desired = Object::new().with("name", "thing").with("state", "ENABLED");
        let diagnostics = validate(&schema(), &desired);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, DiagnosticSeverity::Warning);
        assert!(validate_result(&schema(), &desired).is_ok());
    }

    #[test]
    fn test_validate_json() {
        let diagnostics = validate_json(&schema(), &json!({"name": "thing", "tags": ["a", 1]}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("tags.1"));

        let diagnostics = validate_json(&schema(), &json!("not an object"));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "Expected object");
    }
}
