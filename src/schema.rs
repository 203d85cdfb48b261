//! Schema types describing managed resources.
//!
//! A [`ResourceSchema`] is per-type metadata that drives the generic engine:
//! field kinds for parsing and validation, a [`DiffPolicy`] per field for the
//! planner, an [`Equivalence`] per field for the canonicalizer and differ, the
//! identity template used to address the remote resource, and the named
//! update operations the remote API offers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::equivalence::Equivalence;
use crate::error::ReconcileError;
use crate::store::ResourceIdentity;
use crate::value::{Object, Setting, Value};

/// The shape of a field's value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// A string value.
    String,
    /// A 64-bit integer.
    Int,
    /// A 64-bit floating point number.
    Float,
    /// A boolean value.
    Bool,
    /// An enum, held as an opaque string. Unknown values are accepted.
    Enum,
    /// A reference to another resource, by full path or short name.
    Reference,
    /// A map from string keys to values of a single kind.
    Map(Box<FieldKind>),
    /// A nested object with its own fields.
    Object(Block),
    /// An ordered list.
    List(Box<FieldKind>),
    /// A list with set semantics.
    Set(Box<FieldKind>),
}

impl FieldKind {
    /// Create a list kind.
    pub fn list(element: FieldKind) -> Self {
        Self::List(Box::new(element))
    }

    /// Create a set kind.
    pub fn set(element: FieldKind) -> Self {
        Self::Set(Box::new(element))
    }

    /// Create a map kind.
    pub fn map(element: FieldKind) -> Self {
        Self::Map(Box::new(element))
    }

    /// The nested block, for object kinds.
    pub fn block(&self) -> Option<&Block> {
        match self {
            Self::Object(block) => Some(block),
            _ => None,
        }
    }

    /// The default equivalence for values of this kind.
    pub fn default_equivalence(&self) -> Equivalence {
        match self {
            Self::Reference => Equivalence::Reference,
            _ => Equivalence::Exact,
        }
    }
}

/// What a change to a field means for the remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DiffPolicy {
    /// The field can only be changed by recreating the resource.
    #[default]
    RequiresRecreate,
    /// The field is changed by the named update operation.
    TriggersOperation(String),
    /// The field is computed by the server.
    OutputOnly,
}

/// Describes a single field of a resource or nested block.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// The kind of the field.
    pub kind: FieldKind,
    /// How a diff on this field is resolved.
    pub policy: DiffPolicy,
    /// Any change to this field requires recreation, whatever its policy.
    pub immutable: bool,
    /// The server accepts this field but never returns it.
    pub input_only: bool,
    /// The field must be set in the desired state.
    pub required: bool,
    /// How two values of this field are compared.
    pub equivalence: Equivalence,
    /// Human-readable description of the field.
    pub description: Option<String>,
}

impl FieldDescriptor {
    /// Create a descriptor for the given kind.
    ///
    /// New descriptors require recreation on change until
    /// [`updated_by`](Self::updated_by) or [`output_only`](Self::output_only)
    /// says otherwise.
    pub fn new(kind: FieldKind) -> Self {
        let equivalence = kind.default_equivalence();
        Self {
            kind,
            policy: DiffPolicy::RequiresRecreate,
            immutable: false,
            input_only: false,
            required: false,
            equivalence,
            description: None,
        }
    }

    /// Create a string field.
    pub fn string() -> Self {
        Self::new(FieldKind::String)
    }

    /// Create an integer field.
    pub fn int() -> Self {
        Self::new(FieldKind::Int)
    }

    /// Create a float field.
    pub fn float() -> Self {
        Self::new(FieldKind::Float)
    }

    /// Create a bool field.
    pub fn bool() -> Self {
        Self::new(FieldKind::Bool)
    }

    /// Create an enum field.
    pub fn enumeration() -> Self {
        Self::new(FieldKind::Enum)
    }

    /// Create a reference field.
    pub fn reference() -> Self {
        Self::new(FieldKind::Reference)
    }

    /// Create a map field.
    pub fn map(element: FieldKind) -> Self {
        Self::new(FieldKind::map(element))
    }

    /// Create a nested object field.
    pub fn object(block: Block) -> Self {
        Self::new(FieldKind::Object(block))
    }

    /// Create an ordered list field.
    pub fn list(element: FieldKind) -> Self {
        Self::new(FieldKind::list(element))
    }

    /// Create a set list field.
    pub fn set(element: FieldKind) -> Self {
        Self::new(FieldKind::set(element))
    }

    /// Changes to this field are applied by the named update operation.
    pub fn updated_by(mut self, operation: impl Into<String>) -> Self {
        self.policy = DiffPolicy::TriggersOperation(operation.into());
        self
    }

    /// Changes to this field require recreation.
    pub fn recreate(mut self) -> Self {
        self.policy = DiffPolicy::RequiresRecreate;
        self
    }

    /// The field is computed by the server.
    pub fn output_only(mut self) -> Self {
        self.policy = DiffPolicy::OutputOnly;
        self
    }

    /// Any change to the field requires recreation.
    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    /// The server never echoes this field back.
    pub fn input_only(mut self) -> Self {
        self.input_only = true;
        self
    }

    /// The field must be set.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Override the equivalence function.
    pub fn with_equivalence(mut self, equivalence: Equivalence) -> Self {
        self.equivalence = equivalence;
        self
    }

    /// Set the description for this field.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether the field is computed by the server.
    pub fn is_output_only(&self) -> bool {
        self.policy == DiffPolicy::OutputOnly
    }
}

/// An ordered set of named fields.
///
/// Declaration order is preserved; it is the order diffs are reported in.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    fields: Vec<(String, FieldDescriptor)>,
}

impl Block {
    /// Create a new empty block.
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Add a field to this block, replacing any previous field with the same name.
    pub fn with_field(mut self, name: impl Into<String>, field: FieldDescriptor) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = field,
            None => self.fields.push((name, field)),
        }
        self
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, field)| field)
    }

    /// Iterate over the fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldDescriptor)> {
        self.fields.iter().map(|(name, field)| (name.as_str(), field))
    }

    /// Whether the block declares no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Schema for one resource type.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSchema {
    /// The resource type name, such as `CaPool`.
    pub kind: String,
    /// The version of this schema.
    pub version: u64,
    /// The top-level fields.
    pub block: Block,
    /// Identity template, such as `projects/{{project}}/caPools/{{name}}`.
    pub id_template: String,
    /// Named update operations, in the order they are executed.
    pub operations: Vec<String>,
}

impl ResourceSchema {
    /// Create a schema for the given kind and identity template.
    pub fn new(kind: impl Into<String>, id_template: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            version: 0,
            block: Block::new(),
            id_template: id_template.into(),
            operations: Vec::new(),
        }
    }

    /// Set the schema version.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Add a top-level field.
    pub fn with_field(mut self, name: impl Into<String>, field: FieldDescriptor) -> Self {
        self.block = self.block.with_field(name, field);
        self
    }

    /// Declare a named update operation.
    pub fn with_operation(mut self, name: impl Into<String>) -> Self {
        self.operations.push(name.into());
        self
    }

    /// Look up a top-level field.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.block.field(name)
    }

    /// Whether the named update operation is declared.
    pub fn has_operation(&self, name: &str) -> bool {
        self.operations.iter().any(|op| op == name)
    }

    /// The parameter names used by the identity template, in order.
    pub fn identity_fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        let mut rest = self.id_template.as_str();
        while let Some(start) = rest.find("{{") {
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    fields.push(&after[..end]);
                    rest = &after[end + 2..];
                },
                None => break,
            }
        }
        fields
    }

    /// Render the identity of a resource from its template.
    ///
    /// Reference values contribute their last path segment, so a full
    /// self-link and a short name produce the same identity.
    pub fn identity(&self, resource: &Object) -> Result<ResourceIdentity, ReconcileError> {
        let mut rendered = self.id_template.clone();
        for param in self.identity_fields() {
            let value = match resource.get(param) {
                Setting::Value(Value::String(s)) if !s.is_empty() => {
                    s.rsplit('/').next().unwrap_or(s).to_string()
                },
                Setting::Value(Value::Int(i)) => i.to_string(),
                _ => {
                    return Err(ReconcileError::Validation(vec![Diagnostic::error(format!(
                        "Missing identity parameter '{}' for {}",
                        param, self.kind
                    ))
                    .with_attribute(param)]))
                },
            };
            rendered = rendered.replace(&format!("{{{{{}}}}}", param), &value);
        }
        Ok(ResourceIdentity::new(rendered))
    }

    /// Build the partial resource sent with an update: the masked fields plus
    /// the identity fields.
    pub fn project(&self, resource: &Object, mask: &[String]) -> Object {
        let mut partial = Object::new();
        let identity = self.identity_fields();
        for (name, setting) in resource.iter() {
            if mask.iter().any(|m| m == name) || identity.contains(&name) {
                partial.set(name, setting.cloned());
            }
        }
        partial
    }
}

/// All resource schemas a provider manages, keyed by kind.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    resources: HashMap<String, Arc<ResourceSchema>>,
}

impl SchemaRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource schema.
    pub fn with_resource(mut self, schema: Arc<ResourceSchema>) -> Self {
        self.resources.insert(schema.kind.clone(), schema);
        self
    }

    /// Look up a resource schema by kind.
    pub fn get(&self, kind: &str) -> Option<Arc<ResourceSchema>> {
        self.resources.get(kind).cloned()
    }

    /// The registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.resources.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    /// An error that prevents the operation from completing.
    Error,
    /// A warning that doesn't prevent the operation but should be addressed.
    Warning,
}

/// A diagnostic message about a desired state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity of the diagnostic.
    pub severity: DiagnosticSeverity,
    /// A short summary of the issue.
    pub summary: String,
    /// A detailed description of the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// The attribute path where the issue occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Create a warning diagnostic.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Add detail to this diagnostic.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set the attribute path for this diagnostic.
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Whether this diagnostic is an error.
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_schema() -> ResourceSchema {
        ResourceSchema::new(
            "CaPool",
            "projects/{{project}}/locations/{{location}}/caPools/{{name}}",
        )
        .with_field("name", FieldDescriptor::string().required())
        .with_field("project", FieldDescriptor::reference().required())
        .with_field("location", FieldDescriptor::string().required())
        .with_field("tier", FieldDescriptor::enumeration().immutable())
        .with_field(
            "labels",
            FieldDescriptor::map(FieldKind::String).updated_by("update_ca_pool"),
        )
        .with_operation("update_ca_pool")
    }

    #[test]
    fn test_field_kind_constructors() {
        let list = FieldKind::list(FieldKind::String);
        assert!(matches!(list, FieldKind::List(_)));

        let set = FieldKind::set(FieldKind::Enum);
        assert!(matches!(set, FieldKind::Set(_)));

        let map = FieldKind::map(FieldKind::Int);
        assert!(matches!(map, FieldKind::Map(_)));
    }

    #[test]
    fn test_descriptor_builders() {
        let field = FieldDescriptor::string()
            .updated_by("update_thing")
            .with_description("A test field")
            .required();

        assert_eq!(field.kind, FieldKind::String);
        assert_eq!(field.policy, DiffPolicy::TriggersOperation("update_thing".into()));
        assert!(field.required);
        assert!(!field.immutable);
        assert_eq!(field.description, Some("A test field".to_string()));

        let output = FieldDescriptor::string().output_only().immutable();
        assert!(output.is_output_only());
        assert!(output.immutable);

        assert_eq!(FieldDescriptor::int().policy, DiffPolicy::RequiresRecreate);
        assert_eq!(FieldDescriptor::reference().equivalence, Equivalence::Reference);
    }

    #[test]
    fn test_block_preserves_declaration_order() {
        let block = Block::new()
            .with_field("zeta", FieldDescriptor::string())
            .with_field("alpha", FieldDescriptor::int())
            .with_field("zeta", FieldDescriptor::bool());

        let names: Vec<&str> = block.fields().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(block.field("zeta").unwrap().kind, FieldKind::Bool);
        assert!(block.field("missing").is_none());
    }

    #[test]
    fn test_identity_rendering() {
        let schema = pool_schema();
        assert_eq!(schema.identity_fields(), vec!["project", "location", "name"]);

        let pool = Object::new()
            .with("name", "pool-1")
            .with("project", "projects/my-proj")
            .with("location", "us-central1");
        let id = schema.identity(&pool).unwrap();
        assert_eq!(
            id.as_str(),
            "projects/my-proj/locations/us-central1/caPools/pool-1"
        );
    }

    #[test]
    fn test_identity_missing_parameter() {
        let schema = pool_schema();
        let pool = Object::new().with("name", "pool-1").with("project", "p");

        let err = schema.identity(&pool).unwrap_err();
        match err {
            ReconcileError::Validation(diags) => {
                assert_eq!(diags.len(), 1);
                assert_eq!(diags[0].attribute.as_deref(), Some("location"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_project_keeps_mask_and_identity() {
        let schema = pool_schema();
        let pool = Object::new()
            .with("name", "pool-1")
            .with("project", "p")
            .with("location", "l")
            .with("tier", "ENTERPRISE")
            .with("labels", Object::new().with("env", "prod"));

        let partial = schema.project(&pool, &["labels".to_string()]);
        assert!(partial.get("labels").is_value());
        assert!(partial.get("name").is_value());
        assert!(partial.get("project").is_value());
        assert!(partial.get("tier").is_unset());
    }

    #[test]
    fn test_registry() {
        let registry = SchemaRegistry::new()
            .with_resource(Arc::new(pool_schema()))
            .with_resource(Arc::new(ResourceSchema::new("Certificate", "certs/{{name}}")));

        assert_eq!(registry.kinds(), vec!["CaPool", "Certificate"]);
        assert!(registry.get("CaPool").unwrap().has_operation("update_ca_pool"));
        assert!(registry.get("Missing").is_none());
    }

    #[test]
    fn test_diagnostic() {
        let err = Diagnostic::error("Invalid configuration")
            .with_detail("The value must be positive")
            .with_attribute("count");

        assert_eq!(err.severity, DiagnosticSeverity::Error);
        assert!(err.is_error());
        assert_eq!(err.summary, "Invalid configuration");
        assert_eq!(err.detail, Some("The value must be positive".to_string()));
        assert_eq!(err.attribute, Some("count".to_string()));
        assert!(!Diagnostic::warning("heads up").is_error());
    }
}
