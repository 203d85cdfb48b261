//! Turning field diffs into remote operations.
//!
//! A resource that does not exist yet is created in one call regardless of
//! its diffs. An existing resource is updated with one call per named update
//! operation, in schema declaration order, each carrying only the diffs that
//! justify it. Recreation is never planned: a diff that only recreation can
//! resolve makes the plan infeasible.

use serde::Serialize;
use std::fmt;

use crate::diff::FieldDiff;
use crate::error::ReconcileError;
use crate::schema::ResourceSchema;
use crate::store::{ResourceIdentity, ResourceStore};
use crate::value::Object;

/// Caller policy restricting what an apply may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleParam {
    /// Fail instead of creating a missing resource.
    BlockCreation,
    /// Fail if the resource already exists.
    BlockAcquire,
    /// Fail instead of modifying an existing resource.
    BlockModification,
}

/// What an operation does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create the resource from the full desired state.
    Create,
    /// Apply the named partial update.
    Update(String),
    /// Delete the resource.
    Delete,
}

/// One remote mutation and the diffs that justify it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operation {
    /// What the operation does.
    pub kind: OperationKind,
    /// The diffs this operation resolves.
    pub diffs: Vec<FieldDiff>,
}

impl Operation {
    /// Create an operation of the given kind.
    pub fn new(kind: OperationKind, diffs: Vec<FieldDiff>) -> Self {
        Self { kind, diffs }
    }

    /// The operation name used in logs and by the retry policy.
    pub fn name(&self) -> &str {
        match &self.kind {
            OperationKind::Create => "create",
            OperationKind::Update(name) => name,
            OperationKind::Delete => "delete",
        }
    }

    /// The sorted, de-duplicated top-level fields touched by this operation.
    pub fn field_mask(&self) -> Vec<String> {
        let mut mask: Vec<String> = self
            .diffs
            .iter()
            .map(|d| d.top_level_field().to_string())
            .collect();
        mask.sort();
        mask.dedup();
        mask
    }

    /// Run the operation against the store.
    ///
    /// Returns the server's response document, if the call produces one.
    pub async fn execute<S: ResourceStore + ?Sized>(
        &self,
        store: &S,
        schema: &ResourceSchema,
        identity: &ResourceIdentity,
        resource: &Object,
    ) -> Result<Option<Object>, ReconcileError> {
        match &self.kind {
            OperationKind::Create => store.create(identity, resource.clone()).await.map(Some),
            OperationKind::Update(name) => {
                let mask = self.field_mask();
                let partial = schema.project(resource, &mask);
                store.mutate(identity, name, &mask, partial).await.map(Some)
            },
            OperationKind::Delete => store.delete(identity).await.map(|()| None),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            OperationKind::Update(name) => write!(f, "{} [{}]", name, self.field_mask().join(", ")),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// The ordered operations for one reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    /// Whether the resource existed when the plan was made.
    pub exists: bool,
    /// Operations to run, in order.
    pub operations: Vec<Operation>,
    /// Paths of diffs that only recreation would resolve.
    pub recreate_fields: Vec<String>,
}

impl Plan {
    /// Whether the plan does nothing.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Whether any diff requires recreating the resource.
    pub fn requires_recreate(&self) -> bool {
        !self.recreate_fields.is_empty()
    }

    /// The operation names, in order.
    pub fn operation_names(&self) -> Vec<&str> {
        self.operations.iter().map(Operation::name).collect()
    }

    /// Whether the plan is a single create.
    pub fn is_create(&self) -> bool {
        matches!(
            self.operations.as_slice(),
            [Operation {
                kind: OperationKind::Create,
                ..
            }]
        )
    }

    fn check(&self, lifecycle: &[LifecycleParam]) -> Result<(), ReconcileError> {
        let blocked = |param: LifecycleParam| lifecycle.contains(&param);

        if !self.exists {
            if blocked(LifecycleParam::BlockCreation) {
                return Err(ReconcileError::Infeasible {
                    field: None,
                    message: "resource does not exist and creation is blocked by lifecycle params"
                        .to_string(),
                });
            }
            return Ok(());
        }

        if blocked(LifecycleParam::BlockAcquire) {
            return Err(ReconcileError::Infeasible {
                field: None,
                message: "resource already exists and acquisition is blocked by lifecycle params"
                    .to_string(),
            });
        }
        if let Some(field) = self.recreate_fields.first() {
            return Err(ReconcileError::Infeasible {
                field: Some(field.clone()),
                message: format!(
                    "field '{}' cannot be changed in place; delete and recreate the resource",
                    field
                ),
            });
        }
        if blocked(LifecycleParam::BlockModification) {
            if let Some(diff) = self.operations.iter().flat_map(|op| &op.diffs).next() {
                return Err(ReconcileError::Infeasible {
                    field: Some(diff.path.clone()),
                    message: format!(
                        "field '{}' differs and modification is blocked by lifecycle params",
                        diff.path
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Build and check the plan for a set of diffs.
///
/// Fails with [`ReconcileError::UnknownOperation`] when a diff names an
/// operation the schema does not declare, and with
/// [`ReconcileError::Infeasible`] when recreation would be needed on an
/// existing resource or `lifecycle` blocks the plan.
pub fn plan(
    schema: &ResourceSchema,
    diffs: &[FieldDiff],
    exists: bool,
    lifecycle: &[LifecycleParam],
) -> Result<Plan, ReconcileError> {
    for op in diffs.iter().flat_map(FieldDiff::operations) {
        if !schema.has_operation(op) {
            return Err(ReconcileError::UnknownOperation(format!(
                "{} has no operation named '{}'",
                schema.kind, op
            )));
        }
    }

    let plan = if exists {
        let recreate_fields = diffs
            .iter()
            .filter(|d| d.requires_recreate())
            .map(|d| d.path.clone())
            .collect();
        let operations = schema
            .operations
            .iter()
            .filter_map(|name| {
                let contributing: Vec<FieldDiff> = diffs
                    .iter()
                    .filter(|d| d.operations().any(|op| op == name.as_str()))
                    .cloned()
                    .collect();
                (!contributing.is_empty())
                    .then(|| Operation::new(OperationKind::Update(name.clone()), contributing))
            })
            .collect();
        Plan {
            exists,
            operations,
            recreate_fields,
        }
    } else {
        Plan {
            exists,
            operations: vec![Operation::new(OperationKind::Create, diffs.to_vec())],
            recreate_fields: Vec::new(),
        }
    };

    plan.check(lifecycle)?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Trigger;
    use crate::schema::{FieldDescriptor, FieldKind};
    use crate::testing::InMemoryStore;
    use crate::value::Value;

    fn schema() -> ResourceSchema {
        ResourceSchema::new("Pool", "pools/{{name}}")
            .with_field("name", FieldDescriptor::string())
            .with_field("tier", FieldDescriptor::enumeration().immutable())
            .with_field(
                "labels",
                FieldDescriptor::map(FieldKind::String).updated_by("update_pool"),
            )
            .with_field(
                "display",
                FieldDescriptor::string().updated_by("update_display"),
            )
            .with_operation("update_pool")
            .with_operation("update_display")
    }

    fn update(path: &str, op: &str) -> FieldDiff {
        FieldDiff::changed(
            path,
            Value::from("new"),
            Value::from("old"),
            vec![Trigger::Operation(op.to_string())],
        )
    }

    #[test]
    fn test_missing_resource_collapses_to_create() {
        let diffs = vec![
            update("labels", "update_pool"),
            FieldDiff::added("tier", Value::from("ENTERPRISE"), vec![Trigger::Recreate]),
        ];
        let plan = plan(&schema(), &diffs, false, &[]).unwrap();
        assert!(plan.is_create());
        assert_eq!(plan.operation_names(), vec!["create"]);
        assert!(!plan.requires_recreate());
    }

    #[test]
    fn test_updates_follow_declaration_order() {
        let diffs = vec![
            update("display", "update_display"),
            update("labels.env", "update_pool"),
            update("labels.team", "update_pool"),
        ];
        let plan = plan(&schema(), &diffs, true, &[]).unwrap();
        assert_eq!(plan.operation_names(), vec!["update_pool", "update_display"]);
        assert_eq!(plan.operations[0].diffs.len(), 2);
        assert_eq!(plan.operations[0].field_mask(), vec!["labels"]);
        assert_eq!(plan.operations[0].to_string(), "update_pool [labels]");
    }

    #[test]
    fn test_no_diffs_no_operations() {
        let plan = plan(&schema(), &[], true, &[]).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_informational_diffs_are_not_planned() {
        let diffs = vec![FieldDiff::changed("state", Value::from("A"), Value::from("B"), vec![])];
        let plan = plan(&schema(), &diffs, true, &[]).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_recreate_on_existing_is_infeasible() {
        let diffs = vec![
            update("labels", "update_pool"),
            FieldDiff::changed(
                "tier",
                Value::from("ENTERPRISE"),
                Value::from("DEVOPS"),
                vec![Trigger::Recreate],
            ),
        ];
        let err = plan(&schema(), &diffs, true, &[]).unwrap_err();
        assert!(matches!(err, ReconcileError::Infeasible { .. }));
        assert_eq!(err.field(), Some("tier"));
    }

    #[test]
    fn test_unknown_operation() {
        let diffs = vec![update("labels", "update_everything")];
        let err = plan(&schema(), &diffs, true, &[]).unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownOperation(_)));
    }

    #[test]
    fn test_lifecycle_params() {
        let err = plan(&schema(), &[], false, &[LifecycleParam::BlockCreation]).unwrap_err();
        assert_eq!(err.field(), None);

        let err = plan(&schema(), &[], true, &[LifecycleParam::BlockAcquire]).unwrap_err();
        assert!(matches!(err, ReconcileError::Infeasible { .. }));

        let diffs = vec![update("labels", "update_pool")];
        let err = plan(&schema(), &diffs, true, &[LifecycleParam::BlockModification]).unwrap_err();
        assert_eq!(err.field(), Some("labels"));

        assert!(plan(&schema(), &[], true, &[LifecycleParam::BlockModification]).is_ok());
        assert!(plan(&schema(), &[], true, &[LifecycleParam::BlockCreation]).is_ok());
    }

    #[tokio::test]
    async fn test_update_sends_mask_and_identity() {
        let schema = schema();
        let id = ResourceIdentity::new("pools/p");
        let store = InMemoryStore::new().with_resource(
            id.clone(),
            Object::new().with("name", "p").with("tier", "DEVOPS"),
        );
        let desired = Object::new()
            .with("name", "p")
            .with("tier", "DEVOPS")
            .with("labels", Object::new().with("env", "prod"));

        let op = Operation::new(
            OperationKind::Update("update_pool".into()),
            vec![update("labels", "update_pool")],
        );
        let response = op.execute(&store, &schema, &id, &desired).await.unwrap();
        assert!(response.is_some());

        let calls = store.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].operation, "update_pool");
        assert_eq!(calls[0].field_mask, vec!["labels".to_string()]);
        let partial = calls[0].partial.as_ref().unwrap();
        assert!(partial.get("name").is_value());
        assert!(partial.get("tier").is_unset());
    }

    #[tokio::test]
    async fn test_delete_returns_no_document() {
        let id = ResourceIdentity::new("pools/p");
        let store = InMemoryStore::new().with_resource(id.clone(), Object::new().with("name", "p"));

        let op = Operation::new(OperationKind::Delete, vec![]);
        let response = op.execute(&store, &schema(), &id, &Object::new()).await.unwrap();
        assert!(response.is_none());
        assert!(store.resource(&id).is_none());
    }
}
