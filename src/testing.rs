//! Testing utilities for reconcilers and store implementations.
//!
//! [`InMemoryStore`] is a fake remote that keeps resources in memory, records
//! every mutating call, and can inject conflicts or mimic server-side
//! normalization. The assertion helpers check plans and diffs with readable
//! failure messages.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_reconciler::testing::InMemoryStore;
//! use hemmer_reconciler::{privateca, Object, Reconciler};
//!
//! #[tokio::test]
//! async fn test_create_pool() {
//!     let store = InMemoryStore::new();
//!     let reconciler = Reconciler::new(privateca::ca_pool(), store.clone());
//!
//!     let desired = Object::new()
//!         .with("project", "p")
//!         .with("location", "us-central1")
//!         .with("name", "pool")
//!         .with("tier", "ENTERPRISE");
//!     reconciler.apply(&desired).await.unwrap();
//!
//!     assert_eq!(store.calls().len(), 1);
//! }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::diff::FieldDiff;
use crate::error::ReconcileError;
use crate::plan::Plan;
use crate::schema::{Diagnostic, DiagnosticSeverity};
use crate::store::{ResourceIdentity, ResourceStore};
use crate::value::{Object, Setting};

/// Rewrites a stored document the way a server would.
pub type Normalizer = Arc<dyn Fn(&mut Object) + Send + Sync>;

/// A mutating call received by an [`InMemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoreCall {
    /// `create`, `delete`, or the update operation name.
    pub operation: String,
    /// The target identity.
    pub identity: ResourceIdentity,
    /// The field mask, for updates.
    pub field_mask: Vec<String>,
    /// The document sent, for creates and updates.
    pub partial: Option<Object>,
}

#[derive(Default)]
struct State {
    resources: HashMap<ResourceIdentity, Object>,
    calls: Vec<StoreCall>,
    fetches: usize,
    pending_conflicts: u32,
}

/// An in-memory [`ResourceStore`].
///
/// Clones share state, so a test can hand one clone to a reconciler and
/// inspect another.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    always_conflict: bool,
    normalizer: Option<Normalizer>,
    hidden_fields: Vec<String>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a resource.
    pub fn with_resource(self, identity: impl Into<ResourceIdentity>, resource: Object) -> Self {
        self.lock().resources.insert(identity.into(), resource);
        self
    }

    /// Fail the next `count` mutating calls with a conflict.
    pub fn with_conflicts(self, count: u32) -> Self {
        self.lock().pending_conflicts = count;
        self
    }

    /// Fail every mutating call with a conflict.
    pub fn always_conflict(mut self) -> Self {
        self.always_conflict = true;
        self
    }

    /// Rewrite documents after every create and update.
    pub fn with_normalizer(mut self, normalizer: impl Fn(&mut Object) + Send + Sync + 'static) -> Self {
        self.normalizer = Some(Arc::new(normalizer));
        self
    }

    /// Omit a field from fetched documents while still returning it from create.
    pub fn with_hidden_field(mut self, field: impl Into<String>) -> Self {
        self.hidden_fields.push(field.into());
        self
    }

    /// The mutating calls received so far.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// The number of fetches received so far.
    pub fn fetch_count(&self) -> usize {
        self.lock().fetches
    }

    /// The stored document for an identity.
    pub fn resource(&self, identity: &ResourceIdentity) -> Option<Object> {
        self.lock().resources.get(identity).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(
        &self,
        state: &mut State,
        call: StoreCall,
    ) -> Result<(), ReconcileError> {
        let identity = call.identity.to_string();
        state.calls.push(call);
        if self.always_conflict {
            return Err(ReconcileError::Conflict(format!("{} is being modified", identity)));
        }
        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            return Err(ReconcileError::Conflict(format!("{} is being modified", identity)));
        }
        Ok(())
    }

    fn normalize(&self, resource: &mut Object) {
        if let Some(normalizer) = &self.normalizer {
            normalizer(resource);
        }
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn fetch(&self, identity: &ResourceIdentity) -> Result<Object, ReconcileError> {
        let mut state = self.lock();
        state.fetches += 1;
        let mut resource = state
            .resources
            .get(identity)
            .cloned()
            .ok_or_else(|| ReconcileError::NotFound(identity.to_string()))?;
        for field in &self.hidden_fields {
            resource.remove(field);
        }
        Ok(resource)
    }

    async fn create(
        &self,
        identity: &ResourceIdentity,
        resource: Object,
    ) -> Result<Object, ReconcileError> {
        let mut state = self.lock();
        self.record(
            &mut state,
            StoreCall {
                operation: "create".to_string(),
                identity: identity.clone(),
                field_mask: Vec::new(),
                partial: Some(resource.clone()),
            },
        )?;
        if state.resources.contains_key(identity) {
            return Err(ReconcileError::Conflict(format!("{} already exists", identity)));
        }
        let mut stored = resource;
        self.normalize(&mut stored);
        state.resources.insert(identity.clone(), stored.clone());
        Ok(stored)
    }

    async fn mutate(
        &self,
        identity: &ResourceIdentity,
        operation: &str,
        field_mask: &[String],
        partial: Object,
    ) -> Result<Object, ReconcileError> {
        let mut state = self.lock();
        self.record(
            &mut state,
            StoreCall {
                operation: operation.to_string(),
                identity: identity.clone(),
                field_mask: field_mask.to_vec(),
                partial: Some(partial.clone()),
            },
        )?;
        let mut updated = state
            .resources
            .get(identity)
            .cloned()
            .ok_or_else(|| ReconcileError::NotFound(identity.to_string()))?;
        for field in field_mask {
            match partial.get(field) {
                Setting::Value(v) => updated.insert(field.clone(), v.clone()),
                _ => {
                    updated.remove(field);
                },
            }
        }
        self.normalize(&mut updated);
        state.resources.insert(identity.clone(), updated.clone());
        Ok(updated)
    }

    async fn delete(&self, identity: &ResourceIdentity) -> Result<(), ReconcileError> {
        let mut state = self.lock();
        self.record(
            &mut state,
            StoreCall {
                operation: "delete".to_string(),
                identity: identity.clone(),
                field_mask: Vec::new(),
                partial: None,
            },
        )?;
        state
            .resources
            .remove(identity)
            .map(|_| ())
            .ok_or_else(|| ReconcileError::NotFound(identity.to_string()))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan does nothing.
///
/// # Panics
///
/// Panics if the plan has any operation.
pub fn assert_plan_no_changes(plan: &Plan) {
    assert!(
        plan.is_empty(),
        "Expected no operations, but got {:?}",
        plan.operation_names()
    );
}

/// Assert that a plan is a single create.
///
/// # Panics
///
/// Panics if the plan is anything else.
pub fn assert_plan_creates(plan: &Plan) {
    assert!(
        plan.is_create(),
        "Expected a single create, but got {:?}",
        plan.operation_names()
    );
}

/// Assert that a plan runs exactly the named update operations, in order.
///
/// # Panics
///
/// Panics if the operation names differ.
pub fn assert_plan_updates(plan: &Plan, operations: &[&str]) {
    assert_eq!(
        plan.operation_names(),
        operations,
        "Expected update operations {:?}, but got {:?}",
        operations,
        plan.operation_names()
    );
}

/// Assert that diffs were reported for exactly these paths, in order.
///
/// # Panics
///
/// Panics if the paths differ.
pub fn assert_diff_paths(diffs: &[FieldDiff], paths: &[&str]) {
    let actual: Vec<&str> = diffs.iter().map(|d| d.path.as_str()).collect();
    assert_eq!(
        actual, paths,
        "Expected diffs at {:?}, but got {:?}",
        paths, actual
    );
}

/// Assert that there are no diffs.
///
/// # Panics
///
/// Panics if any diff is present.
pub fn assert_no_diffs(diffs: &[FieldDiff]) {
    assert!(
        diffs.is_empty(),
        "Expected no diffs, but got: {}",
        diffs
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| matches!(d.severity, DiagnosticSeverity::Error) && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}
