//! Hemmer Reconciler
//!
//! This crate drives a remote resource toward a desired state. Given a
//! schema describing a resource's fields and a [`ResourceStore`] that talks to
//! the remote API, the [`Reconciler`] fetches the current state, computes the
//! field-level differences, plans the operations that remove them and applies
//! those operations until the resource converges.
//!
//! # Overview
//!
//! The crate provides:
//!
//! - **Value model**: [`Value`], [`Object`] and the tri-state [`Setting`]
//!   (unset, explicitly cleared, or set)
//! - **Schemas**: [`ResourceSchema`] with per-field diff policies, equivalence
//!   rules and identity templates
//! - **Canonicalization**: desired values that the remote considers equal are
//!   rewritten to the remote's form before diffing
//! - **Diffing and planning**: [`diff`](diff::diff) and [`plan`](plan::plan)
//!   turn two states into a create or a sequence of named update operations
//! - **Apply driver**: [`Reconciler::apply`] with conflict retry, post-apply
//!   verification, lifecycle restrictions, cancellation and deadlines
//! - **Resource schemas**: the [`privateca`] module describes CA pools,
//!   certificate templates, certificate authorities and certificates
//! - **Testing**: an in-memory fake store and plan assertions in [`testing`]
//! - **Logging**: Integration with `tracing` for structured logging
//!
//! # Quick Start
//!
//! ```ignore
//! use hemmer_reconciler::{
//!     async_trait, privateca, Object, ReconcileError, Reconciler, ResourceIdentity,
//!     ResourceStore,
//! };
//!
//! struct PoolApi { /* client */ }
//!
//! #[async_trait]
//! impl ResourceStore for PoolApi {
//!     async fn fetch(&self, id: &ResourceIdentity) -> Result<Object, ReconcileError> {
//!         todo!("GET {id}")
//!     }
//!
//!     async fn create(
//!         &self,
//!         id: &ResourceIdentity,
//!         resource: Object,
//!     ) -> Result<Object, ReconcileError> {
//!         todo!("POST {id}")
//!     }
//!
//!     async fn mutate(
//!         &self,
//!         id: &ResourceIdentity,
//!         operation: &str,
//!         field_mask: &[String],
//!         partial: Object,
//!     ) -> Result<Object, ReconcileError> {
//!         todo!("PATCH {id}")
//!     }
//!
//!     async fn delete(&self, id: &ResourceIdentity) -> Result<(), ReconcileError> {
//!         todo!("DELETE {id}")
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     hemmer_reconciler::init_logging();
//!
//!     let reconciler = Reconciler::new(privateca::ca_pool(), PoolApi {});
//!     let desired = Object::new()
//!         .with("project", "my-project")
//!         .with("location", "us-central1")
//!         .with("name", "pool-1")
//!         .with("tier", "ENTERPRISE");
//!     let state = reconciler.apply(&desired).await?;
//!     println!("{state}");
//!     Ok(())
//! }
//! ```
//!
//! # Apply Cycle
//!
//! One call to [`Reconciler::apply`] runs:
//!
//! 1. Validate the desired state against the schema
//! 2. Fetch the current state (absent when the store reports not found)
//! 3. Canonicalize the desired state against it and diff
//! 4. Plan: a single create, or the update operations the diffs trigger
//! 5. Run each operation; a conflict restarts the cycle under the retry policy
//! 6. Re-fetch and diff again; any remaining change is a failure

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canonicalize;
pub mod diff;
pub mod equivalence;
pub mod error;
pub mod logging;
pub mod plan;
pub mod privateca;
pub mod reconciler;
pub mod retry;
pub mod schema;
pub mod store;
pub mod testing;
pub mod validation;
pub mod value;

// Re-export main types at crate root
pub use canonicalize::{canonicalize, canonicalize_new};
pub use diff::{diff, DiffKind, FieldDiff, Trigger};
pub use equivalence::Equivalence;
pub use error::ReconcileError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use plan::{plan, LifecycleParam, Operation, OperationKind, Plan};
pub use reconciler::{ApplyFailure, ApplyOptions, Reconciler, APPLY_OPERATION};
pub use retry::{ExponentialBackoff, NoRetry, RetryPolicy};
pub use schema::{
    Block, Diagnostic, DiagnosticSeverity, DiffPolicy, FieldDescriptor, FieldKind,
    ResourceSchema, SchemaRegistry,
};
pub use store::{ResourceIdentity, ResourceStore};
pub use validation::{is_valid, validate, validate_result};
pub use value::{Object, Setting, Value};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tokio_util::sync::CancellationToken;
pub use tracing;
