//! The remote resource store the reconciler drives.
//!
//! Implementations wrap a management API. They report failures with
//! [`ReconcileError`]: `NotFound` from [`ResourceStore::fetch`] means the
//! resource does not exist yet, `Conflict` from any call is retried by the
//! reconciler, and anything else is terminal.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::error::ReconcileError;
use crate::value::Object;

/// The rendered identity of a remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ResourceIdentity(String);

impl ResourceIdentity {
    /// Wrap a rendered identity.
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    /// The identity as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceIdentity {
    fn from(identity: &str) -> Self {
        Self::new(identity)
    }
}

impl From<String> for ResourceIdentity {
    fn from(identity: String) -> Self {
        Self(identity)
    }
}

/// Remote operations on resources of one type.
///
/// # Example
///
/// ```ignore
/// use hemmer_reconciler::{Object, ReconcileError, ResourceIdentity, ResourceStore};
///
/// struct PoolApi { /* client */ }
///
/// #[async_trait::async_trait]
/// impl ResourceStore for PoolApi {
///     async fn fetch(&self, identity: &ResourceIdentity) -> Result<Object, ReconcileError> {
///         // GET the resource, map 404 to ReconcileError::NotFound
///         todo!()
///     }
///
///     // ... implement create, mutate and delete
/// }
/// ```
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Read the current remote state.
    async fn fetch(&self, identity: &ResourceIdentity) -> Result<Object, ReconcileError>;

    /// Create the resource, returning the server's response document.
    async fn create(
        &self,
        identity: &ResourceIdentity,
        resource: Object,
    ) -> Result<Object, ReconcileError>;

    /// Apply a named partial update.
    ///
    /// `field_mask` lists the top-level fields being changed; `partial`
    /// carries those fields plus the identity fields.
    async fn mutate(
        &self,
        identity: &ResourceIdentity,
        operation: &str,
        field_mask: &[String],
        partial: Object,
    ) -> Result<Object, ReconcileError>;

    /// Delete the resource.
    async fn delete(&self, identity: &ResourceIdentity) -> Result<(), ReconcileError>;
}

#[async_trait]
impl<S: ResourceStore + ?Sized> ResourceStore for Arc<S> {
    async fn fetch(&self, identity: &ResourceIdentity) -> Result<Object, ReconcileError> {
        (**self).fetch(identity).await
    }

    async fn create(
        &self,
        identity: &ResourceIdentity,
        resource: Object,
    ) -> Result<Object, ReconcileError> {
        (**self).create(identity, resource).await
    }

    async fn mutate(
        &self,
        identity: &ResourceIdentity,
        operation: &str,
        field_mask: &[String],
        partial: Object,
    ) -> Result<Object, ReconcileError> {
        (**self).mutate(identity, operation, field_mask, partial).await
    }

    async fn delete(&self, identity: &ResourceIdentity) -> Result<(), ReconcileError> {
        (**self).delete(identity).await
    }
}
