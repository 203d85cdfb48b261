//! The apply driver.
//!
//! [`Reconciler::apply`] runs one reconciliation of a desired state:
//!
//! 1. fetch the current remote state (absence means "create")
//! 2. canonicalize the desired state against it
//! 3. diff and plan
//! 4. execute the planned operations in order
//! 5. re-fetch, re-canonicalize and re-diff to verify convergence
//!
//! A cycle that fails with a conflict is restarted from step 1 as long as
//! the retry policy allows. Every remote call races the caller's cancellation
//! token and deadline.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Span};

use crate::canonicalize::{canonicalize, canonicalize_new};
use crate::diff::{diff, FieldDiff};
use crate::error::ReconcileError;
use crate::plan::{plan, LifecycleParam, Operation, OperationKind};
use crate::retry::{ExponentialBackoff, RetryPolicy};
use crate::schema::ResourceSchema;
use crate::store::{ResourceIdentity, ResourceStore};
use crate::validation::validate;
use crate::value::{Object, EMPTY_OBJECT};

/// Operation name passed to the retry policy when a cycle fails before any operation ran.
pub const APPLY_OPERATION: &str = "apply";

/// Options for a single apply.
///
/// # Example
///
/// ```
/// use hemmer_reconciler::{ApplyOptions, LifecycleParam};
/// use std::time::Duration;
///
/// let options = ApplyOptions::new()
///     .with_lifecycle(LifecycleParam::BlockCreation)
///     .with_timeout(Duration::from_secs(60));
/// assert_eq!(options.lifecycle, vec![LifecycleParam::BlockCreation]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Restrictions on what the apply may do.
    pub lifecycle: Vec<LifecycleParam>,
    /// A document whose identity is used for the initial fetch.
    pub state_hint: Option<Object>,
    /// Overall time limit, measured from the start of the apply.
    pub timeout: Option<Duration>,
    /// Cancels the apply at the next remote call boundary.
    pub cancellation: Option<CancellationToken>,
}

impl ApplyOptions {
    /// Create options with no restrictions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a lifecycle restriction.
    pub fn with_lifecycle(mut self, param: LifecycleParam) -> Self {
        if !self.lifecycle.contains(&param) {
            self.lifecycle.push(param);
        }
        self
    }

    /// Fetch the initial state using the identity of `hint`.
    pub fn with_state_hint(mut self, hint: Object) -> Self {
        self.state_hint = Some(hint);
        self
    }

    /// Set the overall time limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// A failed apply.
///
/// Operations that ran before the failure are not rolled back; `state`
/// carries the best-effort remote state observed afterwards.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ApplyFailure {
    /// What went wrong.
    #[source]
    pub error: ReconcileError,
    /// The remote state after the failure, if it could be observed.
    pub state: Option<Object>,
    /// The operation that failed, if the failure came from one.
    pub operation: Option<String>,
}

impl ApplyFailure {
    fn new(error: ReconcileError, state: Option<Object>) -> Self {
        Self {
            error,
            state,
            operation: None,
        }
    }
}

impl From<ReconcileError> for ApplyFailure {
    fn from(error: ReconcileError) -> Self {
        Self::new(error, None)
    }
}

/// Reconciles resources of one type against a [`ResourceStore`].
///
/// Reconciling different identities concurrently is safe. Concurrent applies
/// to the same identity must be serialized by the caller.
pub struct Reconciler<S, P = ExponentialBackoff> {
    schema: Arc<ResourceSchema>,
    store: S,
    retry: P,
}

impl<S: ResourceStore> Reconciler<S> {
    /// Create a reconciler with the default retry policy.
    pub fn new(schema: Arc<ResourceSchema>, store: S) -> Self {
        Self {
            schema,
            store,
            retry: ExponentialBackoff::default(),
        }
    }
}

impl<S: ResourceStore, P: RetryPolicy> Reconciler<S, P> {
    /// Replace the retry policy.
    pub fn with_retry_policy<Q: RetryPolicy>(self, retry: Q) -> Reconciler<S, Q> {
        Reconciler {
            schema: self.schema,
            store: self.store,
            retry,
        }
    }

    /// The resource schema.
    pub fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply a desired state with default options.
    pub async fn apply(&self, desired: &Object) -> Result<Object, ApplyFailure> {
        self.apply_with(desired, &ApplyOptions::default()).await
    }

    /// Apply a desired state.
    ///
    /// Returns the converged remote state. Fails with
    /// [`ReconcileError::DiffAfterApply`] when the mutations succeeded but the
    /// re-fetched state still differs, and with
    /// [`ReconcileError::RetriesExhausted`] when conflicts outlast the retry
    /// policy.
    #[instrument(
        skip_all,
        fields(kind = %self.schema.kind, identity = tracing::field::Empty)
    )]
    pub async fn apply_with(
        &self,
        desired: &Object,
        options: &ApplyOptions,
    ) -> Result<Object, ApplyFailure> {
        self.validate(desired)?;
        let identity = self.schema.identity(desired)?;
        Span::current().record("identity", identity.as_str());

        let guard = CallGuard::new(options);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let failure = match self.apply_once(desired, &identity, options, &guard).await {
                Ok(state) => return Ok(state),
                Err(failure) if failure.error.is_conflict() => failure,
                Err(failure) => return Err(failure),
            };

            let operation = failure.operation.as_deref().unwrap_or(APPLY_OPERATION);
            match self.retry.next_delay(operation, attempt) {
                Some(delay) => {
                    warn!(attempt, ?delay, error = %failure.error, "Conflict, retrying");
                    guard
                        .run("retry backoff", async {
                            tokio::time::sleep(delay).await;
                            Ok(())
                        })
                        .await
                        .map_err(|error| ApplyFailure { error, ..failure })?;
                },
                None => {
                    warn!(attempt, error = %failure.error, "Conflict retries exhausted");
                    return Err(ApplyFailure {
                        error: ReconcileError::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(failure.error),
                        },
                        state: failure.state,
                        operation: failure.operation,
                    });
                },
            }
        }
    }

    /// Fetch the remote state for a document and canonicalize it against that document.
    #[instrument(skip_all, fields(kind = %self.schema.kind, identity = tracing::field::Empty))]
    pub async fn get(&self, desired: &Object) -> Result<Object, ReconcileError> {
        let identity = self.schema.identity(desired)?;
        Span::current().record("identity", identity.as_str());
        debug!("Fetching resource");
        let raw = self.store.fetch(&identity).await?;
        Ok(canonicalize_new(&self.schema, desired, &raw))
    }

    /// Delete the resource a document identifies. A missing resource is not an error.
    #[instrument(skip_all, fields(kind = %self.schema.kind, identity = tracing::field::Empty))]
    pub async fn delete(&self, desired: &Object) -> Result<(), ReconcileError> {
        let identity = self.schema.identity(desired)?;
        Span::current().record("identity", identity.as_str());
        let op = Operation::new(OperationKind::Delete, Vec::new());
        info!("Performing operation delete");
        match op.execute(&self.store, &self.schema, &identity, desired).await {
            Ok(_) => {
                info!("Finished operation delete");
                Ok(())
            },
            Err(e) if e.is_not_found() => {
                info!("Resource already absent");
                Ok(())
            },
            Err(e) => {
                warn!(error = %e, "Failed operation delete");
                Err(e)
            },
        }
    }

    fn validate(&self, desired: &Object) -> Result<(), ReconcileError> {
        let (errors, warnings): (Vec<_>, Vec<_>) = validate(&self.schema, desired)
            .into_iter()
            .partition(|d| d.is_error());
        for warning in &warnings {
            warn!(attribute = ?warning.attribute, "{}", warning.summary);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ReconcileError::Validation(errors))
        }
    }

    async fn apply_once(
        &self,
        desired: &Object,
        identity: &ResourceIdentity,
        options: &ApplyOptions,
        guard: &CallGuard,
    ) -> Result<Object, ApplyFailure> {
        let fetch_identity = match &options.state_hint {
            Some(hint) => self.schema.identity(hint)?,
            None => identity.clone(),
        };

        info!(identity = %fetch_identity, "Fetching initial state");
        let initial_raw = match guard.run("fetch", self.store.fetch(&fetch_identity)).await {
            Ok(raw) => Some(raw),
            Err(e) if e.is_not_found() => {
                info!("Resource not found");
                None
            },
            Err(e) => return Err(e.into()),
        };
        let initial = initial_raw
            .as_ref()
            .map(|raw| canonicalize_new(&self.schema, desired, raw));

        let canonical = canonicalize(&self.schema, desired, initial.as_ref());
        debug!(desired = %canonical, "Canonicalized desired state");

        let diffs = diff(&self.schema, &canonical, initial.as_ref().unwrap_or(&EMPTY_OBJECT));
        for d in &diffs {
            debug!(diff = %d, "Found diff");
        }
        let plan = plan(
            &self.schema,
            &diffs,
            initial.is_some(),
            &options.lifecycle,
        )
        .map_err(|e| ApplyFailure::new(e, initial.clone()))?;
        info!(operations = ?plan.operation_names(), "Created plan");

        // Raw state as of the last successful call, reported if a later call fails.
        // A hinted initial fetch describes another identity and is not reused.
        let mut last_known = initial_raw.filter(|_| fetch_identity == *identity);
        let mut create_response = None;
        for op in &plan.operations {
            info!(operation = %op, "Performing operation");
            let result = guard
                .run(
                    op.name(),
                    op.execute(&self.store, &self.schema, identity, &canonical),
                )
                .await;
            match result {
                Ok(response) => {
                    info!(operation = op.name(), "Finished operation");
                    if let Some(mut response) = response {
                        if let Some(previous) = &last_known {
                            response.fill_missing_from(previous);
                        }
                        if op.kind == OperationKind::Create {
                            create_response = Some(response.clone());
                        }
                        last_known = Some(response);
                    }
                },
                Err(error) => {
                    warn!(operation = op.name(), error = %error, "Failed operation");
                    let state = self
                        .observe(desired, identity, guard)
                        .await
                        .or_else(|| self.last_known_state(desired, last_known.as_ref()));
                    return Err(ApplyFailure {
                        error,
                        state,
                        operation: Some(op.name().to_string()),
                    });
                },
            }
        }

        let mut raw_new = guard
            .run("fetch", self.store.fetch(identity))
            .await
            .map_err(|error| {
                warn!(error = %error, "Failed to fetch state after apply");
                ApplyFailure::new(error, self.last_known_state(desired, last_known.as_ref()))
            })?;
        if let Some(response) = &create_response {
            raw_new.fill_missing_from(response);
        }
        let new_state = canonicalize_new(&self.schema, desired, &raw_new);
        let new_desired = canonicalize(&self.schema, desired, Some(&new_state));

        let (informational, remaining): (Vec<FieldDiff>, Vec<FieldDiff>) =
            diff(&self.schema, &new_desired, &new_state)
                .into_iter()
                .partition(FieldDiff::is_informational);
        for d in &informational {
            debug!(diff = %d, "Ignoring output-only diff after apply");
        }
        if !remaining.is_empty() {
            for d in &remaining {
                warn!(diff = %d, "Found diff after apply");
            }
            return Err(ApplyFailure::new(
                ReconcileError::DiffAfterApply {
                    diffs: remaining.iter().map(ToString::to_string).collect(),
                    fields: remaining.iter().map(|d| d.path.clone()).collect(),
                },
                Some(new_state),
            ));
        }

        info!("Apply converged");
        Ok(new_state)
    }

    fn last_known_state(&self, desired: &Object, raw: Option<&Object>) -> Option<Object> {
        raw.map(|raw| canonicalize_new(&self.schema, desired, raw))
    }

    async fn observe(
        &self,
        desired: &Object,
        identity: &ResourceIdentity,
        guard: &CallGuard,
    ) -> Option<Object> {
        match guard.run("fetch", self.store.fetch(identity)).await {
            Ok(raw) => Some(canonicalize_new(&self.schema, desired, &raw)),
            Err(e) => {
                debug!(error = %e, "Could not observe state after failure");
                None
            },
        }
    }
}

/// Races remote calls against cancellation and the deadline.
struct CallGuard {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl CallGuard {
    fn new(options: &ApplyOptions) -> Self {
        Self {
            token: options.cancellation.clone(),
            deadline: options.timeout.map(|timeout| Instant::now() + timeout),
        }
    }

    async fn run<T>(
        &self,
        call: &str,
        future: impl Future<Output = Result<T, ReconcileError>>,
    ) -> Result<T, ReconcileError> {
        let cancelled = async {
            match &self.token {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(ReconcileError::Cancelled(format!("cancelled before {} completed", call))),
            _ = expired => Err(ReconcileError::DeadlineExceeded(format!("deadline passed during {}", call))),
            result = future => result,
        }
    }
}
