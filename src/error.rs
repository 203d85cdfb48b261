//! Error types for the Hemmer reconciler.

use thiserror::Error;

use crate::schema::Diagnostic;

/// Errors raised by the reconciliation engine and by [`ResourceStore`] implementations.
///
/// Store implementations report remote failures with the same type so the
/// apply driver can classify them: [`ReconcileError::NotFound`] at the fetch
/// boundary means "not yet created", [`ReconcileError::Conflict`] is retried
/// according to the caller's retry policy, and everything else is terminal.
///
/// [`ResourceStore`]: crate::store::ResourceStore
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The remote system rejected a call because of a concurrent modification.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The desired state cannot be reached without a destructive or blocked action.
    #[error("Infeasible: {message}")]
    Infeasible {
        /// Path of the field whose diff caused the decision, if one did.
        field: Option<String>,
        /// Why the change is infeasible.
        message: String,
    },

    /// The mutation succeeded but the re-fetched state still differs from the desired state.
    #[error("Diffs remain after apply: {}", .diffs.join("; "))]
    DiffAfterApply {
        /// Human-readable rendering of each remaining diff.
        diffs: Vec<String>,
        /// Paths of the fields that still differ.
        fields: Vec<String>,
    },

    /// The desired state failed schema validation.
    #[error("Validation error: {}", summarize(.0))]
    Validation(Vec<Diagnostic>),

    /// A diff triggered an operation the resource schema does not declare.
    #[error("No such operation: {0}")]
    UnknownOperation(String),

    /// Conflict retries were exhausted.
    #[error("Gave up after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        /// Number of reconciliation cycles attempted.
        attempts: u32,
        /// The error returned by the last attempt.
        last: Box<ReconcileError>,
    },

    /// The caller cancelled the reconciliation.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The caller-supplied deadline passed.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Permission denied (authentication/authorization failure).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Service temporarily unavailable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Invalid request from the client.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Any other remote failure.
    #[error("Remote error: {0}")]
    Remote(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReconcileError {
    /// Get the error message as a string.
    ///
    /// Returns a reference to the error message for variants that carry one.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg) => msg,
            Self::Conflict(msg) => msg,
            Self::Infeasible { message, .. } => message,
            Self::DiffAfterApply { .. } => "diffs remain after apply",
            Self::Validation(_) => "validation failed (see diagnostics)",
            Self::UnknownOperation(msg) => msg,
            Self::RetriesExhausted { last, .. } => last.message(),
            Self::Cancelled(msg) => msg,
            Self::DeadlineExceeded(msg) => msg,
            Self::PermissionDenied(msg) => msg,
            Self::Unavailable(msg) => msg,
            Self::InvalidRequest(msg) => msg,
            Self::Remote(msg) => msg,
            Self::Serialization(_err) => "serialization error (see Debug output)",
        }
    }

    /// Whether this is a concurrent-modification conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether the remote resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the mutation went through but verification still found diffs.
    ///
    /// Callers that tolerate eventual consistency may treat this as a soft failure.
    pub fn is_diff_after_apply(&self) -> bool {
        matches!(self, Self::DiffAfterApply { .. })
    }

    /// The offending field path when the error was caused by a diff.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Infeasible { field, .. } => field.as_deref(),
            Self::DiffAfterApply { fields, .. } => fields.first().map(String::as_str),
            Self::RetriesExhausted { last, .. } => last.field(),
            _ => None,
        }
    }
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| match &d.attribute {
            Some(attr) => format!("{} (at {})", d.summary, attr),
            None => d.summary.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ReconcileError::NotFound("pools/p1".to_string());
        assert_eq!(format!("{}", err), "Resource not found: pools/p1");

        let err = ReconcileError::Conflict("etag mismatch".to_string());
        assert_eq!(format!("{}", err), "Conflict: etag mismatch");

        let err = ReconcileError::Infeasible {
            field: Some("tier".to_string()),
            message: "field 'tier' would require recreation".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "Infeasible: field 'tier' would require recreation"
        );
    }

    #[test]
    fn test_diff_after_apply_display() {
        let err = ReconcileError::DiffAfterApply {
            diffs: vec!["labels: changed".to_string(), "tier: changed".to_string()],
            fields: vec!["labels".to_string(), "tier".to_string()],
        };
        assert_eq!(
            format!("{}", err),
            "Diffs remain after apply: labels: changed; tier: changed"
        );
        assert!(err.is_diff_after_apply());
        assert_eq!(err.field(), Some("labels"));
    }

    #[test]
    fn test_validation_display() {
        let err = ReconcileError::Validation(vec![
            Diagnostic::error("Missing required attribute 'name'").with_attribute("name"),
            Diagnostic::error("Invalid type"),
        ]);
        assert_eq!(
            format!("{}", err),
            "Validation error: Missing required attribute 'name' (at name); Invalid type"
        );
    }

    #[test]
    fn test_classification() {
        assert!(ReconcileError::Conflict("x".to_string()).is_conflict());
        assert!(!ReconcileError::Remote("x".to_string()).is_conflict());
        assert!(ReconcileError::NotFound("x".to_string()).is_not_found());
        assert!(!ReconcileError::Unavailable("x".to_string()).is_not_found());
    }

    #[test]
    fn test_retries_exhausted_delegates() {
        let err = ReconcileError::RetriesExhausted {
            attempts: 3,
            last: Box::new(ReconcileError::Conflict("busy".to_string())),
        };
        assert_eq!(format!("{}", err), "Gave up after 3 attempt(s): Conflict: busy");
        assert_eq!(err.message(), "busy");
        assert_eq!(err.field(), None);
    }

    #[test]
    fn test_message_method() {
        let err = ReconcileError::NotFound("resource-123".to_string());
        assert_eq!(err.message(), "resource-123");

        let err = ReconcileError::Infeasible {
            field: Some("name".to_string()),
            message: "blocked".to_string(),
        };
        assert_eq!(err.message(), "blocked");
        assert_eq!(err.field(), Some("name"));

        let err = ReconcileError::Infeasible {
            field: None,
            message: "creation blocked".to_string(),
        };
        assert_eq!(err.field(), None);
    }
}
