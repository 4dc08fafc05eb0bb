use crate::resource::{ResourceId, StatusField};
use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors are classified by the behavior they demand from the scheduler, not
/// by their origin.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A token was read before its referent recorded a status. The deploy
    /// step aborts and the next reconcile resumes naturally.
    #[error("token {resource} #{field} is unfulfilled")]
    Unfulfilled {
        resource: ResourceId,
        field: StatusField,
    },

    /// A transient or expected-soon condition; re-enqueue immediately.
    #[error("requeue")]
    Requeue,

    /// Re-enqueue after the given delay (validation waits, rate limits).
    #[error("requeue after {0:?}")]
    RequeueAfter(Duration),

    /// An error returned by the cloud. `retryable` steers the bounded retry
    /// loops; non-retryable errors propagate.
    #[error("{code}: {message}")]
    Cloud {
        code: String,
        message: String,
        retryable: bool,
    },

    /// Invalid user-supplied configuration. Surfaced as a Warning event on
    /// the source object; the object is skipped until it is mutated.
    #[error("configuration: {0}")]
    Config(String),

    /// A violated programmer-level invariant (cycle detected, unknown kind).
    /// Panics the reconciler of the offending object only.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    pub fn cloud(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let retryable = matches!(
            code.as_str(),
            "Throttling"
                | "ThrottlingException"
                | "RequestLimitExceeded"
                | "ServiceUnavailable"
                | "InternalFailure"
                | "ResourceInUse"
                | "ResourceInUseException"
        );
        Error::Cloud {
            code,
            message: message.into(),
            retryable,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Error::Fatal(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Cloud { retryable: true, .. })
    }

    /// The cloud reports the resource as still referenced by another
    /// resource. Deletions poll on this until the bounded ceiling.
    pub fn is_in_use(&self) -> bool {
        matches!(
            self,
            Error::Cloud { code, .. }
                if code == "ResourceInUse" || code == "ResourceInUseException"
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Cloud { code, .. }
                if code.ends_with("NotFound") || code.ends_with("NotFoundException")
        )
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Unfulfilled { .. } => ErrorCategory::Unfulfilled,
            Error::Requeue | Error::RequeueAfter(_) => ErrorCategory::Requeue,
            Error::Cloud {
                retryable: true, ..
            } => ErrorCategory::CloudRetryable,
            Error::Cloud { .. } => ErrorCategory::Cloud,
            Error::Config(_) => ErrorCategory::Config,
            Error::Fatal(_) => ErrorCategory::Fatal,
        }
    }
}

/// Label value for the reconcile error counter family.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum ErrorCategory {
    Unfulfilled,
    Requeue,
    Cloud,
    CloudRetryable,
    Config,
    Fatal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Unfulfilled => "unfulfilled",
            ErrorCategory::Requeue => "requeue",
            ErrorCategory::Cloud => "cloud",
            ErrorCategory::CloudRetryable => "cloud-retryable",
            ErrorCategory::Config => "config",
            ErrorCategory::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
