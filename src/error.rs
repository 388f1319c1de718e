//! Error types for the OpenFGA operator

use thiserror::Error;

/// Main error type for operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Model DSL could not be translated to the OpenFGA schema
    #[error("model translation error at {line}:{column}: {message}")]
    Translation {
        /// 1-based line of the offending token
        line: usize,
        /// 1-based column of the offending token
        column: usize,
        /// What went wrong
        message: String,
    },

    /// OpenFGA API call failed
    #[error("openfga {operation} failed: {message}")]
    Backend {
        /// Name of the API operation (e.g. "create_store")
        operation: &'static str,
        /// HTTP status returned by the server, if a response was received
        status: Option<u16>,
        /// Error message returned by the server or the transport
        message: String,
        /// Whether the failure is expected to resolve on its own
        retryable: bool,
    },

    /// A referenced resource does not exist (yet)
    #[error("not found: {0}")]
    NotFound(String),

    /// Validation error for CRD specs and bundles
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unexpected internal state
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a translation error at the given 1-based position
    pub fn translation(line: usize, column: usize, msg: impl Into<String>) -> Self {
        Self::Translation {
            line,
            column,
            message: msg.into(),
        }
    }

    /// Create a backend error, classifying retryability from the HTTP status
    ///
    /// A missing status means the request never completed (connect failure,
    /// timeout) and is always retryable.
    pub fn backend(operation: &'static str, status: Option<u16>, msg: impl Into<String>) -> Self {
        let retryable = match status {
            None => true,
            Some(408) | Some(429) => true,
            Some(code) => code >= 500,
        };
        Self::Backend {
            operation,
            status,
            message: msg.into(),
            retryable,
        }
    }

    /// Create a not-found error with the given message
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether retrying the same operation later may succeed
    ///
    /// Permanent errors (bad DSL, rejected requests, invalid specs) only clear
    /// when the declared spec changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(resp)) => {
                resp.code >= 500 || resp.code == 409 || resp.code == 429
            }
            Error::Kube(_) => true,
            Error::Translation { .. } => false,
            Error::Backend { retryable, .. } => *retryable,
            Error::NotFound(_) => true,
            Error::Validation(_) => false,
            Error::Serialization(_) => false,
            Error::Internal(_) => true,
        }
    }

    /// Whether this is an optimistic-concurrency conflict from the API server
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(resp)) if resp.code == 409)
    }

    /// Whether the error reports a missing resource, local or remote
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            Error::Backend { status, .. } => *status == Some(404),
            _ => false,
        }
    }
}
