//! Error types for the auth sync core.

use crate::profile_store::{NO_ROWS_CODE, UNIQUE_VIOLATION_CODE};
use thiserror::Error;

/// Failure reported by the session service boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The service could not be reached (transient, can retry).
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The service answered with an error payload.
    #[error("Session service error: {message}")]
    Api {
        /// HTTP status, when the transport exposes one.
        status: Option<u16>,
        /// Machine-readable error code (e.g. `refresh_token_not_found`).
        code: Option<String>,
        /// Human-readable message.
        message: String,
    },
}

impl ServiceError {
    /// Build an API error without a status.
    pub fn api(code: Option<&str>, message: impl Into<String>) -> Self {
        ServiceError::Api {
            status: None,
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::NetworkUnavailable(_) => true,
            ServiceError::Api { status, .. } => status.is_some_and(|s| s >= 500),
        }
    }
}

/// Failure reported by the profile store boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached (transient, can retry).
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The store answered with an error payload.
    #[error("Profile store error: {status:?} - {message}")]
    Api {
        /// HTTP status returned by the store.
        status: Option<u16>,
        /// PostgREST / Postgres error code (e.g. `PGRST116`, `23505`).
        code: Option<String>,
        /// Human-readable message.
        message: String,
    },
}

impl StoreError {
    /// Build an API error from its parts.
    pub fn api(status: Option<u16>, code: Option<&str>, message: impl Into<String>) -> Self {
        StoreError::Api {
            status,
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    /// The "no row matched" sentinel. Expected control flow, not a failure.
    pub fn no_rows() -> Self {
        Self::api(
            Some(406),
            Some(NO_ROWS_CODE),
            "JSON object requested, multiple (or no) rows returned",
        )
    }

    /// Error code, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            StoreError::NetworkUnavailable(_) => None,
            StoreError::Api { code, .. } => code.as_deref(),
        }
    }

    /// HTTP status, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::NetworkUnavailable(_) => None,
            StoreError::Api { status, .. } => *status,
        }
    }

    /// True for the "no row matched" sentinel.
    pub fn is_no_rows(&self) -> bool {
        self.code() == Some(NO_ROWS_CODE)
    }

    /// True when an insert collided with an existing row.
    pub fn is_unique_violation(&self) -> bool {
        self.code() == Some(UNIQUE_VIOLATION_CODE) || self.status() == Some(409)
    }

    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::NetworkUnavailable(_) => true,
            StoreError::Api { status, .. } => status.is_some_and(|s| s >= 500),
        }
    }
}

/// Failure of a single reconciliation attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// The existence check failed with something other than "no row found".
    #[error("Profile lookup failed: {0}")]
    Lookup(StoreError),

    /// The insert was attempted and rejected.
    #[error("Profile insert failed: {0}")]
    Insert(StoreError),
}

impl ReconcileError {
    /// The underlying store failure.
    pub fn store_error(&self) -> &StoreError {
        match self {
            ReconcileError::Lookup(e) | ReconcileError::Insert(e) => e,
        }
    }
}

/// Errors surfaced by the runtime itself.
#[derive(Error, Debug)]
pub enum AuthSyncError {
    /// Invalid state transition in the session FSM.
    #[error("Invalid session state transition: {0}")]
    InvalidStateTransition(String),

    /// The runtime was started twice.
    #[error("Auth sync runtime already started")]
    AlreadyStarted,

    /// Session service error.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Profile store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Reconciliation error.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Result type alias using AuthSyncError.
pub type AuthSyncResult<T> = Result<T, AuthSyncError>;
