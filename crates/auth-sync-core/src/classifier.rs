//! Classification of boundary failures.
//!
//! This is the only place that decides whether a failure means the session's
//! refresh token is gone. Matching runs against a small enumerated set of
//! markers whose strings are a compatibility surface with the session service.

use crate::{ReconcileError, ServiceError, StoreError};
use serde::Serialize;

/// Outcome of classifying a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorClass {
    /// Network or service hiccup.
    Transient,
    /// Expired or invalid refresh token; the session must be torn down.
    TokenInvalid,
    /// Anything else.
    Unknown,
}

/// Known markers of an invalidated refresh token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenInvalidMarker {
    RefreshTokenNotFound,
    InvalidRefreshToken,
}

impl TokenInvalidMarker {
    pub const ALL: [TokenInvalidMarker; 2] = [
        TokenInvalidMarker::RefreshTokenNotFound,
        TokenInvalidMarker::InvalidRefreshToken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenInvalidMarker::RefreshTokenNotFound => "refresh_token_not_found",
            TokenInvalidMarker::InvalidRefreshToken => "Invalid Refresh Token",
        }
    }

    /// First marker present in the error's code or message.
    pub fn detect<E: ClassifiableError + ?Sized>(error: &E) -> Option<TokenInvalidMarker> {
        let code = error.error_code();
        let message = error.error_message();
        Self::ALL.into_iter().find(|marker| {
            code.is_some_and(|c| c == marker.as_str()) || message.contains(marker.as_str())
        })
    }
}

/// Signals the classifier reads from a failure.
pub trait ClassifiableError: std::error::Error + Send + Sync {
    fn error_code(&self) -> Option<&str>;

    fn error_message(&self) -> &str;

    fn http_status(&self) -> Option<u16>;

    fn is_network_failure(&self) -> bool;

    /// Whether HTTP 401 on this boundary means the session is gone.
    fn unauthorized_means_token_invalid(&self) -> bool {
        false
    }

    /// Expected control flow (e.g. "no row found"); logged but never shown.
    fn is_expected(&self) -> bool {
        false
    }
}

/// Classify a failure.
pub fn classify<E: ClassifiableError + ?Sized>(error: &E) -> AuthErrorClass {
    if TokenInvalidMarker::detect(error).is_some() {
        return AuthErrorClass::TokenInvalid;
    }

    if error.unauthorized_means_token_invalid() && error.http_status() == Some(401) {
        return AuthErrorClass::TokenInvalid;
    }

    if error.is_network_failure() || error.http_status().is_some_and(|s| s >= 500) {
        return AuthErrorClass::Transient;
    }

    AuthErrorClass::Unknown
}

impl ClassifiableError for ServiceError {
    fn error_code(&self) -> Option<&str> {
        match self {
            ServiceError::NetworkUnavailable(_) => None,
            ServiceError::Api { code, .. } => code.as_deref(),
        }
    }

    fn error_message(&self) -> &str {
        match self {
            ServiceError::NetworkUnavailable(message) => message,
            ServiceError::Api { message, .. } => message,
        }
    }

    fn http_status(&self) -> Option<u16> {
        match self {
            ServiceError::NetworkUnavailable(_) => None,
            ServiceError::Api { status, .. } => *status,
        }
    }

    fn is_network_failure(&self) -> bool {
        matches!(self, ServiceError::NetworkUnavailable(_))
    }
}

impl ClassifiableError for StoreError {
    fn error_code(&self) -> Option<&str> {
        self.code()
    }

    fn error_message(&self) -> &str {
        match self {
            StoreError::NetworkUnavailable(message) => message,
            StoreError::Api { message, .. } => message,
        }
    }

    fn http_status(&self) -> Option<u16> {
        self.status()
    }

    fn is_network_failure(&self) -> bool {
        matches!(self, StoreError::NetworkUnavailable(_))
    }

    fn unauthorized_means_token_invalid(&self) -> bool {
        true
    }

    fn is_expected(&self) -> bool {
        self.is_no_rows() || self.is_unique_violation()
    }
}

impl ClassifiableError for ReconcileError {
    fn error_code(&self) -> Option<&str> {
        self.store_error().error_code()
    }

    fn error_message(&self) -> &str {
        self.store_error().error_message()
    }

    fn http_status(&self) -> Option<u16> {
        self.store_error().http_status()
    }

    fn is_network_failure(&self) -> bool {
        self.store_error().is_network_failure()
    }

    fn unauthorized_means_token_invalid(&self) -> bool {
        true
    }
}
