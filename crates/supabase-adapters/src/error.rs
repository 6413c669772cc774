//! Supabase adapter error types.

use auth_sync_core::{ServiceError, StoreError};
use serde::Deserialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Supabase adapter error type.
#[derive(Error, Debug)]
pub enum SupabaseError {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Reading or refreshing the session failed
    #[error("Session error: {0}")]
    Session(#[from] ServiceError),

    /// The callback URL did not carry a usable session
    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    /// Error payload returned by GoTrue or PostgREST
    #[error("HTTP {status:?}: {message}")]
    Api {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },
}

/// Result type alias using SupabaseError.
pub type SupabaseResult<T> = Result<T, SupabaseError>;

impl SupabaseError {
    /// Returns true if the request never reached the server.
    pub fn is_network(&self) -> bool {
        match self {
            SupabaseError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }
}

impl From<SupabaseError> for ServiceError {
    fn from(error: SupabaseError) -> Self {
        if error.is_network() {
            return ServiceError::NetworkUnavailable(error.to_string());
        }
        match error {
            SupabaseError::Session(inner) => inner,
            SupabaseError::Api {
                status,
                code,
                message,
            } => ServiceError::Api {
                status,
                code,
                message,
            },
            SupabaseError::Http(e) => ServiceError::Api {
                status: e.status().map(|s| s.as_u16()),
                code: None,
                message: e.to_string(),
            },
            other => ServiceError::Api {
                status: None,
                code: None,
                message: other.to_string(),
            },
        }
    }
}

impl From<SupabaseError> for StoreError {
    fn from(error: SupabaseError) -> Self {
        if error.is_network() {
            return StoreError::NetworkUnavailable(error.to_string());
        }
        match error {
            SupabaseError::Session(ServiceError::NetworkUnavailable(message)) => {
                StoreError::NetworkUnavailable(message)
            }
            SupabaseError::Session(ServiceError::Api {
                status,
                code,
                message,
            }) => StoreError::Api {
                status,
                code,
                message,
            },
            SupabaseError::Api {
                status,
                code,
                message,
            } => StoreError::Api {
                status,
                code,
                message,
            },
            SupabaseError::Http(e) => StoreError::Api {
                status: e.status().map(|s| s.as_u16()),
                code: None,
                message: e.to_string(),
            },
            other => StoreError::Api {
                status: None,
                code: None,
                message: other.to_string(),
            },
        }
    }
}

/// Length and digest of a response body, for logs that must not leak payloads.
pub(crate) fn summarize_response_body(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}

/// GoTrue error body. Older deployments use `error`/`error_description`.
#[derive(Debug, Default, Deserialize)]
struct GoTrueErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Map a failed GoTrue response to an API error.
pub(crate) fn parse_gotrue_error(status: u16, body: &str) -> SupabaseError {
    let parsed: GoTrueErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .msg
        .or(parsed.error_description)
        .or(parsed.message)
        .unwrap_or_else(|| format!("HTTP {}", status));

    SupabaseError::Api {
        status: Some(status),
        code: parsed.error_code.or(parsed.error),
        message,
    }
}

/// PostgREST error body.
#[derive(Debug, Default, Deserialize)]
struct PostgrestErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Map a failed PostgREST response to an API error.
pub(crate) fn parse_postgrest_error(status: u16, body: &str) -> SupabaseError {
    let parsed: PostgrestErrorBody = serde_json::from_str(body).unwrap_or_default();

    SupabaseError::Api {
        status: Some(status),
        code: parsed.code,
        message: parsed
            .message
            .unwrap_or_else(|| format!("HTTP {}", status)),
    }
}
