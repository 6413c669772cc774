//! Profile store boundary.

use crate::{Identity, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// PostgREST code for "JSON object requested, multiple (or no) rows returned".
pub const NO_ROWS_CODE: &str = "PGRST116";

/// Postgres `unique_violation`.
pub const UNIQUE_VIOLATION_CODE: &str = "23505";

/// Application-owned profile row, keyed by the identity's subject id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl ProfileRecord {
    /// Build the initial record for an identity. Missing names become `""`.
    pub fn from_identity(identity: &Identity) -> Self {
        Self {
            id: identity.subject_id.clone(),
            email: identity.email.clone(),
            first_name: identity.first_name.clone().unwrap_or_default(),
            last_name: identity.last_name.clone().unwrap_or_default(),
        }
    }
}

/// CRUD contract of the table behind profile records.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch the record with the given id.
    ///
    /// Implementations may report absence either as `Ok(None)` or as the
    /// [`NO_ROWS_CODE`] sentinel error.
    async fn select(&self, id: &str) -> Result<Option<ProfileRecord>, StoreError>;

    /// Insert a new record. Fails with [`UNIQUE_VIOLATION_CODE`] if the id exists.
    async fn insert(&self, record: &ProfileRecord) -> Result<(), StoreError>;

    /// Insert or merge a record by id.
    async fn upsert(&self, record: &ProfileRecord) -> Result<(), StoreError>;
}
