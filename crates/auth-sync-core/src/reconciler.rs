//! Profile reconciliation.
//!
//! Ensures an application-owned profile record exists for a signed-in
//! identity. Safe to call repeatedly: the existence check runs first, a
//! duplicate-key rejection counts as success, and overlapping calls for the
//! same identity are collapsed by an in-flight guard.

use crate::{Identity, ProfileRecord, ProfileStore, ReconcileError};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Successful outcome of a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// A new record was inserted.
    Created,
    /// A record already existed (found, or the insert hit a unique violation).
    AlreadyExists,
    /// Another reconciliation for this identity is still running.
    AlreadyInFlight,
}

pub struct ProfileReconciler {
    store: Arc<dyn ProfileStore>,
    in_flight: Mutex<HashSet<String>>,
}

impl ProfileReconciler {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self {
            store,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Ensure a profile record exists for `identity`.
    ///
    /// At most one insert is attempted per call and failures are never retried.
    pub async fn reconcile(&self, identity: &Identity) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, &identity.subject_id) else {
            debug!(user_id = %identity.subject_id, "Profile reconciliation already in flight");
            return Ok(ReconcileOutcome::AlreadyInFlight);
        };

        match self.store.select(&identity.subject_id).await {
            Ok(Some(_)) => {
                debug!(user_id = %identity.subject_id, "Profile already exists");
                return Ok(ReconcileOutcome::AlreadyExists);
            }
            Ok(None) => {}
            Err(e) if e.is_no_rows() => {}
            Err(e) => {
                warn!(user_id = %identity.subject_id, error = %e, "Profile lookup failed");
                return Err(ReconcileError::Lookup(e));
            }
        }

        let record = ProfileRecord::from_identity(identity);
        match self.store.insert(&record).await {
            Ok(()) => {
                info!(user_id = %identity.subject_id, "Created profile");
                Ok(ReconcileOutcome::Created)
            }
            Err(e) if e.is_unique_violation() => {
                debug!(user_id = %identity.subject_id, "Profile created concurrently");
                Ok(ReconcileOutcome::AlreadyExists)
            }
            Err(e) => {
                warn!(user_id = %identity.subject_id, error = %e, "Profile insert failed");
                Err(ReconcileError::Insert(e))
            }
        }
    }
}

/// Holds a subject id in the in-flight set until dropped.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    subject_id: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, subject_id: &str) -> Option<Self> {
        let mut ids = set.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(subject_id.to_string()) {
            return None;
        }
        Some(Self {
            set,
            subject_id: subject_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.subject_id);
    }
}
