//! Central chokepoint for auth failures.
//!
//! Every fallible boundary call passes its result through [`AuthRecovery::guard`].
//! Token-invalid failures trigger a forced sign-out and a hard redirect to the
//! login screen; everything else is logged and surfaced as a notification.

use crate::classifier::{classify, AuthErrorClass, ClassifiableError};
use crate::{
    NavigateOptions, Navigator, NotificationKind, Notifier, ProfileRecord, ProfileStore, Route,
    SessionService, StoreError,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";

/// The kind of work whose failure is being handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    InitialSessionCheck,
    LifecycleHandling,
    ProfileReconciliation,
    ProfileQuery,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::InitialSessionCheck => "initial_session_check",
            Operation::LifecycleHandling => "lifecycle_handling",
            Operation::ProfileReconciliation => "profile_reconciliation",
            Operation::ProfileQuery => "profile_query",
        }
    }

    /// Notification shown for failures that do not force a sign-out.
    pub fn user_message(&self) -> &'static str {
        match self {
            Operation::InitialSessionCheck | Operation::LifecycleHandling => {
                "Authentication error occurred"
            }
            Operation::ProfileReconciliation => "Failed to update profile",
            Operation::ProfileQuery => "Profile request failed",
        }
    }
}

/// Classifies failures and drives the forced sign-out recovery path.
pub struct AuthRecovery {
    session: Arc<dyn SessionService>,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    recovering: AtomicBool,
}

impl AuthRecovery {
    pub fn new(
        session: Arc<dyn SessionService>,
        navigator: Arc<dyn Navigator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            session,
            navigator,
            notifier,
            recovering: AtomicBool::new(false),
        }
    }

    /// Pass a boundary result through classification before it propagates.
    pub async fn guard<T, E>(&self, operation: Operation, result: Result<T, E>) -> Result<T, E>
    where
        E: ClassifiableError,
    {
        if let Err(error) = &result {
            self.handle(operation, error).await;
        }
        result
    }

    /// Classify a failure and react to it.
    pub async fn handle<E>(&self, operation: Operation, error: &E) -> AuthErrorClass
    where
        E: ClassifiableError + ?Sized,
    {
        let class = classify(error);

        if error.is_expected() {
            debug!(operation = operation.as_str(), error = %error, "Expected boundary response");
            return class;
        }

        match class {
            AuthErrorClass::TokenInvalid => {
                warn!(
                    operation = operation.as_str(),
                    error = %error,
                    "Refresh token invalid, signing out user"
                );
                self.recover().await;
            }
            AuthErrorClass::Transient => {
                warn!(operation = operation.as_str(), error = %error, "Transient auth failure");
                self.notifier
                    .notify(NotificationKind::Error, operation.user_message());
            }
            AuthErrorClass::Unknown => {
                error!(operation = operation.as_str(), error = %error, "Auth failure");
                self.notifier
                    .notify(NotificationKind::Error, operation.user_message());
            }
        }

        class
    }

    /// True once a forced sign-out has started and until the next sign-in.
    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::SeqCst)
    }

    /// Allow the next token-invalid failure to trigger recovery again.
    pub fn rearm(&self) {
        if self.recovering.swap(false, Ordering::SeqCst) {
            debug!("Session recovery re-armed");
        }
    }

    async fn recover(&self) {
        // Claimed before the first suspension point so concurrent observers bail out.
        if self.recovering.swap(true, Ordering::SeqCst) {
            debug!("Session recovery already in progress");
            return;
        }

        self.notifier
            .notify(NotificationKind::Error, SESSION_EXPIRED_MESSAGE);

        if let Err(e) = self.session.sign_out().await {
            warn!(error = %e, "Sign-out during session recovery failed");
        }

        info!(route = %Route::Login, "Redirecting to login after session recovery");
        self.navigator
            .navigate(Route::Login, NavigateOptions::replace());
    }
}

/// Profile store whose every result passes through [`AuthRecovery`].
///
/// The "no row matched" sentinel from `select` is folded into `Ok(None)`
/// before classification, so it never reaches the user.
#[derive(Clone)]
pub struct GuardedProfileStore {
    inner: Arc<dyn ProfileStore>,
    recovery: Arc<AuthRecovery>,
}

impl GuardedProfileStore {
    pub fn new(inner: Arc<dyn ProfileStore>, recovery: Arc<AuthRecovery>) -> Self {
        Self { inner, recovery }
    }
}

#[async_trait]
impl ProfileStore for GuardedProfileStore {
    async fn select(&self, id: &str) -> Result<Option<ProfileRecord>, StoreError> {
        let result = match self.inner.select(id).await {
            Err(e) if e.is_no_rows() => Ok(None),
            other => other,
        };
        self.recovery.guard(Operation::ProfileQuery, result).await
    }

    async fn insert(&self, record: &ProfileRecord) -> Result<(), StoreError> {
        let result = self.inner.insert(record).await;
        self.recovery.guard(Operation::ProfileQuery, result).await
    }

    async fn upsert(&self, record: &ProfileRecord) -> Result<(), StoreError> {
        let result = self.inner.upsert(record).await;
        self.recovery.guard(Operation::ProfileQuery, result).await
    }
}
