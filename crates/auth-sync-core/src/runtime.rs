//! Auth sync runtime.
//!
//! Wires the session service, profile store, navigation and notification
//! boundaries together: one lifecycle handler task owns writes to the session
//! state, reconciles profiles on sign-in and routes every failure through
//! [`AuthRecovery`].

use crate::{
    AuthRecovery, AuthSyncError, AuthSyncResult, CallbackResolver, GuardedProfileStore,
    Identity, LifecycleEvent, LifecycleEventKind, LifecycleSubscription, Navigator,
    NotificationKind, Notifier, Operation, ProfileReconciler, ProfileStore, ReconcileOutcome,
    SessionService, SessionStateStore, SessionStateView,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

const SESSION_REFRESHED_MESSAGE: &str = "Session refreshed";

/// Shared auth sync runtime.
pub struct AuthSyncRuntime {
    session: Arc<dyn SessionService>,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    state: Arc<SessionStateStore>,
    recovery: Arc<AuthRecovery>,
    reconciler: Arc<ProfileReconciler>,
    profiles: GuardedProfileStore,
    settle_window: Duration,
    handler: Mutex<Option<JoinHandle<()>>>,
    reconciliations: Arc<Mutex<JoinSet<()>>>,
}

impl AuthSyncRuntime {
    /// Create a runtime over the given boundaries. Nothing runs until [`start`](Self::start).
    pub fn new(
        session: Arc<dyn SessionService>,
        profiles: Arc<dyn ProfileStore>,
        navigator: Arc<dyn Navigator>,
        notifier: Arc<dyn Notifier>,
        settle_window: Duration,
    ) -> Self {
        let recovery = Arc::new(AuthRecovery::new(
            session.clone(),
            navigator.clone(),
            notifier.clone(),
        ));
        let reconciler = Arc::new(ProfileReconciler::new(profiles.clone()));
        let guarded = GuardedProfileStore::new(profiles, recovery.clone());

        Self {
            session,
            navigator,
            notifier,
            state: Arc::new(SessionStateStore::new()),
            recovery,
            reconciler,
            profiles: guarded,
            settle_window,
            handler: Mutex::new(None),
            reconciliations: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Read-only view of the session state.
    pub fn session_state(&self) -> SessionStateView {
        self.state.view()
    }

    /// Profile store whose failures pass through recovery.
    pub fn profiles(&self) -> &GuardedProfileStore {
        &self.profiles
    }

    pub fn recovery(&self) -> &Arc<AuthRecovery> {
        &self.recovery
    }

    /// Resolver for the email-confirmation callback screen.
    pub fn callback_resolver(&self) -> CallbackResolver {
        CallbackResolver::new(
            self.session.clone(),
            self.navigator.clone(),
            self.settle_window,
        )
    }

    /// Subscribe to lifecycle events and run the initial session check.
    ///
    /// The store resolves from whichever finishes first; a late initial
    /// result is discarded.
    pub async fn start(&self) -> AuthSyncResult<()> {
        {
            let handler = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
            if handler.is_some() {
                return Err(AuthSyncError::AlreadyStarted);
            }
        }

        self.state.begin_loading()?;

        let subscription = self.session.subscribe();
        let handler = LifecycleHandler {
            session: self.session.clone(),
            notifier: self.notifier.clone(),
            state: self.state.clone(),
            recovery: self.recovery.clone(),
            reconciler: self.reconciler.clone(),
            reconciliations: self.reconciliations.clone(),
        };
        let task = tokio::spawn(handler.run(subscription));
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);

        info!("Auth sync runtime started");

        let result = self.session.get_session().await;
        match self
            .recovery
            .guard(Operation::InitialSessionCheck, result)
            .await
        {
            Ok(identity) => {
                let user_id = identity.as_ref().map(|i| i.subject_id.clone());
                if self.state.apply_initial_session(identity) {
                    debug!(user_id = ?user_id, "Session resolved from initial check");
                }
            }
            Err(e) => {
                // Resolve as signed out so consumers do not wait forever
                if self.state.apply_initial_session(None) {
                    debug!(error = %e, "Initial session check failed, resolved as signed out");
                }
            }
        }

        Ok(())
    }

    /// Wait for every reconciliation spawned so far to finish.
    pub async fn wait_for_reconciliations(&self) {
        let mut pending = std::mem::take(
            &mut *self
                .reconciliations
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Reconciliation task failed");
            }
        }
    }

    /// Cancel the lifecycle subscription and any reconciliation still running.
    pub fn shutdown(&self) {
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.reconciliations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();

        if let Some(task) = handler {
            task.abort();
            info!("Auth sync runtime stopped");
        }
    }
}

impl Drop for AuthSyncRuntime {
    fn drop(&mut self) {
        if let Some(task) = self
            .handler
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.reconciliations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();
    }
}

/// Single consumer of the runtime's lifecycle subscription.
struct LifecycleHandler {
    session: Arc<dyn SessionService>,
    notifier: Arc<dyn Notifier>,
    state: Arc<SessionStateStore>,
    recovery: Arc<AuthRecovery>,
    reconciler: Arc<ProfileReconciler>,
    reconciliations: Arc<Mutex<JoinSet<()>>>,
}

impl LifecycleHandler {
    async fn run(self, mut subscription: LifecycleSubscription) {
        while let Some(event) = subscription.next().await {
            self.handle(event);
        }
        debug!("Lifecycle feed closed");
    }

    fn handle(&self, event: LifecycleEvent) {
        info!(
            event = event.kind.as_str(),
            user_id = event.subject_id().unwrap_or("-"),
            "Auth state changed"
        );

        // Held across the state write so waiters on the new state also see its reconciliation
        let mut reconciliations = self
            .reconciliations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Err(e) = self.state.apply_event(&event) {
            warn!(error = %e, "Dropping lifecycle event");
            return;
        }

        match event.kind {
            LifecycleEventKind::SignedIn => {
                self.recovery.rearm();
                if let Some(identity) = event.identity {
                    self.spawn_reconcile(&mut reconciliations, identity);
                }
            }
            LifecycleEventKind::TokenRefreshed => {
                self.notifier
                    .notify(NotificationKind::Success, SESSION_REFRESHED_MESSAGE);
            }
            LifecycleEventKind::SignedOut => {
                self.session.clear_cached_session();
            }
            LifecycleEventKind::UserUpdated => {}
        }
    }

    fn spawn_reconcile(&self, reconciliations: &mut JoinSet<()>, identity: Identity) {
        let reconciler = self.reconciler.clone();
        let recovery = self.recovery.clone();

        // Reap finished tasks
        while reconciliations.try_join_next().is_some() {}

        reconciliations.spawn(async move {
            let result = reconciler.reconcile(&identity).await;
            if recovery.is_recovering() {
                debug!(user_id = %identity.subject_id, "Discarding reconciliation during recovery");
                return;
            }

            match recovery
                .guard(Operation::ProfileReconciliation, result)
                .await
            {
                Ok(ReconcileOutcome::Created) => {
                    info!(user_id = %identity.subject_id, "Profile reconciled");
                }
                Ok(outcome) => {
                    debug!(user_id = %identity.subject_id, outcome = ?outcome, "Profile reconciled");
                }
                Err(_) => {}
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        wait_until, MemoryProfileStore, MockSessionService, RecordingNavigator,
        RecordingNotifier,
    };
    use crate::{CallbackResolution, NavigateOptions, Route, ServiceError, StoreError};

    const SETTLE: Duration = Duration::from_millis(1000);

    struct Harness {
        session: Arc<MockSessionService>,
        store: Arc<MemoryProfileStore>,
        navigator: Arc<RecordingNavigator>,
        notifier: Arc<RecordingNotifier>,
        runtime: AuthSyncRuntime,
    }

    fn harness(session: MockSessionService) -> Harness {
        let session = Arc::new(session);
        let store = Arc::new(MemoryProfileStore::new());
        let navigator = Arc::new(RecordingNavigator::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let runtime = AuthSyncRuntime::new(
            session.clone(),
            store.clone(),
            navigator.clone(),
            notifier.clone(),
            SETTLE,
        );
        Harness {
            session,
            store,
            navigator,
            notifier,
            runtime,
        }
    }

    fn identity() -> Identity {
        Identity::new("u1", "a@x.com").with_name("Ada", "Lovelace")
    }

    #[tokio::test]
    async fn test_start_resolves_from_initial_check() {
        let h = harness(MockSessionService::with_session(identity()));
        let view = h.runtime.session_state();
        assert!(view.is_loading());

        h.runtime.start().await.unwrap();

        assert!(!view.is_loading());
        assert_eq!(view.identity(), Some(identity()));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let h = harness(MockSessionService::new());
        h.runtime.start().await.unwrap();

        let err = h.runtime.start().await.unwrap_err();
        assert!(matches!(err, AuthSyncError::AlreadyStarted));
    }

    #[tokio::test]
    async fn test_start_without_session_resolves_anonymous() {
        let session = MockSessionService::new();
        session.push_get_session(Ok(None));
        let h = harness(session);

        h.runtime.start().await.unwrap();

        let state = h.runtime.session_state().current();
        assert_eq!(state.identity, None);
        assert!(!state.loading);
        tokio::task::yield_now().await;
        assert_eq!(h.store.select_calls(), 0);
        assert_eq!(h.store.insert_calls(), 0);
        assert!(h.navigator.navigations().is_empty());
        assert!(h.notifier.all().is_empty());
    }

    #[tokio::test]
    async fn test_signed_in_creates_profile() {
        let h = harness(MockSessionService::new());
        h.runtime.start().await.unwrap();

        h.session.emit(LifecycleEvent::signed_in(identity()));

        assert!(wait_until(|| h.store.len() == 1).await);
        let record = h.store.get("u1").unwrap();
        assert_eq!(record.email, "a@x.com");
        assert_eq!(record.first_name, "Ada");
        assert_eq!(h.runtime.session_state().identity(), Some(identity()));
    }

    #[tokio::test]
    async fn test_returning_user_does_not_insert() {
        let h = harness(MockSessionService::new());
        h.store.seed(crate::ProfileRecord::from_identity(&identity()));
        h.runtime.start().await.unwrap();

        h.session.emit(LifecycleEvent::signed_in(identity()));

        assert!(wait_until(|| h.store.select_calls() == 1).await);
        tokio::task::yield_now().await;
        assert_eq!(h.store.insert_calls(), 0);
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_query_recovers_once() {
        let h = harness(MockSessionService::with_session(identity()));
        h.runtime.start().await.unwrap();
        h.store
            .fail_next_select(StoreError::api(Some(401), None, "JWT expired"));

        let result = h.runtime.profiles().select("u1").await;

        assert!(result.is_err());
        assert_eq!(h.session.sign_out_calls(), 1);
        assert_eq!(
            h.navigator.navigations(),
            vec![(Route::Login, NavigateOptions::replace())]
        );
        assert!(wait_until(|| !h.runtime.session_state().is_authenticated()).await);
        assert!(h
            .notifier
            .errors()
            .contains(&"Your session has expired. Please sign in again.".to_string()));
    }

    #[tokio::test]
    async fn test_lookup_failure_notifies_without_insert() {
        let h = harness(MockSessionService::new());
        h.runtime.start().await.unwrap();
        h.store.fail_next_select(StoreError::NetworkUnavailable(
            "connection reset".to_string(),
        ));

        h.session.emit(LifecycleEvent::signed_in(identity()));

        assert!(wait_until(|| !h.notifier.errors().is_empty()).await);
        assert_eq!(h.notifier.errors(), vec!["Failed to update profile".to_string()]);
        assert_eq!(h.store.insert_calls(), 0);
        assert!(h.navigator.navigations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_resolves_from_event() {
        let h = harness(MockSessionService::new());
        h.runtime.start().await.unwrap();
        let resolver = h.runtime.callback_resolver();
        let session = h.session.clone();

        let task = tokio::spawn(async move { resolver.resolve().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.emit(LifecycleEvent::signed_in(identity()));

        let (resolution, _) = task.await.unwrap();
        assert_eq!(resolution, CallbackResolution::CreateProfile);
        assert_eq!(
            h.navigator.navigations(),
            vec![(Route::CreateProfile, NavigateOptions::replace())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_without_session_goes_to_register() {
        let h = harness(MockSessionService::new());
        h.runtime.start().await.unwrap();

        let (resolution, _) = h.runtime.callback_resolver().resolve().await;

        assert_eq!(resolution, CallbackResolution::Register);
        assert_eq!(
            h.navigator.navigations(),
            vec![(Route::Register, NavigateOptions::replace())]
        );
    }

    #[tokio::test]
    async fn test_event_before_initial_check_wins() {
        let session = MockSessionService::new();
        session.set_get_session_delay(Duration::from_millis(50));
        let h = harness(session);
        let view = h.runtime.session_state();

        let runtime = &h.runtime;
        let session = h.session.clone();
        let emitter = async move {
            wait_until(|| session.subscriber_count() > 0).await;
            session.emit(LifecycleEvent::signed_in(identity()));
        };
        let (started, _) = tokio::join!(runtime.start(), emitter);
        started.unwrap();

        // Late initial check saw no session but must not overwrite the event
        assert_eq!(view.identity(), Some(identity()));
        assert!(!view.is_loading());
    }

    #[tokio::test]
    async fn test_initial_check_token_invalid_recovers() {
        let session = MockSessionService::new();
        session.push_get_session(Err(ServiceError::api(
            Some("refresh_token_not_found"),
            "Invalid Refresh Token: Refresh Token Not Found",
        )));
        let h = harness(session);

        h.runtime.start().await.unwrap();

        assert_eq!(h.session.sign_out_calls(), 1);
        assert_eq!(h.navigator.navigations().len(), 1);
        assert!(!h.runtime.session_state().is_loading());
    }

    #[tokio::test]
    async fn test_reconcile_token_invalid_triggers_recovery() {
        let h = harness(MockSessionService::new());
        h.runtime.start().await.unwrap();
        h.store
            .fail_next_insert(StoreError::api(Some(401), Some("PGRST301"), "JWT expired"));

        h.session.emit(LifecycleEvent::signed_in(identity()));

        assert!(wait_until(|| h.session.sign_out_calls() == 1).await);
        assert_eq!(
            h.navigator.navigations(),
            vec![(Route::Login, NavigateOptions::replace())]
        );
    }

    #[tokio::test]
    async fn test_signed_in_rearms_recovery() {
        let h = harness(MockSessionService::with_session(identity()));
        h.runtime.start().await.unwrap();
        let unauthorized = StoreError::api(Some(401), None, "JWT expired");

        h.store.fail_next_select(unauthorized.clone());
        let _ = h.runtime.profiles().select("u1").await;
        assert!(h.runtime.recovery().is_recovering());

        h.session.emit(LifecycleEvent::signed_in(identity()));
        assert!(wait_until(|| !h.runtime.recovery().is_recovering()).await);
        assert!(wait_until(|| h.store.select_calls() == 2).await);

        h.store.fail_next_select(unauthorized);
        let _ = h.runtime.profiles().select("u1").await;
        assert_eq!(h.session.sign_out_calls(), 2);
    }

    #[tokio::test]
    async fn test_token_refreshed_notifies_success() {
        let h = harness(MockSessionService::with_session(identity()));
        h.runtime.start().await.unwrap();

        h.session.emit(LifecycleEvent::token_refreshed(identity()));

        assert!(wait_until(|| !h.notifier.successes().is_empty()).await);
        assert_eq!(h.notifier.successes(), vec!["Session refreshed".to_string()]);
        assert_eq!(h.store.select_calls(), 0);
    }

    #[tokio::test]
    async fn test_signed_out_clears_cached_session() {
        let h = harness(MockSessionService::with_session(identity()));
        h.runtime.start().await.unwrap();

        h.session.emit(LifecycleEvent::signed_out());

        assert!(wait_until(|| h.session.clear_cached_calls() == 1).await);
        assert!(!h.runtime.session_state().is_authenticated());
    }

    #[tokio::test]
    async fn test_user_updated_does_not_reconcile() {
        let h = harness(MockSessionService::with_session(identity()));
        h.runtime.start().await.unwrap();
        let renamed = identity().with_name("Grace", "Hopper");

        h.session.emit(LifecycleEvent::user_updated(renamed.clone()));

        assert!(wait_until(|| h.runtime.session_state().identity() == Some(renamed.clone())).await);
        assert_eq!(h.store.select_calls(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_reconciliations() {
        let h = harness(MockSessionService::new());
        h.runtime.start().await.unwrap();
        let mut view = h.runtime.session_state();

        h.session.emit(LifecycleEvent::signed_in(identity()));
        view.changed().await.unwrap();
        h.runtime.wait_for_reconciliations().await;

        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_subscription() {
        let h = harness(MockSessionService::new());
        h.runtime.start().await.unwrap();
        assert_eq!(h.session.subscriber_count(), 1);

        h.runtime.shutdown();

        assert!(wait_until(|| h.session.subscriber_count() == 0).await);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_pending_reconciliation() {
        let h = harness(MockSessionService::new());
        h.runtime.start().await.unwrap();
        let gate = h.store.pause_selects();

        h.session.emit(LifecycleEvent::signed_in(identity()));
        h.store.wait_for_select_calls(1).await;
        h.runtime.shutdown();
        gate.release();

        for _ in 0..100 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.store.insert_calls(), 0);
        assert_eq!(h.store.len(), 0);
    }
}
