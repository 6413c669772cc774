//! Session state store.
//!
//! Single writer (the runtime's lifecycle handler), many readers through
//! [`SessionStateView`]. Every write is validated by the session FSM first.

use crate::state_fsm::{SessionMachine, SessionMachineInput, SessionMachineState};
use crate::{AuthSyncError, AuthSyncResult, Identity, LifecycleEvent};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tracing::debug;

/// Snapshot of the session as seen by the rest of the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Present iff there is an active session.
    pub identity: Option<Identity>,
    /// True only until the session is first resolved.
    pub loading: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            identity: None,
            loading: true,
        }
    }
}

/// User-facing phase derived from the FSM state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Uninitialized,
    Loading,
    Authenticated,
    Anonymous,
}

impl SessionPhase {
    /// Returns true once the session has been resolved either way.
    pub fn is_resolved(&self) -> bool {
        matches!(self, SessionPhase::Authenticated | SessionPhase::Anonymous)
    }
}

impl From<&SessionMachineState> for SessionPhase {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Uninitialized => SessionPhase::Uninitialized,
            SessionMachineState::Loading => SessionPhase::Loading,
            SessionMachineState::Authenticated => SessionPhase::Authenticated,
            SessionMachineState::Anonymous => SessionPhase::Anonymous,
        }
    }
}

/// Owner of the session state.
pub struct SessionStateStore {
    fsm: Mutex<SessionMachine>,
    tx: watch::Sender<SessionState>,
}

impl SessionStateStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::default());
        Self {
            fsm: Mutex::new(SessionMachine::new()),
            tx,
        }
    }

    /// Read-only handle for consumers.
    pub fn view(&self) -> SessionStateView {
        SessionStateView {
            rx: self.tx.subscribe(),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    /// Current FSM phase.
    pub fn phase(&self) -> SessionPhase {
        let fsm = self.fsm.lock().unwrap_or_else(PoisonError::into_inner);
        SessionPhase::from(fsm.state())
    }

    /// Enter `Loading`. Valid exactly once.
    pub(crate) fn begin_loading(&self) -> AuthSyncResult<()> {
        let mut fsm = self.fsm.lock().unwrap_or_else(PoisonError::into_inner);
        fsm.consume(&SessionMachineInput::Start).map_err(|_| {
            AuthSyncError::InvalidStateTransition(format!(
                "cannot start loading from {:?}",
                fsm.state()
            ))
        })?;
        Ok(())
    }

    /// Resolve the store from the initial session check.
    ///
    /// Returns false, leaving the state untouched, when a lifecycle event
    /// already resolved the store.
    pub(crate) fn apply_initial_session(&self, identity: Option<Identity>) -> bool {
        let mut fsm = self.fsm.lock().unwrap_or_else(PoisonError::into_inner);
        if *fsm.state() != SessionMachineState::Loading {
            debug!(state = ?fsm.state(), "Discarding late initial session result");
            return false;
        }

        if fsm
            .consume(&SessionMachineInput::for_identity(identity.as_ref()))
            .is_err()
        {
            return false;
        }
        self.tx.send_replace(SessionState {
            identity,
            loading: false,
        });
        true
    }

    /// Replace the identity with the one carried by a lifecycle event.
    pub(crate) fn apply_event(&self, event: &LifecycleEvent) -> AuthSyncResult<SessionPhase> {
        let mut fsm = self.fsm.lock().unwrap_or_else(PoisonError::into_inner);
        fsm.consume(&SessionMachineInput::for_identity(event.identity.as_ref()))
            .map_err(|_| {
                AuthSyncError::InvalidStateTransition(format!(
                    "{} received in {:?}",
                    event.kind.as_str(),
                    fsm.state()
                ))
            })?;

        self.tx.send_replace(SessionState {
            identity: event.identity.clone(),
            loading: false,
        });
        Ok(SessionPhase::from(fsm.state()))
    }
}

impl Default for SessionStateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of the session state with change notification.
#[derive(Debug, Clone)]
pub struct SessionStateView {
    rx: watch::Receiver<SessionState>,
}

impl SessionStateView {
    pub fn current(&self) -> SessionState {
        self.rx.borrow().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.rx.borrow().identity.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.rx.borrow().loading
    }

    pub fn is_authenticated(&self) -> bool {
        self.rx.borrow().identity.is_some()
    }

    /// Wait for the next write. Returns `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<SessionState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until `loading` has flipped to false.
    pub async fn wait_until_resolved(&mut self) -> Option<SessionState> {
        self.wait_for(|state| !state.loading).await
    }

    /// Wait until the state satisfies `predicate`, checking the current value first.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&SessionState) -> bool,
    ) -> Option<SessionState> {
        self.rx
            .wait_for(predicate)
            .await
            .ok()
            .map(|state| state.clone())
    }

    /// Wait until `subject_id` is the signed-in identity.
    pub async fn wait_for_identity(&mut self, subject_id: &str) -> Option<SessionState> {
        self.wait_for(|state| {
            state
                .identity
                .as_ref()
                .is_some_and(|identity| identity.subject_id == subject_id)
        })
        .await
    }

    /// Wait until nobody is signed in.
    pub async fn wait_for_signed_out(&mut self) -> Option<SessionState> {
        self.wait_for(|state| !state.loading && state.identity.is_none())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity::new("u1", "a@x.com")
    }

    #[test]
    fn test_new_store_is_loading_without_identity() {
        let store = SessionStateStore::new();
        let view = store.view();

        assert!(view.is_loading());
        assert!(!view.is_authenticated());
        assert_eq!(store.phase(), SessionPhase::Uninitialized);
    }

    #[test]
    fn test_begin_loading_only_once() {
        let store = SessionStateStore::new();

        store.begin_loading().unwrap();
        assert_eq!(store.phase(), SessionPhase::Loading);

        let err = store.begin_loading().unwrap_err();
        assert!(matches!(err, AuthSyncError::InvalidStateTransition(_)));
    }

    #[test]
    fn test_initial_session_resolves_loading() {
        let store = SessionStateStore::new();
        store.begin_loading().unwrap();

        assert!(store.apply_initial_session(Some(identity())));

        let state = store.snapshot();
        assert!(!state.loading);
        assert_eq!(state.identity, Some(identity()));
        assert_eq!(store.phase(), SessionPhase::Authenticated);
    }

    #[test]
    fn test_late_initial_session_is_discarded() {
        let store = SessionStateStore::new();
        store.begin_loading().unwrap();

        store
            .apply_event(&LifecycleEvent::signed_in(identity()))
            .unwrap();
        assert!(!store.apply_initial_session(None));

        assert_eq!(store.snapshot().identity, Some(identity()));
        assert_eq!(store.phase(), SessionPhase::Authenticated);
    }

    #[tokio::test]
    async fn test_wait_for_identity_returns_when_already_signed_in() {
        let store = SessionStateStore::new();
        store.begin_loading().unwrap();
        store.apply_initial_session(Some(identity()));
        let mut view = store.view();

        let state = view.wait_for_identity("u1").await.unwrap();

        assert_eq!(state.identity, Some(identity()));
    }

    #[tokio::test]
    async fn test_wait_for_identity_ignores_other_users() {
        let store = std::sync::Arc::new(SessionStateStore::new());
        store.begin_loading().unwrap();
        let mut view = store.view();

        let writer = store.clone();
        let waiter = tokio::spawn(async move { view.wait_for_identity("u2").await });
        writer
            .apply_event(&LifecycleEvent::signed_in(identity()))
            .unwrap();
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        writer
            .apply_event(&LifecycleEvent::signed_in(Identity::new("u2", "b@x.com")))
            .unwrap();
        let state = waiter.await.unwrap().unwrap();
        assert_eq!(state.identity.map(|i| i.subject_id), Some("u2".to_string()));
    }

    #[tokio::test]
    async fn test_wait_for_signed_out() {
        let store = SessionStateStore::new();
        store.begin_loading().unwrap();
        store.apply_initial_session(None);

        let state = store.view().wait_for_signed_out().await.unwrap();
        assert!(state.identity.is_none());
    }

    #[test]
    fn test_event_before_start_is_rejected() {
        let store = SessionStateStore::new();

        let err = store.apply_event(&LifecycleEvent::signed_out()).unwrap_err();
        assert!(err.to_string().contains("SIGNED_OUT"));
        assert!(store.view().is_loading());
    }

    #[test]
    fn test_events_replace_identity() {
        let store = SessionStateStore::new();
        store.begin_loading().unwrap();

        let phase = store
            .apply_event(&LifecycleEvent::signed_in(identity()))
            .unwrap();
        assert_eq!(phase, SessionPhase::Authenticated);

        let updated = identity().with_name("Ada", "Lovelace");
        store
            .apply_event(&LifecycleEvent::user_updated(updated.clone()))
            .unwrap();
        assert_eq!(store.snapshot().identity, Some(updated));

        let phase = store.apply_event(&LifecycleEvent::signed_out()).unwrap();
        assert_eq!(phase, SessionPhase::Anonymous);
        assert_eq!(store.snapshot().identity, None);
    }

    #[tokio::test]
    async fn test_loading_flips_exactly_once() {
        let store = SessionStateStore::new();
        let mut view = store.view();
        store.begin_loading().unwrap();

        let mut transitions = 0;
        let mut previous = view.is_loading();

        store.apply_initial_session(None);
        store
            .apply_event(&LifecycleEvent::signed_in(identity()))
            .unwrap();
        store.apply_event(&LifecycleEvent::signed_out()).unwrap();

        // Only the latest value is observed; loading must stay false from here on
        while let Some(state) = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            view.changed(),
        )
        .await
        .ok()
        .flatten()
        {
            if previous && !state.loading {
                transitions += 1;
            }
            assert!(!(state.loading && !previous), "loading flipped back to true");
            previous = state.loading;
        }

        assert_eq!(transitions, 1);
        assert!(!view.is_loading());
    }

    #[tokio::test]
    async fn test_wait_until_resolved() {
        let store = std::sync::Arc::new(SessionStateStore::new());
        let mut view = store.view();
        store.begin_loading().unwrap();

        let writer = store.clone();
        tokio::spawn(async move {
            writer.apply_initial_session(Some(Identity::new("u1", "a@x.com")));
        });

        let state = view.wait_until_resolved().await.unwrap();
        assert!(!state.loading);
        assert!(state.identity.is_some());
    }
}
