//! Authentication state synchronization and profile reconciliation.
//!
//! This crate provides:
//! - Boundary contracts for the session service, profile store, navigation and notifications
//! - An FSM-backed session state store exposed through read-only views
//! - Idempotent profile reconciliation on sign-in
//! - Central classification of auth failures with forced sign-out recovery
//! - The email-confirmation callback resolution flow
//! - A runtime that wires all of the above to the lifecycle feed

mod callback_flow;
mod classifier;
mod error;
mod navigation;
mod profile_store;
mod reconciler;
mod recovery;
mod runtime;
mod session_service;
mod state_fsm;
mod state_store;

#[cfg(test)]
mod testing;

pub use callback_flow::{CallbackResolution, CallbackResolver, ResolutionSource};
pub use classifier::{classify, AuthErrorClass, ClassifiableError, TokenInvalidMarker};
pub use error::{AuthSyncError, AuthSyncResult, ReconcileError, ServiceError, StoreError};
pub use navigation::{NavigateOptions, Navigator, NotificationKind, Notifier, Route};
pub use profile_store::{ProfileRecord, ProfileStore, NO_ROWS_CODE, UNIQUE_VIOLATION_CODE};
pub use reconciler::{ProfileReconciler, ReconcileOutcome};
pub use recovery::{AuthRecovery, GuardedProfileStore, Operation};
pub use runtime::AuthSyncRuntime;
pub use session_service::{
    Identity, LifecycleEvent, LifecycleEventKind, LifecycleFeed, LifecycleSubscription,
    SessionService,
};
pub use state_fsm::{session_machine, SessionMachine, SessionMachineInput, SessionMachineState};
pub use state_store::{SessionPhase, SessionState, SessionStateStore, SessionStateView};
