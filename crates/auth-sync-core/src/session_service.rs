//! Session service boundary: identity, lifecycle events and the adapter contract.

use crate::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

/// Default buffer for lifecycle events per subscriber.
const DEFAULT_FEED_CAPACITY: usize = 64;

/// The authenticated subject as issued by the session service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable, server-issued subject id.
    pub subject_id: String,
    /// Email address of the subject.
    pub email: String,
    /// First name from user metadata, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Last name from user metadata, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl Identity {
    pub fn new(subject_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            email: email.into(),
            first_name: None,
            last_name: None,
        }
    }

    pub fn with_name(mut self, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        self.first_name = Some(first_name.into());
        self.last_name = Some(last_name.into());
        self
    }
}

/// Kind of session transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

impl LifecycleEventKind {
    /// Wire name used by the session service.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEventKind::SignedIn => "SIGNED_IN",
            LifecycleEventKind::SignedOut => "SIGNED_OUT",
            LifecycleEventKind::TokenRefreshed => "TOKEN_REFRESHED",
            LifecycleEventKind::UserUpdated => "USER_UPDATED",
        }
    }
}

/// A session transition, optionally carrying the identity of the new session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    #[serde(default)]
    pub identity: Option<Identity>,
}

impl LifecycleEvent {
    pub fn signed_in(identity: Identity) -> Self {
        Self {
            kind: LifecycleEventKind::SignedIn,
            identity: Some(identity),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            kind: LifecycleEventKind::SignedOut,
            identity: None,
        }
    }

    pub fn token_refreshed(identity: Identity) -> Self {
        Self {
            kind: LifecycleEventKind::TokenRefreshed,
            identity: Some(identity),
        }
    }

    pub fn user_updated(identity: Identity) -> Self {
        Self {
            kind: LifecycleEventKind::UserUpdated,
            identity: Some(identity),
        }
    }

    /// Subject id of the carried identity, for logging.
    pub fn subject_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.subject_id.as_str())
    }
}

/// Broadcast feed adapters use to publish lifecycle events in emission order.
#[derive(Debug, Clone)]
pub struct LifecycleFeed {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to every live subscriber.
    ///
    /// Returns the number of subscribers that will observe it. Emitting with
    /// no subscribers is not an error.
    pub fn emit(&self, event: LifecycleEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Open a new subscription. Events emitted before this call are not replayed.
    pub fn subscribe(&self) -> LifecycleSubscription {
        LifecycleSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LifecycleFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

/// Handle to an active lifecycle subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct LifecycleSubscription {
    receiver: broadcast::Receiver<LifecycleEvent>,
}

impl LifecycleSubscription {
    /// Wait for the next event. Returns `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<LifecycleEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Lifecycle subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Release the subscription explicitly.
    pub fn unsubscribe(self) {}
}

/// Contract of the hosted identity/session service.
///
/// `subscribe` must deliver an event for every transition, including the ones
/// the adapter caused itself (a successful `sign_out` emits `SignedOut`).
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Current session identity, or `None` when signed out.
    async fn get_session(&self) -> Result<Option<Identity>, ServiceError>;

    /// End the current session.
    async fn sign_out(&self) -> Result<(), ServiceError>;

    /// Subscribe to lifecycle events.
    fn subscribe(&self) -> LifecycleSubscription;

    /// Drop locally cached credentials after a sign-out was observed.
    fn clear_cached_session(&self) {}
}
