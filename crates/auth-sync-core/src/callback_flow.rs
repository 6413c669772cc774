//! Email-confirmation callback resolution.
//!
//! After the user follows a confirmation link the session may appear through
//! the lifecycle feed or through a session read, with no ordering guarantee
//! between the two. The resolver races all sources and acts on whichever
//! settles first; the losers are dropped.

use crate::classifier::classify;
use crate::{
    LifecycleEventKind, NavigateOptions, Navigator, Route, ServiceError, SessionService,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Terminal outcome of the callback flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackResolution {
    /// A session exists; continue to profile creation.
    CreateProfile,
    /// No session could be established; send the user back to registration.
    Register,
}

impl CallbackResolution {
    pub fn route(&self) -> Route {
        match self {
            CallbackResolution::CreateProfile => Route::CreateProfile,
            CallbackResolution::Register => Route::Register,
        }
    }
}

/// Which branch of the race produced the resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    LifecycleEvent,
    InitialCheck,
    DelayedCheck,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::LifecycleEvent => "lifecycle_event",
            ResolutionSource::InitialCheck => "initial_check",
            ResolutionSource::DelayedCheck => "delayed_check",
        }
    }
}

pub struct CallbackResolver {
    session: Arc<dyn SessionService>,
    navigator: Arc<dyn Navigator>,
    settle_window: Duration,
}

impl CallbackResolver {
    pub fn new(
        session: Arc<dyn SessionService>,
        navigator: Arc<dyn Navigator>,
        settle_window: Duration,
    ) -> Self {
        Self {
            session,
            navigator,
            settle_window,
        }
    }

    /// Decide where the user goes after the callback and navigate there.
    ///
    /// Navigates exactly once, replacing the callback entry in history.
    pub async fn resolve(&self) -> (CallbackResolution, ResolutionSource) {
        let (resolution, source) = self.race().await;

        info!(
            route = %resolution.route(),
            source = source.as_str(),
            "Callback resolved"
        );
        self.navigator
            .navigate(resolution.route(), NavigateOptions::replace());

        (resolution, source)
    }

    async fn race(&self) -> (CallbackResolution, ResolutionSource) {
        let mut subscription = self.session.subscribe();

        let mut initial = self.session.get_session();
        let delayed = async {
            tokio::time::sleep(self.settle_window).await;
            self.session.get_session().await
        };
        tokio::pin!(delayed);

        let mut feed_open = true;
        let mut initial_pending = true;

        let outcome = loop {
            tokio::select! {
                biased;

                event = subscription.next(), if feed_open => match event {
                    Some(event) => match event.kind {
                        LifecycleEventKind::SignedIn if event.identity.is_some() => {
                            break (CallbackResolution::CreateProfile, ResolutionSource::LifecycleEvent);
                        }
                        LifecycleEventKind::SignedOut => {
                            break (CallbackResolution::Register, ResolutionSource::LifecycleEvent);
                        }
                        kind => debug!(event = kind.as_str(), "Ignoring event during callback"),
                    },
                    None => {
                        debug!("Lifecycle feed closed during callback");
                        feed_open = false;
                    }
                },

                result = &mut initial, if initial_pending => {
                    initial_pending = false;
                    match result {
                        Ok(Some(_)) => {
                            break (CallbackResolution::CreateProfile, ResolutionSource::InitialCheck);
                        }
                        Ok(None) => debug!("No session yet, waiting for the settle window"),
                        Err(e) => {
                            log_check_failure(ResolutionSource::InitialCheck, &e);
                            break (CallbackResolution::Register, ResolutionSource::InitialCheck);
                        }
                    }
                },

                result = &mut delayed => {
                    let resolution = match result {
                        Ok(Some(_)) => CallbackResolution::CreateProfile,
                        Ok(None) => CallbackResolution::Register,
                        Err(e) => {
                            log_check_failure(ResolutionSource::DelayedCheck, &e);
                            CallbackResolution::Register
                        }
                    };
                    break (resolution, ResolutionSource::DelayedCheck);
                },
            }
        };

        subscription.unsubscribe();
        outcome
    }
}

fn log_check_failure(source: ResolutionSource, error: &ServiceError) {
    warn!(
        source = source.as_str(),
        class = ?classify(error),
        error = %error,
        "Session check failed during callback"
    );
}
