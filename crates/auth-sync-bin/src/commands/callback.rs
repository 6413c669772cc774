//! Email-confirmation callback.

use super::CommandResult;
use crate::app::App;
use auth_sync_core::CallbackResolution;
use tracing::{debug, warn};

pub async fn callback(app: &App, url: &str) -> CommandResult {
    let mut view = app.runtime.session_state();
    let resolver = app.runtime.callback_resolver();

    // The resolver subscribes on first poll, before the session is established
    let establish = async {
        match app.session.set_session_from_url(url).await {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!(error = %e, "Could not establish session from callback");
                None
            }
        }
    };
    let ((resolution, source), established) = tokio::join!(resolver.resolve(), establish);

    match resolution {
        CallbackResolution::CreateProfile => {
            // Only a fresh session emitted SignedIn; an existing one has nothing left to apply
            if let Some(identity) = established {
                view.wait_for_identity(&identity.subject_id).await;
                app.runtime.wait_for_reconciliations().await;
            } else {
                debug!(source = source.as_str(), "Callback resolved from an existing session");
            }
            println!("Email confirmed ({})", source.as_str());
            Ok(())
        }
        CallbackResolution::Register => Err("Email confirmation failed".into()),
    }
}
