//! Email/password login.

use super::CommandResult;
use crate::app::App;

pub async fn login(app: &App, email: &str, password: &str) -> CommandResult {
    let mut view = app.runtime.session_state();

    let identity = app
        .session
        .sign_in_with_password(email, password)
        .await
        .map_err(|e| format!("Login failed: {}", e))?;

    // The lifecycle handler spawns the profile reconciliation once it applies SignedIn
    view.wait_for_identity(&identity.subject_id).await;
    app.runtime.wait_for_reconciliations().await;

    println!("Signed in as {} ({})", identity.email, identity.subject_id);
    Ok(())
}
