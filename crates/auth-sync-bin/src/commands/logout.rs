//! Sign out.

use super::CommandResult;
use crate::app::App;
use auth_sync_core::SessionService;

pub async fn logout(app: &App) -> CommandResult {
    let mut view = app.runtime.session_state();

    app.session.sign_out().await?;
    view.wait_for_signed_out().await;

    println!("Signed out");
    Ok(())
}
