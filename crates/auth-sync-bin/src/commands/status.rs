//! Session and profile status.

use super::CommandResult;
use crate::app::App;
use auth_sync_core::ProfileStore;

pub async fn status(app: &App) -> CommandResult {
    let state = app.runtime.session_state().current();

    let Some(identity) = state.identity else {
        println!("Not signed in");
        return Ok(());
    };

    println!("Signed in as {} ({})", identity.email, identity.subject_id);

    match app.runtime.profiles().select(&identity.subject_id).await? {
        Some(profile) => println!(
            "Profile: {} {} <{}>",
            profile.first_name, profile.last_name, profile.email
        ),
        None => println!("Profile: missing"),
    }
    Ok(())
}
