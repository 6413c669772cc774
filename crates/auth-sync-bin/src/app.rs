//! Application wiring: Supabase adapters behind the auth sync runtime.

use crate::terminal::{TerminalNavigator, TerminalNotifier};
use auth_sync_config_and_utils::{Config, Paths};
use auth_sync_core::AuthSyncRuntime;
use std::sync::Arc;
use supabase_adapters::{SupabaseProfileStore, SupabaseSessionService};
use tracing::debug;

/// Shared state handed to every command.
pub struct App {
    pub session: Arc<SupabaseSessionService>,
    pub runtime: AuthSyncRuntime,
}

impl App {
    /// Build the adapters and start the runtime (initial session check included).
    pub async fn start(config: &Config, paths: &Paths) -> Result<Self, Box<dyn std::error::Error>> {
        let supabase_url = config.supabase_url()?;
        debug!(supabase_url = %supabase_url, table = %config.profiles_table, "Starting auth sync");

        let session = Arc::new(
            SupabaseSessionService::new(supabase_url.as_str(), &config.supabase_publishable_key)
                .with_session_file(paths.session_file()),
        );
        let profiles = Arc::new(SupabaseProfileStore::new(
            session.clone(),
            config.profiles_table.clone(),
        ));

        let runtime = AuthSyncRuntime::new(
            session.clone(),
            profiles,
            Arc::new(TerminalNavigator),
            Arc::new(TerminalNotifier),
            config.settle_window(),
        );
        runtime.start().await?;

        Ok(Self { session, runtime })
    }

    pub fn shutdown(&self) {
        self.runtime.shutdown();
    }
}
