//! Supabase implementations of the auth sync boundaries.
//!
//! - [`SupabaseSessionService`]: GoTrue sessions (password login, callback
//!   redirects, refresh, logout) published on a lifecycle feed
//! - [`SupabaseProfileStore`]: the profiles table through PostgREST

mod error;
mod profile_store;
mod session;

pub use error::{SupabaseError, SupabaseResult};
pub use profile_store::SupabaseProfileStore;
pub use session::{parse_callback_url, CallbackTokens, StoredSession, SupabaseSessionService};
