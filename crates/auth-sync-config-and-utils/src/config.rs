//! Configuration management for the profile sync client.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default Supabase URL (can be overridden at compile time via SUPABASE_URL env var).
pub const DEFAULT_SUPABASE_URL: &str = match option_env!("SUPABASE_URL") {
    Some(url) => url,
    None => "https://random.supabase.co",
};

/// Default Supabase publishable key (can be overridden at compile time via SUPABASE_PUBLISHABLE_KEY env var).
pub const DEFAULT_SUPABASE_PUBLISHABLE_KEY: &str = match option_env!("SUPABASE_PUBLISHABLE_KEY") {
    Some(key) => key,
    None => "random-key",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Table holding one profile row per authenticated identity.
pub const DEFAULT_PROFILES_TABLE: &str = "profiles";

/// Delay before the email-confirmation callback re-checks the session.
pub const DEFAULT_SETTLE_WINDOW_MS: u64 = 1000;

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Supabase project URL.
    #[serde(default = "default_supabase_url")]
    pub supabase_url: String,
    /// Supabase publishable API key (public, safe to expose).
    #[serde(default = "default_supabase_publishable_key")]
    pub supabase_publishable_key: String,
    /// PostgREST table used for profile reconciliation.
    #[serde(default = "default_profiles_table")]
    pub profiles_table: String,
    /// Callback settle window in milliseconds.
    #[serde(default = "default_settle_window_ms")]
    pub settle_window_ms: u64,
}

fn default_supabase_url() -> String {
    DEFAULT_SUPABASE_URL.to_string()
}

fn default_supabase_publishable_key() -> String {
    DEFAULT_SUPABASE_PUBLISHABLE_KEY.to_string()
}

fn default_profiles_table() -> String {
    DEFAULT_PROFILES_TABLE.to_string()
}

fn default_settle_window_ms() -> u64 {
    DEFAULT_SETTLE_WINDOW_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            supabase_url: DEFAULT_SUPABASE_URL.to_string(),
            supabase_publishable_key: DEFAULT_SUPABASE_PUBLISHABLE_KEY.to_string(),
            profiles_table: DEFAULT_PROFILES_TABLE.to_string(),
            settle_window_ms: DEFAULT_SETTLE_WINDOW_MS,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    ///
    /// `supabase_url` and `supabase_publishable_key` are compile-time only and
    /// always use the built-in defaults regardless of the file contents.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.supabase_url = DEFAULT_SUPABASE_URL.to_string();
        config.supabase_publishable_key = DEFAULT_SUPABASE_PUBLISHABLE_KEY.to_string();

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Override runtime-tunable values from environment variables.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("PROFILE_SYNC_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(settle) = std::env::var("PROFILE_SYNC_SETTLE_WINDOW_MS")
            .ok()
            .and_then(|raw| parse_settle_window_ms(&raw))
        {
            self.settle_window_ms = settle;
        }
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.profiles_table.trim().is_empty() {
            return Err(CoreError::Config(
                "profiles_table must not be empty".to_string(),
            ));
        }
        if self.settle_window_ms == 0 {
            return Err(CoreError::Config(
                "settle_window_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the Supabase URL as a parsed URL.
    pub fn supabase_url(&self) -> CoreResult<Url> {
        Url::parse(&self.supabase_url).map_err(CoreError::from)
    }

    /// Settle window used by the email-confirmation callback.
    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }
}

fn parse_settle_window_ms(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|ms| *ms > 0)
}
