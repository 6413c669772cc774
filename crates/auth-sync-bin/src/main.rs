//! Profile Sync - Command-line front end for authentication and profile reconciliation.

mod app;
mod commands;
mod terminal;

use std::path::PathBuf;

use auth_sync_config_and_utils::{init_logging, Config, Paths};
use clap::{Parser, Subcommand};
use tracing::Instrument;

/// Profile sync command-line interface.
#[derive(Parser)]
#[command(name = "profile-sync")]
#[command(about = "Sign in, follow confirmation links and keep the user profile in sync")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (session, logs, config). Defaults to ~/.profile-sync
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "PROFILE_SYNC_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Complete sign-up from an email-confirmation redirect URL
    Callback {
        /// Redirect URL including the `#access_token=...` fragment
        url: String,
    },
    /// Show the current session and profile
    Status,
    /// Sign out
    Logout,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Login { .. } => "login",
            Commands::Callback { .. } => "callback",
            Commands::Status => "status",
            Commands::Logout => "logout",
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging("profile-sync", level, Some(paths.log_file()));

    let command = cli.command;
    let span = tracing::info_span!("profile_sync", command = command.name());
    async move {
        let app = app::App::start(&config, &paths).await?;

        let result = match command {
            Commands::Login { email, password } => {
                commands::login(&app, &email, &password).await
            }
            Commands::Callback { url } => commands::callback(&app, &url).await,
            Commands::Status => commands::status(&app).await,
            Commands::Logout => commands::logout(&app).await,
        };

        app.shutdown();
        result
    }
    .instrument(span)
    .await
}
