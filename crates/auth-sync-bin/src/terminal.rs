//! Navigation and notifications rendered to the terminal.

use auth_sync_core::{NavigateOptions, Navigator, NotificationKind, Notifier, Route};
use tracing::info;

pub struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn navigate(&self, route: Route, options: NavigateOptions) {
        info!(route = %route, replace = options.replace, "Navigate");
        println!("{}", render_route(route));
    }
}

pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, kind: NotificationKind, message: &str) {
        match kind {
            NotificationKind::Success => println!("{}", render_notification(kind, message)),
            NotificationKind::Error => eprintln!("{}", render_notification(kind, message)),
        }
    }
}

fn render_route(route: Route) -> String {
    let hint = match route {
        Route::Login => "run `profile-sync login` to sign in again",
        Route::Register => "sign up again to receive a new confirmation link",
        Route::CreateProfile => "your account is ready",
    };
    format!("-> {} ({})", route, hint)
}

fn render_notification(kind: NotificationKind, message: &str) -> String {
    match kind {
        NotificationKind::Success => format!("[ok] {}", message),
        NotificationKind::Error => format!("[error] {}", message),
    }
}
