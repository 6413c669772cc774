//! Command handlers.

mod callback;
mod login;
mod logout;
mod status;

pub use callback::callback;
pub use login::login;
pub use logout::logout;
pub use status::status;

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;
