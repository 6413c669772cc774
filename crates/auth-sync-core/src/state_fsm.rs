//! Session state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐
//! │  Uninitialized  │ (initial)
//! └────────┬────────┘
//!          │ Start
//!          ▼
//! ┌─────────────────┐
//! │     Loading     │
//! └────────┬────────┘
//!          │ IdentityPresent / IdentityAbsent
//!          ▼
//! ┌─────────────────┐  IdentityAbsent   ┌─────────────────┐
//! │  Authenticated  │ ────────────────► │    Anonymous    │
//! │                 │ ◄──────────────── │                 │
//! └─────────────────┘  IdentityPresent  └─────────────────┘
//! ```
//!
//! Once resolved, the machine never returns to `Loading`.

use rust_fsm::*;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Uninitialized)

    Uninitialized => {
        Start => Loading
    },
    Loading => {
        IdentityPresent => Authenticated,
        IdentityAbsent => Anonymous
    },
    Authenticated => {
        // Token refresh or profile update keeps the session
        IdentityPresent => Authenticated,
        IdentityAbsent => Anonymous
    },
    Anonymous => {
        IdentityPresent => Authenticated,
        IdentityAbsent => Anonymous
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

impl SessionMachineInput {
    /// Input matching the presence of an identity.
    pub fn for_identity<T>(identity: Option<&T>) -> Self {
        if identity.is_some() {
            SessionMachineInput::IdentityPresent
        } else {
            SessionMachineInput::IdentityAbsent
        }
    }
}
