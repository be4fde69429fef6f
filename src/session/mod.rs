//! Session state machine.
//!
//! [`SessionController`] owns all session state and reacts to commands and
//! adapter events; [`Session`] shares it across tasks.

pub mod controller;
pub mod runner;
pub mod state;

pub use controller::{SessionController, INITIAL_STATUS};
pub use runner::{CallbackHandle, Session};
pub use state::{
    ConnectedSession, ReceivedValue, SessionSnapshot, SessionState, SessionStateKind,
};
