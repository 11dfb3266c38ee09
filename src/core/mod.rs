//! Core intake components
//!
//! The stage machine itself lives in [`crate::conversation`]; this module
//! wires it to storage and the AI responder.

pub mod db;
mod intake;
mod memory;
mod prompt;
mod session;

pub use intake::{IntakeEngine, IntakeError};
pub use memory::{MessageStore, StoredMessage};
pub use prompt::PromptComposer;
pub use session::{SessionRecord, SessionStore};
