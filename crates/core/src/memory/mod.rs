//! # Memory Module
//!
//! Caller-scoped conversation memory, kept outside the session state machine.

pub mod conversation;

pub use conversation::{is_control_command, ConversationMemory, CLEARED_MESSAGE, CONTROL_COMMANDS};
