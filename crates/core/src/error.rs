//! # Coordinator Errors
//!
//! Error taxonomy for the orchestration core. None of these ever escape to the
//! caller as-is; a failing session is closed with the generic apology instead.

use crate::contracts::{CollaboratorKind, CorrelationId};
use crate::state::SessionStage;
use thiserror::Error;

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// A message arrived for a stage the session has not reached
    #[error("invalid transition from {stage}: {message}")]
    InvalidTransition {
        stage: SessionStage,
        message: String,
    },

    /// No live session carries this correlation id
    #[error("no live session for correlation id {0}")]
    UnknownSession(CorrelationId),

    /// A proxy could not hand a request to its collaborator
    #[error("transport error: {0}")]
    Transport(String),

    /// Unparseable or unattributable payload
    #[error("malformed payload: {0}")]
    Contract(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} failed: {message}")]
    Collaborator {
        kind: CollaboratorKind,
        message: String,
    },
}

impl CoordinatorError {
    pub fn invalid_transition(stage: SessionStage, message: impl Into<String>) -> Self {
        Self::InvalidTransition {
            stage,
            message: message.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Contract(err.to_string())
    }
}
