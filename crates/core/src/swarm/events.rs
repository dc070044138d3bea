//! # Swarm Events
//!
//! Observability events describing what the coordinator did with each session.

use crate::contracts::{CollaboratorKind, CorrelationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Kind of swarm event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SwarmEventKind {
    /// Session registered for a new question
    SessionCreated,
    /// Request handed to a collaborator proxy
    RequestDispatched,
    /// Collaborator response stored on the session
    ResponseRecorded,
    /// Response discarded (unknown, stale or terminated session)
    ResponseDropped,
    /// Collaborator reported an error or could not be reached
    CollaboratorFailed,
    /// Fan-in join fired and synthesis (or a local answer) follows
    FanOutJoined,
    /// Fan-out timer elapsed before every collaborator answered
    FanOutExpired,
    /// Terminal answer sent to the caller
    SessionTerminated,
    /// Hard session deadline elapsed
    DeadlineExpired,
}

/// An event in the swarm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmEvent {
    /// Unique event ID
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: SwarmEventKind,
    /// Session the event belongs to
    pub correlation_id: CorrelationId,
    #[serde(default)]
    pub collaborator: Option<CollaboratorKind>,
    /// Associated data (JSON)
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl SwarmEvent {
    pub fn new(kind: SwarmEventKind, correlation_id: CorrelationId) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            correlation_id,
            collaborator: None,
            data: None,
        }
    }

    pub fn with_collaborator(mut self, kind: CollaboratorKind) -> Self {
        self.collaborator = Some(kind);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Fan-out point for swarm events. Sending with no subscribers is fine.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    tx: Option<broadcast::Sender<SwarmEvent>>,
}

impl EventBus {
    pub fn new(tx: broadcast::Sender<SwarmEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn emit(&self, event: SwarmEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn subscribe(&self) -> Option<broadcast::Receiver<SwarmEvent>> {
        self.tx.as_ref().map(|tx| tx.subscribe())
    }
}
