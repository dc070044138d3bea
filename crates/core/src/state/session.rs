//! # Session State
//!
//! Per-query state tracked from the moment a question arrives until its one
//! terminal answer has been emitted.

use crate::contracts::{
    CallerReference, ChatTurn, CodeExtractionResponse, CollaboratorKind, CorrelationId,
    GenerationResponse, ReasoningResponse, RoutingResponse, SearchResponse,
};
use crate::error::{CoordinatorError, Result};
use crate::swarm::emitter::{Outcome, TerminalAnswer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Stage of one session. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    /// Registered, routing request not sent yet
    Created,
    /// Waiting for the project router
    Routing,
    /// Waiting for documentation search
    Searching,
    /// Waiting on reasoning / generation / code extraction
    FanningOut,
    /// Waiting for the synthesizer
    Synthesizing,
    /// Terminal answer emitted
    Terminated,
}

impl SessionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Routing => "routing",
            Self::Searching => "searching",
            Self::FanningOut => "fanning_out",
            Self::Synthesizing => "synthesizing",
            Self::Terminated => "terminated",
        }
    }

    /// The stage in which a response from `kind` is expected
    pub fn awaiting(kind: CollaboratorKind) -> Self {
        match kind {
            CollaboratorKind::Routing => Self::Routing,
            CollaboratorKind::Search => Self::Searching,
            CollaboratorKind::Reasoning
            | CollaboratorKind::Generation
            | CollaboratorKind::CodeExtraction => Self::FanningOut,
            CollaboratorKind::Synthesis => Self::Synthesizing,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == Self::Terminated
    }
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A collaborator's contribution, or the marker that it has none
#[derive(Debug, Clone, PartialEq)]
pub enum PartialResult {
    Routing(RoutingResponse),
    Search(SearchResponse),
    Reasoning(ReasoningResponse),
    Generation(GenerationResponse),
    CodeExtraction(CodeExtractionResponse),
    Unavailable { reason: String },
}

impl PartialResult {
    pub fn is_available(&self) -> bool {
        !matches!(self, Self::Unavailable { .. })
    }
}

/// One user query in flight
#[derive(Debug, Clone)]
pub struct Session {
    pub correlation_id: CorrelationId,
    pub query: String,
    /// Conversation key of the asking user
    pub user: String,
    pub caller_reference: CallerReference,
    stage: SessionStage,
    partial_results: BTreeMap<CollaboratorKind, PartialResult>,
    pub errors: Vec<(CollaboratorKind, String)>,
    pub created_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    started: Instant,
    /// Conversation context handed to the answer generator
    pub history: Vec<ChatTurn>,
    dispatched: BTreeSet<CollaboratorKind>,
    fanout_expired: bool,
    terminal_response: Option<Outcome>,
    timers: Vec<AbortHandle>,
}

impl Session {
    pub fn new(
        query: impl Into<String>,
        user: impl Into<String>,
        caller_reference: CallerReference,
        timeout: Duration,
    ) -> Self {
        let created_at = Utc::now();
        let deadline_at = created_at
            + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            correlation_id: CorrelationId::new(),
            query: query.into(),
            user: user.into(),
            caller_reference,
            stage: SessionStage::Created,
            partial_results: BTreeMap::new(),
            errors: Vec::new(),
            created_at,
            deadline_at,
            started: Instant::now(),
            history: Vec::new(),
            dispatched: BTreeSet::new(),
            fanout_expired: false,
            terminal_response: None,
            timers: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    /// Move to a later, non-terminal stage
    pub fn advance_to(&mut self, next: SessionStage) -> Result<()> {
        if next <= self.stage || next.is_terminal() {
            return Err(CoordinatorError::invalid_transition(
                self.stage,
                format!("cannot move to {next}"),
            ));
        }
        self.stage = next;
        Ok(())
    }

    /// Record a collaborator's result. Returns false if one is already held.
    pub fn record(&mut self, kind: CollaboratorKind, result: PartialResult) -> bool {
        if self.partial_results.contains_key(&kind) {
            return false;
        }
        self.partial_results.insert(kind, result);
        true
    }

    pub fn record_error(&mut self, kind: CollaboratorKind, message: impl Into<String>) {
        self.errors.push((kind, message.into()));
    }

    pub fn result(&self, kind: CollaboratorKind) -> Option<&PartialResult> {
        self.partial_results.get(&kind)
    }

    pub fn is_resolved(&self, kind: CollaboratorKind) -> bool {
        self.partial_results.contains_key(&kind)
    }

    pub fn routing(&self) -> Option<&RoutingResponse> {
        match self.result(CollaboratorKind::Routing) {
            Some(PartialResult::Routing(r)) => Some(r),
            _ => None,
        }
    }

    pub fn search(&self) -> Option<&SearchResponse> {
        match self.result(CollaboratorKind::Search) {
            Some(PartialResult::Search(r)) => Some(r),
            _ => None,
        }
    }

    pub fn reasoning(&self) -> Option<&ReasoningResponse> {
        match self.result(CollaboratorKind::Reasoning) {
            Some(PartialResult::Reasoning(r)) => Some(r),
            _ => None,
        }
    }

    pub fn generation(&self) -> Option<&GenerationResponse> {
        match self.result(CollaboratorKind::Generation) {
            Some(PartialResult::Generation(r)) => Some(r),
            _ => None,
        }
    }

    pub fn codegen(&self) -> Option<&CodeExtractionResponse> {
        match self.result(CollaboratorKind::CodeExtraction) {
            Some(PartialResult::CodeExtraction(r)) => Some(r),
            _ => None,
        }
    }

    pub fn mark_dispatched(&mut self, kind: CollaboratorKind) {
        self.dispatched.insert(kind);
    }

    pub fn was_dispatched(&self, kind: CollaboratorKind) -> bool {
        self.dispatched.contains(&kind)
    }

    /// Fan-out collaborators that were asked but have not answered yet
    pub fn pending_fan_out(&self) -> Vec<CollaboratorKind> {
        CollaboratorKind::FAN_OUT
            .into_iter()
            .filter(|k| self.dispatched.contains(k) && !self.is_resolved(*k))
            .collect()
    }

    pub fn fanout_expired(&self) -> bool {
        self.fanout_expired
    }

    pub(crate) fn mark_fanout_expired(&mut self) {
        self.fanout_expired = true;
    }

    /// Close the session with `answer`.
    ///
    /// Returns the answer only on the first call; later calls get `None`.
    pub fn seal(&mut self, answer: TerminalAnswer) -> Option<TerminalAnswer> {
        if self.terminal_response.is_some() {
            return None;
        }
        self.terminal_response = Some(answer.outcome);
        self.stage = SessionStage::Terminated;
        Some(answer)
    }

    pub fn is_sealed(&self) -> bool {
        self.terminal_response.is_some()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.terminal_response
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn add_timer(&mut self, handle: AbortHandle) {
        self.timers.push(handle);
    }

    pub fn cancel_timers(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            correlation_id: self.correlation_id,
            user: self.user.clone(),
            query: self.query.clone(),
            stage: self.stage,
            created_at: self.created_at,
            deadline_at: self.deadline_at,
            responded: self
                .partial_results
                .iter()
                .filter(|(_, r)| r.is_available())
                .map(|(k, _)| k.as_str().to_string())
                .collect(),
            errors: self.errors.len(),
        }
    }
}

/// Serializable view of a live session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub correlation_id: CorrelationId,
    pub user: String,
    pub query: String,
    pub stage: SessionStage,
    pub created_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub responded: Vec<String>,
    pub errors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            "How do I use Chainlink VRF?",
            "alice",
            CallerReference::new("reply-1"),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_stage_only_moves_forward() {
        let mut s = session();
        assert_eq!(s.stage(), SessionStage::Created);
        s.advance_to(SessionStage::Routing).unwrap();
        s.advance_to(SessionStage::Searching).unwrap();
        assert!(s.advance_to(SessionStage::Routing).is_err());
        assert!(s.advance_to(SessionStage::Searching).is_err());
        assert!(s.advance_to(SessionStage::Terminated).is_err());
        assert_eq!(s.stage(), SessionStage::Searching);
    }

    #[test]
    fn test_one_entry_per_collaborator() {
        let mut s = session();
        assert!(s.record(
            CollaboratorKind::Reasoning,
            PartialResult::Unavailable {
                reason: "timed out".to_string()
            }
        ));
        assert!(!s.record(
            CollaboratorKind::Reasoning,
            PartialResult::Unavailable {
                reason: "again".to_string()
            }
        ));
        assert!(s.is_resolved(CollaboratorKind::Reasoning));
        assert!(s.reasoning().is_none());
    }

    #[test]
    fn test_pending_fan_out_tracks_dispatched_only() {
        let mut s = session();
        s.mark_dispatched(CollaboratorKind::Generation);
        s.mark_dispatched(CollaboratorKind::Reasoning);
        assert_eq!(
            s.pending_fan_out(),
            vec![CollaboratorKind::Generation, CollaboratorKind::Reasoning]
        );
    }

    #[test]
    fn test_deadline_follows_timeout() {
        let s = session();
        assert_eq!((s.deadline_at - s.created_at).num_seconds(), 30);
    }

    #[test]
    fn test_stage_ordering_and_awaiting() {
        assert!(SessionStage::Routing < SessionStage::Searching);
        assert!(SessionStage::Synthesizing < SessionStage::Terminated);
        assert_eq!(
            SessionStage::awaiting(CollaboratorKind::CodeExtraction),
            SessionStage::FanningOut
        );
        assert_eq!(SessionStage::FanningOut.to_string(), "fanning_out");
    }
}
