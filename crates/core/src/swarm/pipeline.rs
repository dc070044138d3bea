//! # Pipeline Stages
//!
//! The session state machine as a pure function: given a session and one
//! event, mutate the session and return what the coordinator must do next.
//! It never performs I/O, so the coordinator can run it inside the registry's
//! per-session critical section.
//!
//! ```text
//! CREATED → ROUTING → SEARCHING → FANNING_OUT → SYNTHESIZING → TERMINATED
//!              │           │            │
//!              └───────────┴────────────┴──▶ TERMINATED (early / degraded)
//! ```

use crate::config::CoordinatorConfig;
use crate::contracts::{
    CollaboratorKind, ErrorEnvelope, Inbound, Outbound, RoutingRequest, RoutingResponse,
    SearchRequest, SearchResponse,
};
use crate::error::CoordinatorError;
use crate::state::{PartialResult, Session, SessionStage};

use super::emitter::{
    nothing_found_text, Outcome, TerminalAnswer, APOLOGY_TEXT, NO_DOCUMENTATION_TEXT,
    NO_MATCH_TEXT, TIMEOUT_TEXT,
};
use super::events::{SwarmEvent, SwarmEventKind};
use super::fanout;

/// Per-deployment inputs to the state machine
#[derive(Debug, Clone, PartialEq)]
pub struct StageSettings {
    pub max_projects: usize,
    pub top_k: usize,
    pub target_language: String,
    pub max_tokens: u32,
    /// Optional collaborators that are both enabled and wired up
    pub reasoning_enabled: bool,
    pub codegen_enabled: bool,
}

impl StageSettings {
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            max_projects: config.max_projects,
            top_k: config.top_k,
            target_language: config.target_language.clone(),
            max_tokens: config.max_tokens,
            reasoning_enabled: config.enable_reasoning,
            codegen_enabled: config.enable_codegen,
        }
    }

    pub fn is_enabled(&self, kind: CollaboratorKind) -> bool {
        match kind {
            CollaboratorKind::Reasoning => self.reasoning_enabled,
            CollaboratorKind::CodeExtraction => self.codegen_enabled,
            _ => true,
        }
    }
}

impl Default for StageSettings {
    fn default() -> Self {
        Self::from_config(&CoordinatorConfig::default())
    }
}

/// Something that happened to one session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Start,
    Response(Inbound),
    FanOutExpired,
    DeadlineExpired,
}

/// Work the coordinator performs after a transition
#[derive(Debug, Clone)]
pub enum Action {
    Dispatch(Outbound),
    ArmFanOutTimer,
    /// Sealed terminal answer; deliver exactly this once
    Emit(TerminalAnswer),
    Notify(SwarmEvent),
}

/// Apply `event` to `session`
pub fn advance(
    session: &mut Session,
    event: SessionEvent,
    settings: &StageSettings,
) -> Vec<Action> {
    let mut actions = Vec::new();
    if session.is_sealed() {
        return actions;
    }

    match event {
        SessionEvent::Start => start(session, settings, &mut actions),
        SessionEvent::Response(inbound) => on_response(session, inbound, settings, &mut actions),
        SessionEvent::FanOutExpired => fanout::expire(session, &mut actions),
        SessionEvent::DeadlineExpired => on_deadline(session, &mut actions),
    }
    actions
}

/// Seal `answer` on the session and queue it for delivery
pub(crate) fn terminate(session: &mut Session, answer: TerminalAnswer, actions: &mut Vec<Action>) {
    if let Some(answer) = session.seal(answer) {
        actions.push(Action::Emit(answer));
    }
}

/// Close the session with the generic apology after an internal fault
pub(crate) fn fail(session: &mut Session, err: CoordinatorError, actions: &mut Vec<Action>) {
    tracing::error!(
        correlation_id = %session.correlation_id,
        stage = %session.stage(),
        error = %err,
        "Coordinator fault, terminating session"
    );
    let answer = TerminalAnswer::fixed(session, Outcome::Failed, APOLOGY_TEXT);
    terminate(session, answer, actions);
}

fn start(session: &mut Session, settings: &StageSettings, actions: &mut Vec<Action>) {
    if let Err(err) = session.advance_to(SessionStage::Routing) {
        return fail(session, err, actions);
    }
    actions.push(Action::Notify(
        SwarmEvent::new(SwarmEventKind::SessionCreated, session.correlation_id)
            .with_data(serde_json::json!({ "user": session.user, "query": session.query })),
    ));
    actions.push(Action::Dispatch(Outbound::Routing(RoutingRequest {
        correlation_id: session.correlation_id,
        query: session.query.clone(),
        max_projects: settings.max_projects,
        caller_reference: session.caller_reference.clone(),
    })));
}

fn on_response(
    session: &mut Session,
    inbound: Inbound,
    settings: &StageSettings,
    actions: &mut Vec<Action>,
) {
    let kind = inbound.collaborator();
    let expected = SessionStage::awaiting(kind);
    let stage = session.stage();

    if expected > stage {
        let err = CoordinatorError::invalid_transition(
            stage,
            format!("{kind} response arrived early"),
        );
        return fail(session, err, actions);
    }

    if expected < stage
        || session.is_resolved(kind)
        || (kind.is_fan_out() && !session.was_dispatched(kind))
    {
        tracing::debug!(
            correlation_id = %session.correlation_id,
            stage = %stage,
            collaborator = %kind,
            "Dropping stale response"
        );
        actions.push(Action::Notify(
            SwarmEvent::new(SwarmEventKind::ResponseDropped, session.correlation_id)
                .with_collaborator(kind)
                .with_data(serde_json::json!({ "reason": "stale" })),
        ));
        return;
    }

    if !inbound.is_error() {
        actions.push(Action::Notify(
            SwarmEvent::new(SwarmEventKind::ResponseRecorded, session.correlation_id)
                .with_collaborator(kind),
        ));
    }

    match inbound {
        Inbound::Routing(resp) => on_routing(session, resp, settings, actions),
        Inbound::Search(resp) => on_search(session, resp, settings, actions),
        Inbound::Reasoning(resp) => {
            tracing::info!(
                correlation_id = %session.correlation_id,
                dependencies = resp.dependencies.len(),
                steps = resp.execution_order.len(),
                "Reasoning response"
            );
            fanout::record(session, kind, PartialResult::Reasoning(resp), actions);
        }
        Inbound::Generation(resp) => {
            tracing::info!(
                correlation_id = %session.correlation_id,
                tokens = resp.token_count,
                "Generation response"
            );
            fanout::record(session, kind, PartialResult::Generation(resp), actions);
        }
        Inbound::CodeExtraction(resp) => {
            tracing::info!(
                correlation_id = %session.correlation_id,
                examples = resp.examples.len(),
                "Code extraction response"
            );
            fanout::record(session, kind, PartialResult::CodeExtraction(resp), actions);
        }
        Inbound::Synthesis(resp) => {
            let answer = TerminalAnswer::from_synthesis(session, resp);
            terminate(session, answer, actions);
        }
        Inbound::Error(envelope) => on_error(session, envelope, actions),
    }
}

fn on_routing(
    session: &mut Session,
    resp: RoutingResponse,
    settings: &StageSettings,
    actions: &mut Vec<Action>,
) {
    tracing::info!(
        correlation_id = %session.correlation_id,
        selected = resp.selected_projects.len(),
        total = resp.total_project_count,
        "Project routing response"
    );

    let project_ids: Vec<String> = resp
        .selected_projects
        .iter()
        .take(settings.max_projects)
        .map(|p| p.id.clone())
        .collect();
    let catalog_empty = resp.total_project_count == 0;
    session.record(CollaboratorKind::Routing, PartialResult::Routing(resp));

    if project_ids.is_empty() {
        let answer = if catalog_empty {
            TerminalAnswer::fixed(session, Outcome::NoDocumentation, NO_DOCUMENTATION_TEXT)
        } else {
            TerminalAnswer::fixed(session, Outcome::NoMatch, NO_MATCH_TEXT)
        };
        return terminate(session, answer, actions);
    }

    if let Err(err) = session.advance_to(SessionStage::Searching) {
        return fail(session, err, actions);
    }
    actions.push(Action::Dispatch(Outbound::Search(SearchRequest {
        correlation_id: session.correlation_id,
        query: session.query.clone(),
        project_ids,
        top_k: settings.top_k,
        caller_reference: session.caller_reference.clone(),
    })));
}

fn on_search(
    session: &mut Session,
    resp: SearchResponse,
    settings: &StageSettings,
    actions: &mut Vec<Action>,
) {
    tracing::info!(
        correlation_id = %session.correlation_id,
        results = resp.total_results,
        projects = resp.projects_searched.len(),
        "Search response"
    );

    let empty = resp.chunks.is_empty();
    session.record(CollaboratorKind::Search, PartialResult::Search(resp));

    if empty {
        let text = nothing_found_text(&session.query);
        let answer = TerminalAnswer::fixed(session, Outcome::NothingFound, text);
        return terminate(session, answer, actions);
    }

    if let Err(err) = session.advance_to(SessionStage::FanningOut) {
        return fail(session, err, actions);
    }
    fanout::dispatch(session, settings, actions);
}

fn on_error(session: &mut Session, envelope: ErrorEnvelope, actions: &mut Vec<Action>) {
    let kind = envelope.collaborator;
    tracing::warn!(
        correlation_id = %session.correlation_id,
        collaborator = %kind,
        error = %envelope.message,
        "Collaborator error"
    );
    session.record_error(kind, envelope.message.clone());
    actions.push(Action::Notify(
        SwarmEvent::new(SwarmEventKind::CollaboratorFailed, session.correlation_id)
            .with_collaborator(kind)
            .with_data(serde_json::json!({ "message": envelope.message })),
    ));

    match kind {
        CollaboratorKind::Routing | CollaboratorKind::Search => {
            let answer = TerminalAnswer::fixed(session, Outcome::Failed, APOLOGY_TEXT);
            terminate(session, answer, actions);
        }
        CollaboratorKind::Reasoning
        | CollaboratorKind::Generation
        | CollaboratorKind::CodeExtraction => {
            let absent = PartialResult::Unavailable {
                reason: envelope.message,
            };
            fanout::record(session, kind, absent, actions);
        }
        CollaboratorKind::Synthesis => {
            let answer = TerminalAnswer::composed(session);
            terminate(session, answer, actions);
        }
    }
}

fn on_deadline(session: &mut Session, actions: &mut Vec<Action>) {
    let stage = session.stage();
    tracing::warn!(
        correlation_id = %session.correlation_id,
        stage = %stage,
        "Session deadline expired"
    );
    actions.push(Action::Notify(
        SwarmEvent::new(SwarmEventKind::DeadlineExpired, session.correlation_id)
            .with_data(serde_json::json!({ "stage": stage })),
    ));

    if stage < SessionStage::FanningOut {
        let answer = TerminalAnswer::fixed(session, Outcome::TimedOut, TIMEOUT_TEXT);
        return terminate(session, answer, actions);
    }

    fanout::mark_pending_unavailable(session, "session deadline expired");
    let answer = TerminalAnswer::composed(session);
    terminate(session, answer, actions);
}
