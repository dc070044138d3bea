//! # Fan-in / Timeout
//!
//! Governs the FANNING_OUT stage. Generation is mandatory; reasoning and code
//! extraction are optional and waited for until the fan-out timer fires.
//!
//! The join condition is evaluated inside the same per-session critical
//! section that records each result, and the join itself moves the session to
//! SYNTHESIZING, so it fires at most once no matter how many responses race.

use crate::contracts::{
    CodeExtractionRequest, CollaboratorKind, GenerationRequest, Outbound, ReasoningRequest,
    SynthesisRequest,
};
use crate::state::{PartialResult, Session, SessionStage};

use super::emitter::TerminalAnswer;
use super::events::{SwarmEvent, SwarmEventKind};
use super::pipeline::{fail, terminate, Action, StageSettings};

/// Where a fanning-out session stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    /// Still waiting on at least one collaborator
    Waiting,
    /// Generation present; hand everything to the synthesizer
    Synthesize,
    /// Generation absent for good; answer from search results alone
    SearchOnly,
}

/// Send the fan-out requests and arm the timer
pub fn dispatch(session: &mut Session, settings: &StageSettings, actions: &mut Vec<Action>) {
    let Some(chunks) = session.search().map(|s| s.chunks.clone()) else {
        let err = crate::error::CoordinatorError::invalid_transition(
            session.stage(),
            "fan-out without search results",
        );
        return fail(session, err, actions);
    };

    let id = session.correlation_id;
    let caller = session.caller_reference.clone();

    session.mark_dispatched(CollaboratorKind::Generation);
    actions.push(Action::Dispatch(Outbound::Generation(GenerationRequest {
        correlation_id: id,
        query: session.query.clone(),
        chunks: chunks.clone(),
        max_tokens: settings.max_tokens,
        history: session.history.clone(),
        caller_reference: caller.clone(),
    })));

    if settings.reasoning_enabled {
        session.mark_dispatched(CollaboratorKind::Reasoning);
        actions.push(Action::Dispatch(Outbound::Reasoning(ReasoningRequest {
            correlation_id: id,
            query: session.query.clone(),
            chunks: chunks.clone(),
            caller_reference: caller.clone(),
        })));
    }

    if settings.codegen_enabled {
        session.mark_dispatched(CollaboratorKind::CodeExtraction);
        actions.push(Action::Dispatch(Outbound::CodeExtraction(CodeExtractionRequest {
            correlation_id: id,
            query: session.query.clone(),
            chunks,
            target_language: settings.target_language.clone(),
            caller_reference: caller,
        })));
    }

    actions.push(Action::ArmFanOutTimer);
}

/// Store one fan-out result and re-check the join condition
pub fn record(
    session: &mut Session,
    kind: CollaboratorKind,
    result: PartialResult,
    actions: &mut Vec<Action>,
) {
    session.record(kind, result);
    try_join(session, actions);
}

/// Fan-out timer fired: give up on everything still pending
pub fn expire(session: &mut Session, actions: &mut Vec<Action>) {
    if session.stage() != SessionStage::FanningOut || session.fanout_expired() {
        return;
    }
    session.mark_fanout_expired();

    let pending: Vec<&'static str> = session.pending_fan_out().iter().map(|k| k.as_str()).collect();
    tracing::warn!(
        correlation_id = %session.correlation_id,
        pending = ?pending,
        "Fan-out timer expired"
    );
    actions.push(Action::Notify(
        SwarmEvent::new(SwarmEventKind::FanOutExpired, session.correlation_id)
            .with_data(serde_json::json!({ "pending": pending })),
    ));

    mark_pending_unavailable(session, "timed out");
    try_join(session, actions);
}

/// Record every outstanding fan-out collaborator as unavailable
pub fn mark_pending_unavailable(session: &mut Session, reason: &str) {
    for kind in session.pending_fan_out() {
        session.record(
            kind,
            PartialResult::Unavailable {
                reason: reason.to_string(),
            },
        );
    }
}

pub fn join_state(session: &Session) -> JoinState {
    let optional_done = CollaboratorKind::FAN_OUT
        .iter()
        .filter(|k| k.is_optional() && session.was_dispatched(**k))
        .all(|k| session.is_resolved(*k));
    let settled = optional_done || session.fanout_expired();

    match session.result(CollaboratorKind::Generation) {
        Some(PartialResult::Generation(_)) if settled => JoinState::Synthesize,
        Some(PartialResult::Unavailable { .. }) if settled => JoinState::SearchOnly,
        _ => JoinState::Waiting,
    }
}

fn try_join(session: &mut Session, actions: &mut Vec<Action>) {
    if session.stage() != SessionStage::FanningOut {
        return;
    }

    match join_state(session) {
        JoinState::Waiting => {}
        JoinState::Synthesize => {
            let (Some(search), Some(generation)) =
                (session.search().cloned(), session.generation().cloned())
            else {
                return;
            };
            if let Err(err) = session.advance_to(SessionStage::Synthesizing) {
                return fail(session, err, actions);
            }
            tracing::info!(
                correlation_id = %session.correlation_id,
                reasoning = session.reasoning().is_some(),
                codegen = session.codegen().is_some(),
                "Fan-out joined, synthesizing"
            );
            actions.push(Action::Notify(
                SwarmEvent::new(SwarmEventKind::FanOutJoined, session.correlation_id)
                    .with_data(serde_json::json!({ "expired": session.fanout_expired() })),
            ));
            actions.push(Action::Dispatch(Outbound::Synthesis(SynthesisRequest {
                correlation_id: session.correlation_id,
                query: session.query.clone(),
                search_result: search,
                generation_result: generation,
                reasoning_result: session.reasoning().cloned(),
                codegen_result: session.codegen().cloned(),
                caller_reference: session.caller_reference.clone(),
            })));
        }
        JoinState::SearchOnly => {
            tracing::warn!(
                correlation_id = %session.correlation_id,
                "Generation unavailable, answering from search results"
            );
            actions.push(Action::Notify(
                SwarmEvent::new(SwarmEventKind::FanOutJoined, session.correlation_id)
                    .with_data(serde_json::json!({ "search_only": true })),
            ));
            let answer = TerminalAnswer::composed(session);
            terminate(session, answer, actions);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{
        CallerReference, CodeExtractionResponse, DocumentChunk, GenerationResponse,
        ReasoningResponse, SearchResponse,
    };
    use crate::swarm::emitter::Outcome;
    use std::time::Duration;

    fn fanning_out(settings: &StageSettings) -> (Session, Vec<Action>) {
        let mut s = Session::new(
            "How do I use Chainlink VRF?",
            "alice",
            CallerReference::new("agent1q"),
            Duration::from_secs(45),
        );
        let id = s.correlation_id;
        s.record(
            CollaboratorKind::Search,
            PartialResult::Search(SearchResponse {
                correlation_id: id,
                chunks: vec![DocumentChunk {
                    content: "requestRandomWords()".to_string(),
                    project_name: "Chainlink".to_string(),
                    score: 0.9,
                    file_path: "vrf.md".to_string(),
                    project_id: "cl".to_string(),
                }],
                total_results: 1,
                projects_searched: vec!["cl".to_string()],
            }),
        );
        s.advance_to(SessionStage::Routing).unwrap();
        s.advance_to(SessionStage::Searching).unwrap();
        s.advance_to(SessionStage::FanningOut).unwrap();
        let mut actions = Vec::new();
        dispatch(&mut s, settings, &mut actions);
        (s, actions)
    }

    fn generation(s: &Session) -> PartialResult {
        PartialResult::Generation(GenerationResponse {
            correlation_id: s.correlation_id,
            answer_text: "Call requestRandomWords.".to_string(),
            sources_used: vec!["Chainlink".to_string()],
            token_count: 1200,
        })
    }

    fn synthesis_requests(actions: &[Action]) -> Vec<&SynthesisRequest> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Dispatch(Outbound::Synthesis(req)) => Some(req),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_generation_alone_waits_for_optionals() {
        let (mut s, _) = fanning_out(&StageSettings::default());
        let mut actions = Vec::new();
        let g = generation(&s);
        record(&mut s, CollaboratorKind::Generation, g, &mut actions);

        assert_eq!(join_state(&s), JoinState::Waiting);
        assert!(synthesis_requests(&actions).is_empty());
        assert_eq!(s.stage(), SessionStage::FanningOut);
    }

    #[test]
    fn test_late_optional_result_is_kept() {
        let (mut s, _) = fanning_out(&StageSettings::default());
        let id = s.correlation_id;
        let mut actions = Vec::new();

        let g = generation(&s);
        record(&mut s, CollaboratorKind::Generation, g, &mut actions);
        record(
            &mut s,
            CollaboratorKind::Reasoning,
            PartialResult::Reasoning(ReasoningResponse {
                correlation_id: id,
                dependencies: vec!["LINK".to_string()],
                execution_order: vec![],
                conflicts: vec![],
                prerequisites: vec![],
                confidence: 0.7,
            }),
            &mut actions,
        );
        assert!(synthesis_requests(&actions).is_empty());

        record(
            &mut s,
            CollaboratorKind::CodeExtraction,
            PartialResult::CodeExtraction(CodeExtractionResponse {
                correlation_id: id,
                examples: vec![],
            }),
            &mut actions,
        );

        let requests = synthesis_requests(&actions);
        assert_eq!(requests.len(), 1);
        assert!(requests[0].reasoning_result.is_some());
        assert!(requests[0].codegen_result.is_some());
        assert_eq!(s.stage(), SessionStage::Synthesizing);
    }

    #[test]
    fn test_expiry_joins_with_generation() {
        let (mut s, _) = fanning_out(&StageSettings::default());
        let mut actions = Vec::new();
        let g = generation(&s);
        record(&mut s, CollaboratorKind::Generation, g, &mut actions);

        expire(&mut s, &mut actions);

        let requests = synthesis_requests(&actions);
        assert_eq!(requests.len(), 1);
        assert!(requests[0].reasoning_result.is_none());
        assert!(requests[0].codegen_result.is_none());
        assert!(s.reasoning().is_none());
        assert!(s.is_resolved(CollaboratorKind::Reasoning));

        // Second expiry is a no-op
        let mut again = Vec::new();
        expire(&mut s, &mut again);
        assert!(again.is_empty());
    }

    #[test]
    fn test_expiry_without_generation_answers_from_search() {
        let (mut s, _) = fanning_out(&StageSettings::default());
        let mut actions = Vec::new();
        expire(&mut s, &mut actions);

        assert!(synthesis_requests(&actions).is_empty());
        let answer = actions.iter().find_map(|a| match a {
            Action::Emit(answer) => Some(answer),
            _ => None,
        });
        let answer = answer.unwrap();
        assert_eq!(answer.outcome, Outcome::Degraded);
        assert!(answer.sections.contains_key("excerpts"));
        assert_eq!(s.stage(), SessionStage::Terminated);
    }

    #[test]
    fn test_disabled_optionals_do_not_block_join() {
        let settings = StageSettings {
            reasoning_enabled: false,
            codegen_enabled: false,
            ..Default::default()
        };
        let (mut s, dispatched) = fanning_out(&settings);
        assert_eq!(
            dispatched
                .iter()
                .filter(|a| matches!(a, Action::Dispatch(_)))
                .count(),
            1
        );

        let mut actions = Vec::new();
        let g = generation(&s);
        record(&mut s, CollaboratorKind::Generation, g, &mut actions);
        assert_eq!(synthesis_requests(&actions).len(), 1);
    }

    #[test]
    fn test_generation_error_waits_then_degrades() {
        let (mut s, _) = fanning_out(&StageSettings::default());
        let mut actions = Vec::new();
        record(
            &mut s,
            CollaboratorKind::Generation,
            PartialResult::Unavailable {
                reason: "429".to_string(),
            },
            &mut actions,
        );
        assert_eq!(join_state(&s), JoinState::Waiting);

        mark_pending_unavailable(&mut s, "gone");
        assert_eq!(join_state(&s), JoinState::SearchOnly);
    }
}
