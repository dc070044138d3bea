//! Question intake and out-of-band collaborator replies.

use axum::{extract::State, http::StatusCode, Json};
use conduit_core::memory::CLEARED_MESSAGE;
use conduit_core::swarm::{AskOutcome, TerminalAnswer};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::ApiFailure;
use crate::SharedState;

/// Grace period on top of the session deadline before the HTTP wait gives up
const WAIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    #[serde(default = "default_user")]
    pub user: String,
    pub query: String,
}

fn default_user() -> String {
    "anonymous".to_string()
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AskReply {
    Answer(TerminalAnswer),
    Cleared {
        outcome: &'static str,
        markdown: &'static str,
    },
}

/// Ask a question and wait for its terminal answer
pub async fn ask(
    State(state): State<SharedState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskReply>, ApiFailure> {
    let (reference, rx) = state.register().await;

    let outcome = match state.coordinator.ask(&req.user, &req.query, reference.clone()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            state.forget(&reference).await;
            return Err(e.into());
        }
    };

    let id = match outcome {
        AskOutcome::Cleared => {
            state.forget(&reference).await;
            return Ok(Json(AskReply::Cleared {
                outcome: "cleared",
                markdown: CLEARED_MESSAGE,
            }));
        }
        AskOutcome::Started(id) => id,
    };

    let wait = state.coordinator.config().session_timeout() + WAIT_GRACE;
    match tokio::time::timeout(wait, rx).await {
        Ok(Ok(answer)) => Ok(Json(AskReply::Answer(answer))),
        Ok(Err(_)) => Err(ApiFailure::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "answer channel closed",
        )),
        Err(_) => {
            state.forget(&reference).await;
            tracing::error!(correlation_id = %id, "No terminal answer within {:?}", wait);
            Err(ApiFailure::new(
                StatusCode::GATEWAY_TIMEOUT,
                format!("no answer for session {id}"),
            ))
        }
    }
}

/// Accept a versioned collaborator reply delivered out of band
pub async fn inbound(
    State(state): State<SharedState>,
    body: String,
) -> Result<StatusCode, ApiFailure> {
    state.coordinator.deliver_raw(&body).await?;
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::offline_state;
    use axum::response::IntoResponse;
    use conduit_core::contracts::{encode_inbound, CorrelationId, GenerationResponse, Inbound};
    use conduit_core::swarm::Outcome;

    fn request(user: &str, query: &str) -> Json<AskRequest> {
        Json(AskRequest {
            user: user.to_string(),
            query: query.to_string(),
        })
    }

    #[test]
    fn test_ask_request_defaults_user() {
        let req: AskRequest =
            serde_json::from_str(r#"{"query":"How do I use Chainlink VRF?"}"#).unwrap();
        assert_eq!(req.user, "anonymous");
    }

    #[test]
    fn test_cleared_reply_shape() {
        let json = serde_json::to_value(AskReply::Cleared {
            outcome: "cleared",
            markdown: CLEARED_MESSAGE,
        })
        .unwrap();
        assert_eq!(json["outcome"], "cleared");
        assert_eq!(json["markdown"], CLEARED_MESSAGE);
    }

    #[tokio::test]
    async fn test_ask_control_command_clears_without_session() {
        let state = offline_state();
        let Json(reply) = ask(State(state.clone()), request("alice", "/reset"))
            .await
            .unwrap();

        assert!(matches!(reply, AskReply::Cleared { outcome: "cleared", .. }));
        assert!(state.coordinator.sessions().is_empty());
        assert!(state.pending.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_ask_empty_query_is_bad_request() {
        let state = offline_state();
        let err = ask(State(state.clone()), request("alice", "   "))
            .await
            .unwrap_err();

        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        assert!(state.pending.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_ask_returns_apology_when_router_unreachable() {
        let state = offline_state();
        let Json(reply) = ask(State(state.clone()), request("alice", "How do I use Chainlink VRF?"))
            .await
            .unwrap();

        let AskReply::Answer(answer) = reply else {
            panic!("expected a terminal answer");
        };
        assert_eq!(answer.outcome, Outcome::Failed);
        assert!(answer.agents_used.is_empty());
        assert!(state.coordinator.sessions().is_empty());
        assert!(state.pending.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_inbound_malformed_body_is_bad_request() {
        let state = offline_state();
        let err = inbound(State(state), "{not json".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_inbound_well_formed_reply_is_accepted() {
        let state = offline_state();
        let raw = encode_inbound(&Inbound::Generation(GenerationResponse {
            correlation_id: CorrelationId::new(),
            answer_text: "late".to_string(),
            sources_used: vec![],
            token_count: 1,
        }))
        .unwrap();

        let status = inbound(State(state), raw).await.unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
    }
}
