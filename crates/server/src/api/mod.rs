//! # HTTP API
//!
//! `/api/v1` routes. The ask endpoint is the caller-facing surface; the rest
//! expose live sessions, swarm events and the effective configuration.

mod ask;
mod sessions;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use conduit_core::CoordinatorError;
use serde::Serialize;

use crate::SharedState;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/v1/ask", post(ask::ask))
        .route("/api/v1/inbound", post(ask::inbound))
        .route("/api/v1/sessions", get(sessions::list_sessions))
        .route("/api/v1/sessions/:id", get(sessions::get_session))
        .route("/api/v1/events", get(sessions::events))
        .route("/api/v1/config", get(sessions::get_config))
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

/// Error mapped to an HTTP status
#[derive(Debug)]
pub struct ApiFailure(StatusCode, String);

impl ApiFailure {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self(status, message.into())
    }
}

impl From<CoordinatorError> for ApiFailure {
    fn from(err: CoordinatorError) -> Self {
        let status = match &err {
            CoordinatorError::Contract(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::UnknownSession(_) => StatusCode::NOT_FOUND,
            CoordinatorError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self(status, err.to_string())
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (self.0, Json(ApiError { error: self.1 })).into_response()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{build_coordinator, forward_answers, AppState, SharedState};
    use conduit_core::config::CoordinatorConfig;
    use std::sync::Arc;
    use tokio::sync::{broadcast, mpsc};

    /// Nothing listens here, so every remote collaborator call is refused
    pub const REFUSED: &str = "http://127.0.0.1:9";

    /// Server state wired exactly as `serve` wires it, against refused endpoints
    pub fn offline_state() -> SharedState {
        let mut config = CoordinatorConfig::default();
        config.endpoints.routing = Some(REFUSED.to_string());
        config.endpoints.search = Some(REFUSED.to_string());
        config.endpoints.generation_base_url = Some(REFUSED.to_string());

        let (event_tx, _) = broadcast::channel(64);
        let (outbox_tx, outbox_rx) = mpsc::channel(8);
        let coordinator = build_coordinator(config, event_tx.clone(), outbox_tx).unwrap();
        let state: SharedState = Arc::new(AppState::new(coordinator, event_tx));
        forward_answers(state.clone(), outbox_rx);
        state
    }
}
