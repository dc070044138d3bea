//! Observability endpoints: live sessions, swarm events, configuration.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use conduit_core::config::CoordinatorConfig;
use conduit_core::contracts::CorrelationId;
use conduit_core::state::SessionSummary;
use conduit_core::CoordinatorError;
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use super::ApiFailure;
use crate::SharedState;

const HEARTBEAT: Duration = Duration::from_secs(15);

pub async fn list_sessions(State(state): State<SharedState>) -> Json<Vec<SessionSummary>> {
    Json(state.coordinator.sessions())
}

pub async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSummary>, ApiFailure> {
    let id: CorrelationId = id.parse().map_err(|e: CoordinatorError| {
        ApiFailure::new(StatusCode::BAD_REQUEST, e.to_string())
    })?;
    Ok(Json(state.coordinator.session(&id)?))
}

pub async fn get_config(State(state): State<SharedState>) -> Json<CoordinatorConfig> {
    Json(state.coordinator.config().clone())
}

/// SSE endpoint for swarm events with heartbeat
pub async fn events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match tokio::time::timeout(HEARTBEAT, rx.recv()).await {
                Ok(Ok(event)) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    return Some((Ok(Event::default().event("swarm").data(json)), rx));
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "SSE subscriber lagged");
                    continue;
                }
                Ok(Err(RecvError::Closed)) => return None,
                Err(_) => return Some((Ok(Event::default().comment("heartbeat")), rx)),
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
