//! # A2A Bridge
//!
//! Collaborator proxies. Each collaborator runs behind its own task with a
//! bounded request queue; replies never come back to the sender. They re-enter
//! the coordinator as independent events keyed by correlation id.
//!
//! ## Architecture
//!
//! ```text
//! Coordinator                      Collaborator Task
//!     │                                   │
//!     ├── Outbound (bounded mpsc) ──────▶ │
//!     │                                   ├── call service (one task per request)
//!     │                                   │
//!     │ ◀── CoordinatorEvent::Response ───┘   typed response or ErrorEnvelope
//! ```

use crate::contracts::{
    CodeExtractionRequest, CollaboratorKind, Correlated, ErrorEnvelope, GenerationRequest,
    Inbound, IntoInbound, Outbound, ReasoningRequest, RoutingRequest, SearchRequest,
    SynthesisRequest,
};
use crate::error::{CoordinatorError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

use super::coordinator::CoordinatorEvent;

/// An external service reachable through one typed request/response contract
#[async_trait]
pub trait Collaborator: Send + Sync + 'static {
    type Request: Correlated + Send + 'static;
    type Response: IntoInbound + Send + 'static;

    fn kind(&self) -> CollaboratorKind;

    /// Perform one exchange. Errors become an [`ErrorEnvelope`].
    async fn call(&self, request: Self::Request) -> anyhow::Result<Self::Response>;
}

/// Sending side of one collaborator's queue
pub struct Proxy<Req> {
    kind: CollaboratorKind,
    tx: mpsc::Sender<Req>,
}

impl<Req> Clone for Proxy<Req> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            tx: self.tx.clone(),
        }
    }
}

impl<Req: Send + 'static> Proxy<Req> {
    /// Suspends until the queue accepts the request
    pub async fn send(&self, request: Req) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| CoordinatorError::Transport(format!("{} proxy is closed", self.kind)))
    }

    pub fn kind(&self) -> CollaboratorKind {
        self.kind
    }
}

/// Spawn a collaborator behind a bounded queue.
///
/// At most `capacity` requests wait in the queue and at most `capacity`
/// calls run at once.
pub fn spawn_collaborator<C: Collaborator>(
    collaborator: C,
    capacity: usize,
    events_tx: mpsc::Sender<CoordinatorEvent>,
) -> Proxy<C::Request> {
    let kind = collaborator.kind();
    let collaborator = Arc::new(collaborator);
    let semaphore = Arc::new(Semaphore::new(capacity.max(1)));
    let (tx, mut rx) = mpsc::channel::<C::Request>(capacity.max(1));

    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let collaborator = collaborator.clone();
            let events_tx = events_tx.clone();

            tokio::spawn(async move {
                let _permit = permit;
                let correlation_id = request.correlation_id();
                let inbound = match collaborator.call(request).await {
                    Ok(response) => response.into_inbound(),
                    Err(e) => {
                        tracing::warn!(
                            %correlation_id,
                            collaborator = %kind,
                            error = %e,
                            "Collaborator call failed"
                        );
                        Inbound::Error(ErrorEnvelope {
                            correlation_id,
                            collaborator: kind,
                            message: format!("{e:#}"),
                        })
                    }
                };
                if events_tx.send(CoordinatorEvent::Response(inbound)).await.is_err() {
                    tracing::debug!(
                        %correlation_id,
                        collaborator = %kind,
                        "Coordinator gone, reply dropped"
                    );
                }
            });
        }
        tracing::debug!(collaborator = %kind, "Proxy queue closed");
    });

    Proxy { kind, tx }
}

/// One proxy per collaborator. Reasoning and code extraction are optional.
#[derive(Clone, Default)]
pub struct Proxies {
    pub routing: Option<Proxy<RoutingRequest>>,
    pub search: Option<Proxy<SearchRequest>>,
    pub reasoning: Option<Proxy<ReasoningRequest>>,
    pub generation: Option<Proxy<GenerationRequest>>,
    pub codegen: Option<Proxy<CodeExtractionRequest>>,
    pub synthesis: Option<Proxy<SynthesisRequest>>,
}

impl Proxies {
    pub fn has(&self, kind: CollaboratorKind) -> bool {
        match kind {
            CollaboratorKind::Routing => self.routing.is_some(),
            CollaboratorKind::Search => self.search.is_some(),
            CollaboratorKind::Reasoning => self.reasoning.is_some(),
            CollaboratorKind::Generation => self.generation.is_some(),
            CollaboratorKind::CodeExtraction => self.codegen.is_some(),
            CollaboratorKind::Synthesis => self.synthesis.is_some(),
        }
    }

    /// Hand `outbound` to the matching proxy
    pub async fn send(&self, outbound: Outbound) -> Result<()> {
        let kind = outbound.collaborator();
        let missing = || CoordinatorError::Collaborator {
            kind,
            message: "no proxy configured".to_string(),
        };
        match outbound {
            Outbound::Routing(r) => self.routing.as_ref().ok_or_else(missing)?.send(r).await,
            Outbound::Search(r) => self.search.as_ref().ok_or_else(missing)?.send(r).await,
            Outbound::Reasoning(r) => self.reasoning.as_ref().ok_or_else(missing)?.send(r).await,
            Outbound::Generation(r) => self.generation.as_ref().ok_or_else(missing)?.send(r).await,
            Outbound::CodeExtraction(r) => self.codegen.as_ref().ok_or_else(missing)?.send(r).await,
            Outbound::Synthesis(r) => self.synthesis.as_ref().ok_or_else(missing)?.send(r).await,
        }
    }
}
