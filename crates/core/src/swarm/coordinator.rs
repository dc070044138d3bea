//! # Swarm Coordinator
//!
//! Event-driven dispatcher that owns every in-flight session.
//!
//! Inbound collaborator replies and timer expirations arrive as discrete
//! [`CoordinatorEvent`]s on one queue. Each event is handled in its own task:
//! the session is looked up by correlation id, [`pipeline::advance`] runs under
//! that session's lock, and the resulting actions (dispatches, timers, the
//! terminal answer) are carried out after the lock is released.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use crate::config::CoordinatorConfig;
use crate::contracts::{
    decode_inbound, CallerReference, CodeExtractionRequest, CodeExtractionResponse,
    CollaboratorKind, Correlated, CorrelationId, ErrorEnvelope, GenerationRequest,
    GenerationResponse, Inbound, ReasoningRequest, ReasoningResponse, RoutingRequest,
    RoutingResponse, SearchRequest, SearchResponse, SynthesisRequest, SynthesisResponse,
};
use crate::error::{CoordinatorError, Result};
use crate::memory::{is_control_command, ConversationMemory};
use crate::state::{Session, SessionRegistry, SessionSummary};

use super::a2a_bridge::{spawn_collaborator, Collaborator, Proxies};
use super::emitter::{ResultEmitter, TerminalAnswer};
use super::events::{EventBus, SwarmEvent, SwarmEventKind};
use super::pipeline::{self, Action, SessionEvent, StageSettings};

/// Inputs to the dispatcher
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// A collaborator reply (or its error envelope)
    Response(Inbound),
    FanOutExpired(CorrelationId),
    DeadlineExpired(CorrelationId),
}

/// What happened to an incoming question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskOutcome {
    /// Control input; the user's conversation memory was reset
    Cleared,
    /// A session is in flight; its answer will reach the outbox
    Started(CorrelationId),
}

/// The swarm coordinator (builder)
pub struct Coordinator {
    config: CoordinatorConfig,
    proxies: Proxies,
    events_tx: mpsc::Sender<CoordinatorEvent>,
    events_rx: mpsc::Receiver<CoordinatorEvent>,
    outbox: Option<mpsc::Sender<TerminalAnswer>>,
    event_bus: EventBus,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity.max(1));
        Self {
            config,
            proxies: Proxies::default(),
            events_tx,
            events_rx,
            outbox: None,
            event_bus: EventBus::default(),
        }
    }

    /// Set event channel for streaming swarm events
    pub fn with_event_channel(mut self, tx: broadcast::Sender<SwarmEvent>) -> Self {
        self.event_bus = EventBus::new(tx);
        self
    }

    /// Where terminal answers are delivered
    pub fn with_outbox(mut self, tx: mpsc::Sender<TerminalAnswer>) -> Self {
        self.outbox = Some(tx);
        self
    }

    pub fn with_routing<C>(mut self, collaborator: C) -> Self
    where
        C: Collaborator<Request = RoutingRequest, Response = RoutingResponse>,
    {
        self.proxies.routing = Some(self.spawn(collaborator));
        self
    }

    pub fn with_search<C>(mut self, collaborator: C) -> Self
    where
        C: Collaborator<Request = SearchRequest, Response = SearchResponse>,
    {
        self.proxies.search = Some(self.spawn(collaborator));
        self
    }

    pub fn with_reasoning<C>(mut self, collaborator: C) -> Self
    where
        C: Collaborator<Request = ReasoningRequest, Response = ReasoningResponse>,
    {
        self.proxies.reasoning = Some(self.spawn(collaborator));
        self
    }

    pub fn with_generation<C>(mut self, collaborator: C) -> Self
    where
        C: Collaborator<Request = GenerationRequest, Response = GenerationResponse>,
    {
        self.proxies.generation = Some(self.spawn(collaborator));
        self
    }

    pub fn with_codegen<C>(mut self, collaborator: C) -> Self
    where
        C: Collaborator<Request = CodeExtractionRequest, Response = CodeExtractionResponse>,
    {
        self.proxies.codegen = Some(self.spawn(collaborator));
        self
    }

    pub fn with_synthesis<C>(mut self, collaborator: C) -> Self
    where
        C: Collaborator<Request = SynthesisRequest, Response = SynthesisResponse>,
    {
        self.proxies.synthesis = Some(self.spawn(collaborator));
        self
    }

    fn spawn<C: Collaborator>(&self, collaborator: C) -> super::a2a_bridge::Proxy<C::Request> {
        spawn_collaborator(
            collaborator,
            self.config.channel_capacity,
            self.events_tx.clone(),
        )
    }

    /// Validate the wiring and start the dispatcher
    pub fn start(self) -> Result<CoordinatorHandle> {
        self.config.validate()?;

        for kind in [
            CollaboratorKind::Routing,
            CollaboratorKind::Search,
            CollaboratorKind::Generation,
            CollaboratorKind::Synthesis,
        ] {
            if !self.proxies.has(kind) {
                return Err(CoordinatorError::config(format!(
                    "no {kind} collaborator configured"
                )));
            }
        }
        let outbox = self
            .outbox
            .ok_or_else(|| CoordinatorError::config("no outbox configured"))?;

        let mut settings = StageSettings::from_config(&self.config);
        settings.reasoning_enabled &= self.proxies.has(CollaboratorKind::Reasoning);
        settings.codegen_enabled &= self.proxies.has(CollaboratorKind::CodeExtraction);

        let registry = Arc::new(SessionRegistry::new());
        let memory = Arc::new(
            ConversationMemory::new(self.config.max_history_messages)
                .with_idle_timeout(self.config.history_idle_timeout()),
        );
        let emitter = ResultEmitter::new(
            registry.clone(),
            memory.clone(),
            outbox,
            self.event_bus.clone(),
        );

        tracing::info!(
            reasoning = settings.reasoning_enabled,
            codegen = settings.codegen_enabled,
            fanout_timeout_ms = self.config.fanout_timeout_ms,
            session_timeout_ms = self.config.session_timeout_ms,
            "Coordinator started"
        );

        let inner = Arc::new(Inner {
            config: self.config,
            settings,
            registry,
            memory,
            proxies: self.proxies,
            emitter,
            events_tx: self.events_tx,
            bus: self.event_bus,
        });

        let dispatcher = inner.clone();
        let mut events_rx = self.events_rx;
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let inner = dispatcher.clone();
                tokio::spawn(async move { inner.handle(event).await });
            }
        });

        Ok(CoordinatorHandle { inner })
    }
}

struct Inner {
    config: CoordinatorConfig,
    settings: StageSettings,
    registry: Arc<SessionRegistry>,
    memory: Arc<ConversationMemory>,
    proxies: Proxies,
    emitter: ResultEmitter,
    events_tx: mpsc::Sender<CoordinatorEvent>,
    bus: EventBus,
}

impl Inner {
    async fn handle(&self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Response(inbound) => {
                let id = inbound.correlation_id();
                let kind = inbound.collaborator();
                if !self.apply(id, SessionEvent::Response(inbound)).await {
                    tracing::info!(
                        correlation_id = %id,
                        collaborator = %kind,
                        "No live session for response, dropped"
                    );
                    self.bus.emit(
                        SwarmEvent::new(SwarmEventKind::ResponseDropped, id)
                            .with_collaborator(kind)
                            .with_data(serde_json::json!({ "reason": "unknown_session" })),
                    );
                }
            }
            CoordinatorEvent::FanOutExpired(id) => {
                self.apply(id, SessionEvent::FanOutExpired).await;
            }
            CoordinatorEvent::DeadlineExpired(id) => {
                self.apply(id, SessionEvent::DeadlineExpired).await;
            }
        }
    }

    /// Run one transition atomically, then act on it. False if no live session.
    async fn apply(&self, id: CorrelationId, event: SessionEvent) -> bool {
        let settings = &self.settings;
        match self
            .registry
            .update(&id, |session| pipeline::advance(session, event, settings))
        {
            Some(actions) => {
                self.execute(id, actions).await;
                true
            }
            None => false,
        }
    }

    async fn execute(&self, id: CorrelationId, actions: Vec<Action>) {
        let mut sends = JoinSet::new();

        for action in actions {
            match action {
                Action::Notify(event) => self.bus.emit(event),
                Action::ArmFanOutTimer => {
                    self.arm_timer(
                        id,
                        self.config.fanout_timeout(),
                        CoordinatorEvent::FanOutExpired(id),
                    );
                }
                Action::Emit(answer) => self.emitter.deliver(answer).await,
                Action::Dispatch(outbound) => {
                    let kind = outbound.collaborator();
                    tracing::debug!(
                        correlation_id = %id,
                        collaborator = %kind,
                        "Dispatching request"
                    );
                    self.bus.emit(
                        SwarmEvent::new(SwarmEventKind::RequestDispatched, id)
                            .with_collaborator(kind),
                    );

                    let proxies = self.proxies.clone();
                    let events_tx = self.events_tx.clone();
                    sends.spawn(async move {
                        if let Err(e) = proxies.send(outbound).await {
                            tracing::warn!(
                                correlation_id = %id,
                                collaborator = %kind,
                                error = %e,
                                "Dispatch failed"
                            );
                            let envelope = Inbound::Error(ErrorEnvelope {
                                correlation_id: id,
                                collaborator: kind,
                                message: e.to_string(),
                            });
                            let _ = events_tx.send(CoordinatorEvent::Response(envelope)).await;
                        }
                    });
                }
            }
        }

        while let Some(result) = sends.join_next().await {
            if let Err(e) = result {
                tracing::error!(correlation_id = %id, "Dispatch task panicked: {}", e);
            }
        }
    }

    fn arm_timer(&self, id: CorrelationId, delay: Duration, event: CoordinatorEvent) {
        let events_tx = self.events_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events_tx.send(event).await;
        });
        let abort = timer.abort_handle();
        if self
            .registry
            .update(&id, |session| session.add_timer(abort))
            .is_none()
        {
            timer.abort();
        }
    }
}

/// Cheap, cloneable entry point to a running coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    inner: Arc<Inner>,
}

impl CoordinatorHandle {
    /// Start a session for `query`, or handle a control input
    #[tracing::instrument(
        skip(self, query, reply_to),
        fields(query_preview = %query.chars().take(50).collect::<String>())
    )]
    pub async fn ask(
        &self,
        user: &str,
        query: &str,
        reply_to: CallerReference,
    ) -> Result<AskOutcome> {
        let query = query.trim();
        if is_control_command(query) {
            self.inner.memory.clear(user);
            return Ok(AskOutcome::Cleared);
        }
        if query.is_empty() {
            return Err(CoordinatorError::Contract("empty query".to_string()));
        }

        let session = Session::new(query, user, reply_to, self.inner.config.session_timeout())
            .with_history(self.inner.memory.history(user));
        let id = self.inner.registry.insert(session);
        tracing::info!(correlation_id = %id, "Starting multi-agent flow");

        self.inner.arm_timer(
            id,
            self.inner.config.session_timeout(),
            CoordinatorEvent::DeadlineExpired(id),
        );
        self.inner.apply(id, SessionEvent::Start).await;
        Ok(AskOutcome::Started(id))
    }

    /// Feed a collaborator reply that arrived out of band
    pub async fn deliver(&self, inbound: Inbound) -> Result<()> {
        self.inner
            .events_tx
            .send(CoordinatorEvent::Response(inbound))
            .await
            .map_err(|_| CoordinatorError::Transport("coordinator stopped".to_string()))
    }

    /// Decode and feed a raw versioned reply
    pub async fn deliver_raw(&self, raw: &str) -> Result<()> {
        let inbound = decode_inbound(raw).map_err(|e| {
            tracing::warn!(error = %e, "Discarding unattributable payload");
            e
        })?;
        self.deliver(inbound).await
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.inner.registry.snapshot()
    }

    pub fn session(&self, id: &CorrelationId) -> Result<SessionSummary> {
        self.inner
            .registry
            .get(id)
            .map(|s| s.summary())
            .ok_or(CoordinatorError::UnknownSession(*id))
    }

    pub fn subscribe(&self) -> Option<broadcast::Receiver<SwarmEvent>> {
        self.inner.bus.subscribe()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn settings(&self) -> &StageSettings {
        &self.inner.settings
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.inner.memory
    }
}
