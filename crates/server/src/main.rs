//! Conduit Server
//!
//! Axum server in front of the Conduit coordinator. Each `POST /api/v1/ask`
//! starts one session and waits for its single terminal answer.

mod api;

use clap::{Parser, Subcommand};
use conduit_core::collaborators::{
    CatalogRouter, CodeExtractor, DocsSearch, HttpCollaborator, LlmGenerator, MarkdownSynthesizer,
};
use conduit_core::config::{CoordinatorConfig, CONFIG_PATH};
use conduit_core::contracts::{CallerReference, CollaboratorKind};
use conduit_core::memory::CLEARED_MESSAGE;
use conduit_core::swarm::{
    AskOutcome, Coordinator, CoordinatorHandle, SwarmEvent, TerminalAnswer,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tracing_subscriber::EnvFilter;

/// Catalog and docs API used when no endpoint is configured
const DEFAULT_API_BASE: &str = "https://agent-eth-global.vercel.app/api";

/// Application state
pub struct AppState {
    pub coordinator: CoordinatorHandle,
    pub event_tx: broadcast::Sender<SwarmEvent>,
    /// Callers waiting on a terminal answer: caller reference -> oneshot sender
    pending: RwLock<HashMap<CallerReference, oneshot::Sender<TerminalAnswer>>>,
    next_caller: AtomicU64,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(coordinator: CoordinatorHandle, event_tx: broadcast::Sender<SwarmEvent>) -> Self {
        Self {
            coordinator,
            event_tx,
            pending: RwLock::new(HashMap::new()),
            next_caller: AtomicU64::new(0),
        }
    }

    /// Register a waiter and return its unique reply address
    pub async fn register(&self) -> (CallerReference, oneshot::Receiver<TerminalAnswer>) {
        let n = self.next_caller.fetch_add(1, Ordering::Relaxed);
        let reference = CallerReference::new(format!("http-{n}"));
        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(reference.clone(), tx);
        (reference, rx)
    }

    pub async fn forget(&self, reference: &CallerReference) {
        self.pending.write().await.remove(reference);
    }

    async fn resolve(&self, answer: TerminalAnswer) {
        match self.pending.write().await.remove(&answer.caller_reference) {
            Some(tx) => {
                if tx.send(answer).is_err() {
                    tracing::debug!("Caller went away before its answer arrived");
                }
            }
            None => tracing::warn!(
                caller = %answer.caller_reference,
                correlation_id = %answer.correlation_id,
                "Terminal answer for unknown caller"
            ),
        }
    }
}

#[derive(Parser, Clone)]
#[command(author, version, about = "Conduit - multi-agent documentation assistant")]
struct Args {
    /// Config file (JSON)
    #[arg(long, global = true, default_value = CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Conduit server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Ask one question and print the answer (no server)
    Ask {
        /// The question
        query: String,
        /// Conversation owner
        #[arg(short, long, default_value = "cli")]
        user: String,
    },
}

/// Wire every collaborator named in `config` into a running coordinator
fn build_coordinator(
    config: CoordinatorConfig,
    event_tx: broadcast::Sender<SwarmEvent>,
    outbox: mpsc::Sender<TerminalAnswer>,
) -> anyhow::Result<CoordinatorHandle> {
    let endpoints = config.endpoints.clone();
    let routing_base = endpoints.routing.as_deref().unwrap_or(DEFAULT_API_BASE);
    let search_base = endpoints.search.as_deref().unwrap_or(DEFAULT_API_BASE);

    if endpoints.generation_api_key.is_none() {
        tracing::warn!(
            "CONDUIT_LLM_API_KEY not set; answers will fall back to documentation excerpts"
        );
    }

    let mut builder = Coordinator::new(config.clone())
        .with_event_channel(event_tx)
        .with_outbox(outbox)
        .with_routing(CatalogRouter::new(routing_base)?)
        .with_search(DocsSearch::new(search_base)?)
        .with_generation(LlmGenerator::from_config(&config)?)
        .with_synthesis(MarkdownSynthesizer::new());

    if config.enable_reasoning {
        match &endpoints.reasoning {
            Some(url) => {
                builder = builder.with_reasoning(HttpCollaborator::new(
                    CollaboratorKind::Reasoning,
                    url.clone(),
                )?);
            }
            None => tracing::info!("No reasoning endpoint configured, reasoning disabled"),
        }
    }

    if config.enable_codegen {
        builder = match &endpoints.codegen {
            Some(url) => builder.with_codegen(HttpCollaborator::new(
                CollaboratorKind::CodeExtraction,
                url.clone(),
            )?),
            None => builder.with_codegen(CodeExtractor::new()),
        };
    }

    Ok(builder.start()?)
}

/// Hand each terminal answer from the outbox to whoever is waiting on it
fn forward_answers(state: SharedState, mut outbox_rx: mpsc::Receiver<TerminalAnswer>) {
    tokio::spawn(async move {
        while let Some(answer) = outbox_rx.recv().await {
            state.resolve(answer).await;
        }
    });
}

async fn load_config(path: &str) -> anyhow::Result<CoordinatorConfig> {
    let mut config = CoordinatorConfig::load(path).await?;
    config.apply_env();
    config.validate()?;
    Ok(config)
}

async fn run_server(config: CoordinatorConfig, port: u16) -> anyhow::Result<()> {
    let (event_tx, _) = broadcast::channel(1024);
    let (outbox_tx, outbox_rx) = mpsc::channel(config.channel_capacity);
    let coordinator = build_coordinator(config, event_tx.clone(), outbox_tx)?;

    let state: SharedState = Arc::new(AppState::new(coordinator, event_tx));
    forward_answers(state.clone(), outbox_rx);

    let app = api::routes().with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("Conduit server running at http://{}", addr);
    tracing::info!("   Ask:      POST /api/v1/ask");
    tracing::info!("   Inbound:  POST /api/v1/inbound");
    tracing::info!("   Sessions: GET  /api/v1/sessions");
    tracing::info!("   Events:   GET  /api/v1/events (SSE)");
    tracing::info!("   Config:   GET  /api/v1/config");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_ask(config: CoordinatorConfig, user: &str, query: &str) -> anyhow::Result<()> {
    let (event_tx, _) = broadcast::channel(64);
    let (outbox_tx, mut outbox_rx) = mpsc::channel(1);
    let deadline = config.session_timeout() + std::time::Duration::from_secs(5);
    let coordinator = build_coordinator(config, event_tx, outbox_tx)?;

    match coordinator
        .ask(user, query, CallerReference::new(format!("cli:{user}")))
        .await?
    {
        AskOutcome::Cleared => println!("{CLEARED_MESSAGE}"),
        AskOutcome::Started(id) => {
            tracing::debug!(correlation_id = %id, "Waiting for answer");
            let answer = tokio::time::timeout(deadline, outbox_rx.recv())
                .await
                .map_err(|_| anyhow::anyhow!("no answer within {:?}", deadline))?
                .ok_or_else(|| anyhow::anyhow!("coordinator stopped"))?;
            println!("{}", answer.markdown);
            if !answer.agents_used.is_empty() {
                eprintln!("\n[agents: {}]", answer.agents_used.join(", "));
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args.config).await?;

    match args.command {
        Some(CliCommand::Ask { query, user }) => run_ask(config, &user, &query).await,
        Some(CliCommand::Serve { port }) => run_server(config, port).await,
        None => run_server(config, 8080).await,
    }
}
