//! # Result Emitter
//!
//! Builds the single terminal answer for a session and hands it to the caller.
//!
//! The answer is sealed on the session inside the same registry update that
//! moves it to `Terminated` (see [`Session::seal`]); only the update that wins
//! the seal gets a [`TerminalAnswer`] back, so [`ResultEmitter::deliver`] runs
//! at most once per session.

use crate::contracts::{
    CallerReference, CodeExtractionResponse, CollaboratorKind, CorrelationId, GenerationResponse,
    ReasoningResponse, SearchResponse, SynthesisResponse,
};
use crate::memory::ConversationMemory;
use crate::state::{Session, SessionRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::events::{EventBus, SwarmEvent, SwarmEventKind};

pub const NO_DOCUMENTATION_TEXT: &str = "I don't have any documentation indexed yet. \
Index the technologies you're planning to use, then ask again.";

/// Catalog is populated but no project matched the question
pub const NO_MATCH_TEXT: &str = "I couldn't find any relevant documentation for your query. \
Please try rephrasing or ask about a different topic.";

pub const APOLOGY_TEXT: &str =
    "Sorry, I encountered an error processing your query. Please try again.";

pub const TIMEOUT_TEXT: &str =
    "Sorry, your query took too long to process. Please try again.";

pub fn nothing_found_text(query: &str) -> String {
    format!("I couldn't find relevant information about '{query}' in the documentation.")
}

/// Reporting order for `agents_used`
const REPORT_ORDER: [CollaboratorKind; 4] = [
    CollaboratorKind::Search,
    CollaboratorKind::Generation,
    CollaboratorKind::Reasoning,
    CollaboratorKind::CodeExtraction,
];

const EXCERPT_LIMIT: usize = 3;
const EXCERPT_CHARS: usize = 600;

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Synthesized from search + generation (+ optional results)
    Answered,
    /// Composed locally from whatever partial results existed
    Degraded,
    /// Empty project catalog
    NoDocumentation,
    /// No catalog project matched the question
    NoMatch,
    NothingFound,
    Failed,
    TimedOut,
}

impl Outcome {
    /// True when the caller got an actual answer to the question
    pub fn is_answer(&self) -> bool {
        matches!(self, Self::Answered | Self::Degraded)
    }
}

/// The one message a caller receives for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalAnswer {
    pub correlation_id: CorrelationId,
    pub caller_reference: CallerReference,
    pub user: String,
    pub query: String,
    pub outcome: Outcome,
    pub markdown: String,
    #[serde(default)]
    pub sections: BTreeMap<String, String>,
    #[serde(default)]
    pub agents_used: Vec<String>,
    #[serde(default)]
    pub unavailable: Vec<String>,
    pub elapsed_ms: u64,
}

impl TerminalAnswer {
    fn base(session: &Session, outcome: Outcome, markdown: String) -> Self {
        Self {
            correlation_id: session.correlation_id,
            caller_reference: session.caller_reference.clone(),
            user: session.user.clone(),
            query: session.query.clone(),
            outcome,
            markdown,
            sections: BTreeMap::new(),
            agents_used: agents_used(session),
            unavailable: unavailable(session),
            elapsed_ms: session.elapsed().as_millis() as u64,
        }
    }

    /// A fixed explanatory message (no documentation, nothing found, apology)
    pub fn fixed(session: &Session, outcome: Outcome, text: impl Into<String>) -> Self {
        Self::base(session, outcome, text.into())
    }

    /// The synthesizer's answer, with participation taken from the session
    pub fn from_synthesis(session: &Session, response: SynthesisResponse) -> Self {
        let mut answer = Self::base(session, Outcome::Answered, response.markdown);
        answer.sections = response.sections;
        answer
    }

    /// Compose locally from the partial results on the session.
    ///
    /// Falls back to the apology if search results never arrived.
    pub fn composed(session: &Session) -> Self {
        let Some(search) = session.search() else {
            return Self::fixed(session, Outcome::Failed, APOLOGY_TEXT);
        };
        let unavailable = unavailable(session);
        let composition = compose(&ComposeInput {
            query: &session.query,
            search,
            generation: session.generation(),
            reasoning: session.reasoning(),
            codegen: session.codegen(),
            unavailable: &unavailable,
        });
        let mut answer = Self::base(session, Outcome::Degraded, composition.markdown);
        answer.sections = composition.sections;
        answer
    }
}

/// Collaborators that contributed a result, in reporting order
pub fn agents_used(session: &Session) -> Vec<String> {
    REPORT_ORDER
        .iter()
        .filter(|k| session.result(**k).map(|r| r.is_available()).unwrap_or(false))
        .map(|k| k.as_str().to_string())
        .collect()
}

/// Fan-out collaborators that were asked but contributed nothing
pub fn unavailable(session: &Session) -> Vec<String> {
    CollaboratorKind::FAN_OUT
        .iter()
        .filter(|k| session.was_dispatched(**k))
        .filter(|k| !session.result(**k).map(|r| r.is_available()).unwrap_or(false))
        .map(|k| k.as_str().to_string())
        .collect()
}

// ===========================
// MARKDOWN COMPOSITION
// ===========================

pub struct ComposeInput<'a> {
    pub query: &'a str,
    pub search: &'a SearchResponse,
    pub generation: Option<&'a GenerationResponse>,
    pub reasoning: Option<&'a ReasoningResponse>,
    pub codegen: Option<&'a CodeExtractionResponse>,
    pub unavailable: &'a [String],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub markdown: String,
    pub sections: BTreeMap<String, String>,
}

/// Render the final answer.
///
/// Section keys: `answer` (or `excerpts` without a generated answer),
/// `reasoning`, `code`, `sources`, `notes`.
pub fn compose(input: &ComposeInput<'_>) -> Composition {
    let mut sections = BTreeMap::new();
    let mut ordered: Vec<(&str, &str)> = Vec::new();

    match input.generation {
        Some(generation) => {
            sections.insert("answer".to_string(), generation.answer_text.trim().to_string());
        }
        None => {
            sections.insert("excerpts".to_string(), render_excerpts(input.search));
        }
    }

    if let Some(reasoning) = input.reasoning.filter(|r| !r.is_empty()) {
        sections.insert("reasoning".to_string(), render_reasoning(reasoning));
    }

    if let Some(codegen) = input.codegen.filter(|c| !c.examples.is_empty()) {
        sections.insert("code".to_string(), render_code(codegen));
    }

    let sources = render_sources(input.search);
    if !sources.is_empty() {
        sections.insert("sources".to_string(), sources);
    }

    let notes = render_notes(input.generation.is_none(), input.unavailable);
    if !notes.is_empty() {
        sections.insert("notes".to_string(), notes);
    }

    for (key, title) in [
        ("answer", "Answer"),
        ("excerpts", "Documentation Excerpts"),
        ("reasoning", "Reasoning"),
        ("code", "Code Examples"),
        ("sources", "Sources"),
        ("notes", "Notes"),
    ] {
        if let Some(body) = sections.get(key) {
            ordered.push((title, body));
        }
    }

    let mut markdown = String::new();
    if input.generation.is_none() {
        markdown.push_str(&format!(
            "Here is what the documentation says about '{}'.\n\n",
            input.query
        ));
    }
    let body = ordered
        .iter()
        .map(|(title, body)| format!("## {title}\n\n{body}"))
        .collect::<Vec<_>>()
        .join("\n\n");
    markdown.push_str(&body);

    Composition { markdown, sections }
}

fn render_excerpts(search: &SearchResponse) -> String {
    search
        .chunks
        .iter()
        .take(EXCERPT_LIMIT)
        .enumerate()
        .map(|(i, chunk)| {
            let mut content: String = chunk.content.chars().take(EXCERPT_CHARS).collect();
            if chunk.content.chars().count() > EXCERPT_CHARS {
                content.push_str("...");
            }
            let quoted = content
                .lines()
                .map(|l| format!("> {l}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "**{}. {}** (relevance: {:.2})\n\n{}",
                i + 1,
                chunk.project_name,
                chunk.score,
                quoted
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_reasoning(reasoning: &ReasoningResponse) -> String {
    let mut parts = Vec::new();
    if !reasoning.prerequisites.is_empty() {
        parts.push(format!("**Prerequisites:** {}", reasoning.prerequisites.join(", ")));
    }
    if !reasoning.dependencies.is_empty() {
        let deps = reasoning
            .dependencies
            .iter()
            .map(|d| format!("- {d}"))
            .collect::<Vec<_>>()
            .join("\n");
        parts.push(format!("**Dependencies:**\n{deps}"));
    }
    if !reasoning.execution_order.is_empty() {
        let steps = reasoning
            .execution_order
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {s}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        parts.push(format!("**Execution order:**\n{steps}"));
    }
    if !reasoning.conflicts.is_empty() {
        parts.push(format!("**Conflicts:** {}", reasoning.conflicts.join(", ")));
    }
    parts.push(format!("_Confidence: {:.0}%_", reasoning.confidence * 100.0));
    parts.join("\n\n")
}

fn render_code(codegen: &CodeExtractionResponse) -> String {
    codegen
        .examples
        .iter()
        .map(|example| {
            let mut header = String::new();
            if !example.description.is_empty() {
                header.push_str(&example.description);
            }
            if !example.source_project.is_empty() {
                header.push_str(&format!(" (from {})", example.source_project));
            }
            let header = header.trim();
            let fence = format!("```{}\n{}\n```", example.language, example.code.trim_end());
            if header.is_empty() {
                fence
            } else {
                format!("{header}\n\n{fence}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_sources(search: &SearchResponse) -> String {
    let mut seen = BTreeSet::new();
    search
        .chunks
        .iter()
        .filter(|chunk| seen.insert((chunk.project_name.as_str(), chunk.file_path.as_str())))
        .map(|chunk| {
            if chunk.file_path.is_empty() {
                format!("- {}", chunk.project_name)
            } else {
                format!("- {} (`{}`)", chunk.project_name, chunk.file_path)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_notes(generation_missing: bool, unavailable: &[String]) -> String {
    let mut notes = Vec::new();
    if generation_missing {
        notes.push(
            "- The answer generator did not respond, so only raw documentation excerpts are shown."
                .to_string(),
        );
    }
    let optional: Vec<&str> = unavailable
        .iter()
        .map(String::as_str)
        .filter(|name| *name != CollaboratorKind::Generation.as_str())
        .collect();
    if !optional.is_empty() {
        notes.push(format!("- Unavailable for this answer: {}", optional.join(", ")));
    }
    notes.join("\n")
}

// ===========================
// DELIVERY
// ===========================

/// Delivers sealed answers to the caller-facing outbox
#[derive(Clone)]
pub struct ResultEmitter {
    registry: Arc<SessionRegistry>,
    memory: Arc<ConversationMemory>,
    outbox: mpsc::Sender<TerminalAnswer>,
    events: EventBus,
}

impl ResultEmitter {
    pub fn new(
        registry: Arc<SessionRegistry>,
        memory: Arc<ConversationMemory>,
        outbox: mpsc::Sender<TerminalAnswer>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            memory,
            outbox,
            events,
        }
    }

    /// Purge the session and send its answer. Call only with an answer
    /// returned by [`Session::seal`].
    pub async fn deliver(&self, answer: TerminalAnswer) {
        if let Some(mut session) = self.registry.remove(&answer.correlation_id) {
            session.cancel_timers();
        }

        if answer.outcome.is_answer() {
            self.memory
                .record_exchange(&answer.user, &answer.query, &answer.markdown);
        }

        tracing::info!(
            correlation_id = %answer.correlation_id,
            outcome = ?answer.outcome,
            agents_used = ?answer.agents_used,
            elapsed_ms = answer.elapsed_ms,
            "Session terminated"
        );
        self.events.emit(
            SwarmEvent::new(SwarmEventKind::SessionTerminated, answer.correlation_id).with_data(
                serde_json::json!({
                    "outcome": answer.outcome,
                    "agents_used": answer.agents_used,
                    "unavailable": answer.unavailable,
                    "elapsed_ms": answer.elapsed_ms,
                }),
            ),
        );

        let id = answer.correlation_id;
        if self.outbox.send(answer).await.is_err() {
            tracing::error!(correlation_id = %id, "Outbox closed, terminal answer lost");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{CodeExample, DocumentChunk};
    use crate::state::PartialResult;
    use std::time::Duration;

    fn chunk(project: &str, path: &str) -> DocumentChunk {
        DocumentChunk {
            content: "VRFConsumerBaseV2 lets a contract request randomness.".to_string(),
            project_name: project.to_string(),
            score: 0.91,
            file_path: path.to_string(),
            project_id: project.to_lowercase(),
        }
    }

    fn search(id: CorrelationId) -> SearchResponse {
        SearchResponse {
            correlation_id: id,
            chunks: vec![chunk("Chainlink", "vrf.md"), chunk("Chainlink", "vrf.md")],
            total_results: 2,
            projects_searched: vec!["chainlink".to_string()],
        }
    }

    fn session() -> Session {
        Session::new(
            "How do I use Chainlink VRF?",
            "alice",
            CallerReference::new("agent1q"),
            Duration::from_secs(45),
        )
    }

    #[test]
    fn test_compose_all_sections() {
        let id = CorrelationId::new();
        let search = search(id);
        let generation = GenerationResponse {
            correlation_id: id,
            answer_text: "Inherit from VRFConsumerBaseV2.".to_string(),
            sources_used: vec!["Chainlink".to_string()],
            token_count: 1200,
        };
        let reasoning = ReasoningResponse {
            correlation_id: id,
            dependencies: vec!["LINK token".to_string()],
            execution_order: vec!["fund".to_string(), "request".to_string()],
            conflicts: vec![],
            prerequisites: vec![],
            confidence: 0.8,
        };
        let codegen = CodeExtractionResponse {
            correlation_id: id,
            examples: vec![CodeExample {
                code: "contract A {}".to_string(),
                language: "solidity".to_string(),
                description: "Consumer".to_string(),
                source_project: "Chainlink".to_string(),
            }],
        };

        let out = compose(&ComposeInput {
            query: "q",
            search: &search,
            generation: Some(&generation),
            reasoning: Some(&reasoning),
            codegen: Some(&codegen),
            unavailable: &[],
        });

        for key in ["answer", "reasoning", "code", "sources"] {
            assert!(out.sections.contains_key(key), "missing {key}");
        }
        assert!(!out.sections.contains_key("notes"));
        assert!(out.markdown.contains("## Answer"));
        assert!(out.markdown.contains("```solidity"));
        assert!(out.markdown.contains("1. fund"));
        // Duplicate chunk sources collapse
        assert_eq!(out.sections["sources"].lines().count(), 1);
    }

    #[test]
    fn test_compose_without_generation_uses_excerpts() {
        let id = CorrelationId::new();
        let search = search(id);
        let unavailable = vec!["generation".to_string(), "reasoning".to_string()];
        let out = compose(&ComposeInput {
            query: "VRF",
            search: &search,
            generation: None,
            reasoning: None,
            codegen: None,
            unavailable: &unavailable,
        });

        assert!(out.sections.contains_key("excerpts"));
        assert!(!out.sections.contains_key("answer"));
        let notes = &out.sections["notes"];
        assert!(notes.contains("answer generator did not respond"));
        assert!(notes.contains("Unavailable for this answer: reasoning"));
    }

    #[test]
    fn test_composed_answer_reports_participation() {
        let mut s = session();
        let id = s.correlation_id;
        s.record(CollaboratorKind::Search, PartialResult::Search(search(id)));
        for kind in CollaboratorKind::FAN_OUT {
            s.mark_dispatched(kind);
        }
        s.record(
            CollaboratorKind::Reasoning,
            PartialResult::Unavailable {
                reason: "timed out".to_string(),
            },
        );

        let answer = TerminalAnswer::composed(&s);
        assert_eq!(answer.outcome, Outcome::Degraded);
        assert_eq!(answer.agents_used, vec!["search"]);
        assert_eq!(answer.unavailable, vec!["generation", "reasoning", "codegen"]);
    }

    #[test]
    fn test_composed_without_search_is_apology() {
        let answer = TerminalAnswer::composed(&session());
        assert_eq!(answer.outcome, Outcome::Failed);
        assert_eq!(answer.markdown, APOLOGY_TEXT);
    }

    #[tokio::test]
    async fn test_deliver_purges_and_remembers() {
        let registry = Arc::new(SessionRegistry::new());
        let memory = Arc::new(ConversationMemory::new(20));
        let (tx, mut rx) = mpsc::channel(4);
        let emitter = ResultEmitter::new(registry.clone(), memory.clone(), tx, EventBus::default());

        let id = registry.insert(session());
        let answer = registry
            .update(&id, |s| {
                let answer = TerminalAnswer::fixed(s, Outcome::Answered, "Use VRF v2.");
                s.seal(answer)
            })
            .flatten()
            .unwrap();

        emitter.deliver(answer).await;

        assert!(!registry.contains(&id));
        assert_eq!(rx.recv().await.unwrap().markdown, "Use VRF v2.");
        assert_eq!(memory.history("alice").len(), 2);
    }

    #[test]
    fn test_nothing_found_text_quotes_query() {
        assert_eq!(
            nothing_found_text("VRF"),
            "I couldn't find relevant information about 'VRF' in the documentation."
        );
    }
}
