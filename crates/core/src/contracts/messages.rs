//! # Stage Messages
//!
//! Typed request/response pairs exchanged with each collaborator.
//! Every request carries the session's `correlation_id` and every response
//! echoes it back; that id is the only thing used to find the session again.

use super::{CallerReference, CorrelationId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ===========================
// ROUTING
// ===========================

/// A project selected by the routing collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub id: String,
    pub name: String,
    /// Why the router picked this project
    #[serde(default)]
    pub reason: String,
    /// Router-specific relevance, higher is better
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRequest {
    pub correlation_id: CorrelationId,
    pub query: String,
    pub max_projects: usize,
    pub caller_reference: CallerReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingResponse {
    pub correlation_id: CorrelationId,
    pub selected_projects: Vec<ProjectRef>,
    pub total_project_count: usize,
}

// ===========================
// SEARCH
// ===========================

/// One documentation chunk returned by the search backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub content: String,
    pub project_name: String,
    pub score: f64,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub project_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub correlation_id: CorrelationId,
    pub query: String,
    pub project_ids: Vec<String>,
    pub top_k: usize,
    pub caller_reference: CallerReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub correlation_id: CorrelationId,
    pub chunks: Vec<DocumentChunk>,
    pub total_results: usize,
    #[serde(default)]
    pub projects_searched: Vec<String>,
}

// ===========================
// SYMBOLIC REASONING (optional)
// ===========================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub correlation_id: CorrelationId,
    pub query: String,
    pub chunks: Vec<DocumentChunk>,
    pub caller_reference: CallerReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningResponse {
    pub correlation_id: CorrelationId,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub execution_order: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    /// 0.0 - 1.0
    #[serde(default)]
    pub confidence: f64,
}

impl ReasoningResponse {
    /// True when the reasoner found nothing worth reporting
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
            && self.execution_order.is_empty()
            && self.conflicts.is_empty()
            && self.prerequisites.is_empty()
    }
}

// ===========================
// ANSWER GENERATION (mandatory)
// ===========================

/// Speaker of a remembered conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// A prior turn of the caller's conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub correlation_id: CorrelationId,
    pub query: String,
    pub chunks: Vec<DocumentChunk>,
    pub max_tokens: u32,
    /// Earlier turns of the same caller's conversation, oldest first
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    pub caller_reference: CallerReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub correlation_id: CorrelationId,
    pub answer_text: String,
    #[serde(default)]
    pub sources_used: Vec<String>,
    #[serde(default)]
    pub token_count: u32,
}

// ===========================
// CODE EXTRACTION (optional)
// ===========================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeExample {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source_project: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeExtractionRequest {
    pub correlation_id: CorrelationId,
    pub query: String,
    pub chunks: Vec<DocumentChunk>,
    pub target_language: String,
    pub caller_reference: CallerReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeExtractionResponse {
    pub correlation_id: CorrelationId,
    pub examples: Vec<CodeExample>,
}

// ===========================
// SYNTHESIS
// ===========================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub correlation_id: CorrelationId,
    pub query: String,
    pub search_result: SearchResponse,
    pub generation_result: GenerationResponse,
    #[serde(default)]
    pub reasoning_result: Option<ReasoningResponse>,
    #[serde(default)]
    pub codegen_result: Option<CodeExtractionResponse>,
    pub caller_reference: CallerReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResponse {
    pub correlation_id: CorrelationId,
    pub markdown: String,
    /// Structured sections, e.g. `answer`, `reasoning`, `code`, `sources`
    #[serde(default)]
    pub sections: BTreeMap<String, String>,
    #[serde(default)]
    pub agents_used: Vec<String>,
}
