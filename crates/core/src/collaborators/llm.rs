//! # LLM Generator
//!
//! Answer generation through an OpenAI-compatible `/chat/completions` API.
//! The retrieved chunks are numbered into the system prompt and the caller's
//! earlier turns precede the question.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::CoordinatorConfig;
use crate::contracts::{
    ChatTurn, CollaboratorKind, DocumentChunk, GenerationRequest, GenerationResponse, TurnRole,
};
use crate::swarm::Collaborator;

use super::{http_client, join_url};

const TEMPERATURE: f32 = 0.7;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

/// Render chunks as numbered, attributed sources
pub fn prepare_context(chunks: &[DocumentChunk]) -> String {
    if chunks.is_empty() {
        return "No documentation available.".to_string();
    }
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "[Source {}: {} (relevance: {:.2})]\n{}\n",
                i + 1,
                chunk.project_name,
                chunk.score,
                chunk.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn system_prompt(context: &str) -> String {
    format!(
        r#"You are an expert assistant for software developers.
Your job is to help developers implement technologies based on official documentation.

Relevant documentation context:
{context}

Instructions:
1. Answer based EXCLUSIVELY on the provided documentation
2. If the question cannot be answered with the documentation, clearly state that you don't have that information
3. Provide code examples when appropriate
4. Be clear, concise, and technical
5. Cite the source project when relevant
6. Use markdown formatting for better readability"#
    )
}

/// Distinct source projects, in first-seen order
fn sources(chunks: &[DocumentChunk]) -> Vec<String> {
    let mut seen = Vec::new();
    for chunk in chunks {
        if !seen.contains(&chunk.project_name) {
            seen.push(chunk.project_name.clone());
        }
    }
    seen
}

fn role(turn: &ChatTurn) -> &'static str {
    match turn.role {
        TurnRole::User => "user",
        TurnRole::Assistant => "assistant",
    }
}

pub struct LlmGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl LlmGenerator {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(Duration::from_secs(60))?,
            url: join_url(base_url, "chat/completions"),
            model: model.into(),
            api_key,
        })
    }

    pub fn from_config(config: &CoordinatorConfig) -> anyhow::Result<Self> {
        Self::new(
            config.llm_base_url(),
            config.llm_model(),
            config.endpoints.generation_api_key.clone(),
        )
    }
}

#[async_trait]
impl Collaborator for LlmGenerator {
    type Request = GenerationRequest;
    type Response = GenerationResponse;

    fn kind(&self) -> CollaboratorKind {
        CollaboratorKind::Generation
    }

    async fn call(&self, request: GenerationRequest) -> anyhow::Result<GenerationResponse> {
        let Some(api_key) = self.api_key.as_deref().filter(|k| !k.is_empty()) else {
            anyhow::bail!("LLM API key not configured");
        };

        let system = system_prompt(&prepare_context(&request.chunks));
        let mut messages = vec![ChatMessage {
            role: "system",
            content: &system,
        }];
        messages.extend(request.history.iter().map(|turn| ChatMessage {
            role: role(turn),
            content: &turn.content,
        }));
        messages.push(ChatMessage {
            role: "user",
            content: &request.query,
        });

        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: request.max_tokens,
            temperature: TEMPERATURE,
        };

        let completion: ChatCompletion = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to reach LLM API")?
            .error_for_status()
            .context("LLM API returned an error status")?
            .json()
            .await
            .context("Failed to parse LLM completion")?;

        let answer_text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .context("LLM returned an empty completion")?;
        let token_count = completion.usage.map(|u| u.total_tokens).unwrap_or(0);

        tracing::info!(
            correlation_id = %request.correlation_id,
            tokens = token_count,
            model = %self.model,
            "Generated answer"
        );

        Ok(GenerationResponse {
            correlation_id: request.correlation_id,
            answer_text,
            sources_used: sources(&request.chunks),
            token_count,
        })
    }
}
