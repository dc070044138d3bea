//! Local synthesis collaborator. Renders the final markdown with the same
//! composer the result emitter uses for degraded answers.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::contracts::{CollaboratorKind, SynthesisRequest, SynthesisResponse};
use crate::swarm::emitter::{compose, ComposeInput};
use crate::swarm::Collaborator;

#[derive(Debug, Clone, Default)]
pub struct MarkdownSynthesizer {
    invocations: Arc<AtomicUsize>,
}

impl MarkdownSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count invocations into a shared counter
    pub fn with_counter(invocations: Arc<AtomicUsize>) -> Self {
        Self { invocations }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Collaborator for MarkdownSynthesizer {
    type Request = SynthesisRequest;
    type Response = SynthesisResponse;

    fn kind(&self) -> CollaboratorKind {
        CollaboratorKind::Synthesis
    }

    async fn call(&self, request: SynthesisRequest) -> anyhow::Result<SynthesisResponse> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        let composition = compose(&ComposeInput {
            query: &request.query,
            search: &request.search_result,
            generation: Some(&request.generation_result),
            reasoning: request.reasoning_result.as_ref(),
            codegen: request.codegen_result.as_ref(),
            unavailable: &[],
        });

        let mut agents_used = vec![
            CollaboratorKind::Search.to_string(),
            CollaboratorKind::Generation.to_string(),
        ];
        if request.reasoning_result.is_some() {
            agents_used.push(CollaboratorKind::Reasoning.to_string());
        }
        if request.codegen_result.is_some() {
            agents_used.push(CollaboratorKind::CodeExtraction.to_string());
        }

        Ok(SynthesisResponse {
            correlation_id: request.correlation_id,
            markdown: composition.markdown,
            sections: composition.sections,
            agents_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{
        CallerReference, CodeExample, CodeExtractionResponse, CorrelationId, DocumentChunk,
        GenerationResponse, ReasoningResponse, SearchResponse,
    };

    fn request(with_optionals: bool) -> SynthesisRequest {
        let id = CorrelationId::new();
        SynthesisRequest {
            correlation_id: id,
            query: "How do I use Chainlink VRF?".to_string(),
            search_result: SearchResponse {
                correlation_id: id,
                chunks: vec![DocumentChunk {
                    content: "Call requestRandomWords.".to_string(),
                    project_name: "Chainlink".to_string(),
                    score: 0.9,
                    file_path: "vrf.md".to_string(),
                    project_id: "p1".to_string(),
                }],
                total_results: 1,
                projects_searched: vec!["Chainlink".to_string()],
            },
            generation_result: GenerationResponse {
                correlation_id: id,
                answer_text: "Subscribe, fund, then request.".to_string(),
                sources_used: vec!["Chainlink".to_string()],
                token_count: 1200,
            },
            reasoning_result: with_optionals.then(|| ReasoningResponse {
                correlation_id: id,
                dependencies: vec!["LINK".to_string()],
                execution_order: vec![],
                conflicts: vec![],
                prerequisites: vec![],
                confidence: 0.8,
            }),
            codegen_result: with_optionals.then(|| CodeExtractionResponse {
                correlation_id: id,
                examples: vec![CodeExample {
                    code: "contract Dice {}".to_string(),
                    language: "solidity".to_string(),
                    description: "Consumer".to_string(),
                    source_project: "Chainlink".to_string(),
                }],
            }),
            caller_reference: CallerReference::new("c"),
        }
    }

    #[tokio::test]
    async fn test_all_inputs_rendered() {
        let synthesizer = MarkdownSynthesizer::new();
        let response = synthesizer.call(request(true)).await.unwrap();

        assert_eq!(
            response.agents_used,
            vec!["search", "generation", "reasoning", "codegen"]
        );
        for key in ["answer", "reasoning", "code", "sources"] {
            assert!(response.sections.contains_key(key), "missing {key}");
        }
        assert!(response.markdown.contains("Subscribe, fund, then request."));
        assert_eq!(synthesizer.invocations(), 1);
    }

    #[tokio::test]
    async fn test_optionals_omitted() {
        let response = MarkdownSynthesizer::new().call(request(false)).await.unwrap();
        assert_eq!(response.agents_used, vec!["search", "generation"]);
        assert!(!response.sections.contains_key("reasoning"));
        assert!(!response.sections.contains_key("code"));
    }
}
