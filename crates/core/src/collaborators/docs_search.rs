//! Documentation search over the indexed projects (`/docs/multi-search`).

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::contracts::{CollaboratorKind, DocumentChunk, SearchRequest, SearchResponse};
use crate::swarm::Collaborator;

use super::{http_client, join_url};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MultiSearchBody<'a> {
    project_ids: &'a [String],
    search_text: &'a str,
    top_k: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MultiSearchResults {
    #[serde(default)]
    results: Vec<RawChunk>,
    #[serde(default)]
    total_results: Option<usize>,
    #[serde(default)]
    projects_searched: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChunk {
    #[serde(default)]
    content: String,
    #[serde(default)]
    project_id: String,
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default)]
    file_path: String,
    #[serde(default)]
    score: f64,
}

impl From<RawChunk> for DocumentChunk {
    fn from(raw: RawChunk) -> Self {
        Self {
            content: raw.content,
            project_name: raw.project_name.unwrap_or_else(|| "Unknown".to_string()),
            score: raw.score,
            file_path: raw.file_path,
            project_id: raw.project_id,
        }
    }
}

impl MultiSearchResults {
    fn into_response(self, request: &SearchRequest) -> SearchResponse {
        let chunks: Vec<DocumentChunk> = self
            .results
            .into_iter()
            .filter(|c| !c.content.trim().is_empty())
            .map(DocumentChunk::from)
            .collect();
        SearchResponse {
            correlation_id: request.correlation_id,
            total_results: self.total_results.unwrap_or(chunks.len()),
            chunks,
            projects_searched: self.projects_searched,
        }
    }
}

/// Search collaborator backed by the docs API
pub struct DocsSearch {
    client: reqwest::Client,
    url: String,
}

impl DocsSearch {
    pub fn new(api_base: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(Duration::from_secs(30))?,
            url: join_url(api_base, "docs/multi-search"),
        })
    }
}

#[async_trait]
impl Collaborator for DocsSearch {
    type Request = SearchRequest;
    type Response = SearchResponse;

    fn kind(&self) -> CollaboratorKind {
        CollaboratorKind::Search
    }

    async fn call(&self, request: SearchRequest) -> anyhow::Result<SearchResponse> {
        if request.project_ids.is_empty() {
            tracing::warn!(correlation_id = %request.correlation_id, "No project ids to search");
            return Ok(SearchResponse {
                correlation_id: request.correlation_id,
                chunks: vec![],
                total_results: 0,
                projects_searched: vec![],
            });
        }

        let body = MultiSearchBody {
            project_ids: &request.project_ids,
            search_text: &request.query,
            top_k: request.top_k,
        };

        let results: MultiSearchResults = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to query {}", self.url))?
            .error_for_status()
            .context("Docs search returned an error status")?
            .json()
            .await
            .context("Failed to parse docs search results")?;

        let response = results.into_response(&request);
        tracing::info!(
            correlation_id = %request.correlation_id,
            chunks = response.chunks.len(),
            projects = response.projects_searched.len(),
            "Docs search complete"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{CallerReference, CorrelationId};

    fn request(project_ids: Vec<String>) -> SearchRequest {
        SearchRequest {
            correlation_id: CorrelationId::new(),
            query: "How do I use Chainlink VRF?".to_string(),
            project_ids,
            top_k: 5,
            caller_reference: CallerReference::new("c"),
        }
    }

    #[test]
    fn test_body_uses_api_field_names() {
        let ids = vec!["p1".to_string()];
        let body = MultiSearchBody {
            project_ids: &ids,
            search_text: "vrf",
            top_k: 5,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"projectIds": ["p1"], "searchText": "vrf", "topK": 5})
        );
    }

    #[test]
    fn test_results_map_into_chunks() {
        let raw = r#"{
            "results": [
                {"content": "Call requestRandomWords", "projectId": "p1", "projectName": "Chainlink", "filePath": "vrf.md", "score": 0.93},
                {"content": "   ", "projectId": "p1", "score": 0.5},
                {"content": "Subscription setup", "projectId": "p2", "score": 0.71}
            ],
            "totalResults": 3,
            "projectsSearched": ["Chainlink"]
        }"#;
        let results: MultiSearchResults = serde_json::from_str(raw).unwrap();
        let req = request(vec!["p1".to_string(), "p2".to_string()]);
        let response = results.into_response(&req);

        assert_eq!(response.correlation_id, req.correlation_id);
        assert_eq!(response.chunks.len(), 2);
        assert_eq!(response.chunks[0].file_path, "vrf.md");
        assert_eq!(response.chunks[1].project_name, "Unknown");
        assert_eq!(response.total_results, 3);
        assert_eq!(response.projects_searched, vec!["Chainlink"]);
    }

    #[tokio::test]
    async fn test_no_projects_short_circuits() {
        // Unroutable address: the request must not be sent at all
        let search = DocsSearch::new("http://127.0.0.1:9/api").unwrap();
        let response = search.call(request(vec![])).await.unwrap();
        assert!(response.chunks.is_empty());
        assert_eq!(response.total_results, 0);
    }
}
