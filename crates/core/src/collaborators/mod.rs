//! # Collaborators
//!
//! Concrete implementations of [`Collaborator`](crate::swarm::Collaborator).
//!
//! | Kind       | Implementation                                |
//! |------------|-----------------------------------------------|
//! | routing    | [`CatalogRouter`] (project catalog + keyword scoring) |
//! | search     | [`DocsSearch`] (`/docs/multi-search`)         |
//! | reasoning  | [`HttpCollaborator`] (JSON over HTTP)         |
//! | generation | [`LlmGenerator`] (OpenAI-compatible chat API) |
//! | codegen    | [`CodeExtractor`] (local), or [`HttpCollaborator`] |
//! | synthesis  | [`MarkdownSynthesizer`] (local)               |

pub mod catalog_router;
pub mod code_extractor;
pub mod docs_search;
pub mod http;
pub mod llm;
pub mod synthesizer;

pub use catalog_router::{CatalogProject, CatalogRouter};
pub use code_extractor::CodeExtractor;
pub use docs_search::DocsSearch;
pub use http::HttpCollaborator;
pub use llm::LlmGenerator;
pub use synthesizer::MarkdownSynthesizer;

use std::time::Duration;

/// Shared HTTP client settings for every remote collaborator
pub(crate) fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("conduit/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))
}

/// Join a base URL and a path without doubling slashes
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://example.com/api/", "/projects"),
            "https://example.com/api/projects"
        );
        assert_eq!(
            join_url("http://localhost:3000/api", "docs/multi-search"),
            "http://localhost:3000/api/docs/multi-search"
        );
    }
}
