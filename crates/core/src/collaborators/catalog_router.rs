//! # Catalog Router
//!
//! Picks the indexed projects most relevant to a query. The catalog is
//! fetched from `{base}/projects` and every project is scored against the
//! query's keywords, its domain and its tech stack. Projects that score zero
//! are never selected, so an unrelated query routes to nothing.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::contracts::{CollaboratorKind, ProjectRef, RoutingRequest, RoutingResponse};
use crate::swarm::Collaborator;

use super::{http_client, join_url};

const STOP_WORDS: &[&str] = &[
    "how", "to", "the", "a", "an", "in", "on", "with", "for", "and", "or", "what", "is", "are",
    "can", "i", "my",
];

const DOMAIN_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "defi",
        &[
            "defi",
            "swap",
            "liquidity",
            "lending",
            "borrow",
            "yield",
            "farm",
            "dex",
            "amm",
            "uniswap",
            "aave",
        ],
    ),
    (
        "nft",
        &[
            "nft",
            "erc721",
            "erc1155",
            "token",
            "metadata",
            "opensea",
            "marketplace",
            "collectible",
        ],
    ),
    ("gaming", &["game", "gaming", "play", "nft", "metaverse", "unity", "unreal"]),
    ("oracles", &["oracle", "chainlink", "data", "feed", "price", "vrf", "random", "automation"]),
    ("infrastructure", &["node", "rpc", "indexer", "graph", "subgraph", "infra", "network"]),
    (
        "smart contracts",
        &[
            "contract",
            "solidity",
            "vyper",
            "deploy",
            "compile",
            "hardhat",
            "foundry",
            "truffle",
        ],
    ),
    ("tools", &["sdk", "cli", "tool", "framework", "library", "api", "test"]),
];

const TECH_KEYWORDS: &[(&str, &[&str])] = &[
    ("Solidity", &["solidity", "contract", "pragma", "evm"]),
    ("Hardhat", &["hardhat", "deploy", "test", "compile", "script"]),
    ("Foundry", &["foundry", "forge", "cast", "anvil"]),
    ("OpenZeppelin", &["openzeppelin", "oz", "erc20", "erc721", "ownable", "pausable"]),
    ("Ethers.js", &["ethers", "provider", "signer", "contract"]),
    ("Web3.js", &["web3", "provider", "contract"]),
    ("React", &["react", "component", "jsx", "hook"]),
    ("Next.js", &["nextjs", "next", "pages", "app"]),
    ("Chainlink", &["chainlink", "oracle", "vrf", "keeper", "ccip"]),
];

/// One entry of the project catalog
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CatalogProject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub tech_stack: Option<Vec<String>>,
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogPage {
    #[serde(default)]
    projects: Vec<CatalogProject>,
}

/// Meaningful lowercase words of a query
pub fn extract_keywords(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

fn lowered(values: &Option<Vec<String>>) -> Vec<String> {
    values
        .iter()
        .flatten()
        .map(|v| v.to_lowercase())
        .collect()
}

fn keyword_score(project: &CatalogProject, keywords: &[String]) -> f64 {
    let name = project.name.to_lowercase();
    let project_keywords = lowered(&project.keywords);
    let tags = lowered(&project.tags);
    let tech = lowered(&project.tech_stack);
    let domain = project.domain.as_deref().unwrap_or_default().to_lowercase();

    let mut score = 0.0;
    for kw in keywords {
        if name.contains(kw.as_str()) {
            score += 20.0;
        }
        if project_keywords.contains(kw) {
            score += 15.0;
        }
        if tags.contains(kw) {
            score += 10.0;
        }
        if tech.contains(kw) {
            score += 15.0;
        }
        if !domain.is_empty() && domain.contains(kw.as_str()) {
            score += 12.0;
        }
        for pk in &project_keywords {
            if pk.contains(kw.as_str()) || kw.contains(pk.as_str()) {
                score += 8.0;
            }
        }
        for tag in &tags {
            if tag.contains(kw.as_str()) || kw.contains(tag.as_str()) {
                score += 5.0;
            }
        }
    }
    score
}

fn domain_score(project: &CatalogProject, query: &str) -> f64 {
    let Some(domain) = project.domain.as_deref().map(str::to_lowercase) else {
        return 0.0;
    };
    DOMAIN_KEYWORDS
        .iter()
        .filter(|(name, _)| *name == domain)
        .filter(|(_, words)| words.iter().any(|w| query.contains(w)))
        .map(|_| 5.0)
        .sum()
}

fn tech_score(project: &CatalogProject, query: &str) -> f64 {
    let mut score = 0.0;
    for tech in project.tech_stack.iter().flatten() {
        if query.contains(&tech.to_lowercase()) {
            score += 15.0;
        }
        let related = TECH_KEYWORDS
            .iter()
            .find(|(name, _)| *name == tech.as_str())
            .map(|(_, words)| words.iter().any(|w| query.contains(w)))
            .unwrap_or(false);
        if related {
            score += 8.0;
        }
    }
    score
}

/// Score every project and keep the best `max_projects` with a non-zero score
pub fn route_projects(
    query: &str,
    catalog: &[CatalogProject],
    max_projects: usize,
) -> Vec<ProjectRef> {
    let keywords = extract_keywords(query);
    let query = query.to_lowercase();

    let mut scored: Vec<ProjectRef> = catalog
        .iter()
        .filter_map(|project| {
            let mut reasons = Vec::new();
            let mut total = 0.0;
            for (label, score) in [
                ("keyword match", keyword_score(project, &keywords)),
                ("domain match", domain_score(project, &query)),
                ("tech stack match", tech_score(project, &query)),
            ] {
                if score > 0.0 {
                    total += score;
                    reasons.push(format!("{label} (score: {score:.1})"));
                }
            }
            (total > 0.0).then(|| ProjectRef {
                id: project.id.clone(),
                name: project.name.clone(),
                reason: reasons.join(", "),
                score: total,
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(max_projects);
    scored
}

/// Routing collaborator backed by the project catalog API
pub struct CatalogRouter {
    client: reqwest::Client,
    projects_url: String,
}

impl CatalogRouter {
    pub fn new(api_base: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(Duration::from_secs(10))?,
            projects_url: join_url(api_base, "projects"),
        })
    }

    async fn fetch_catalog(&self) -> anyhow::Result<Vec<CatalogProject>> {
        let page: CatalogPage = self
            .client
            .get(&self.projects_url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", self.projects_url))?
            .error_for_status()
            .context("Project catalog returned an error status")?
            .json()
            .await
            .context("Failed to parse project catalog")?;
        Ok(page.projects)
    }
}

#[async_trait]
impl Collaborator for CatalogRouter {
    type Request = RoutingRequest;
    type Response = RoutingResponse;

    fn kind(&self) -> CollaboratorKind {
        CollaboratorKind::Routing
    }

    async fn call(&self, request: RoutingRequest) -> anyhow::Result<RoutingResponse> {
        let catalog = self.fetch_catalog().await?;
        let selected = route_projects(&request.query, &catalog, request.max_projects);

        tracing::info!(
            correlation_id = %request.correlation_id,
            catalog = catalog.len(),
            selected = selected.len(),
            "Routed query to projects"
        );
        for project in &selected {
            tracing::debug!(project = %project.name, score = project.score, "Selected project");
        }

        Ok(RoutingResponse {
            correlation_id: request.correlation_id,
            selected_projects: selected,
            total_project_count: catalog.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(
        id: &str,
        name: &str,
        domain: &str,
        tech: &[&str],
        keywords: &[&str],
    ) -> CatalogProject {
        CatalogProject {
            id: id.to_string(),
            name: name.to_string(),
            keywords: Some(keywords.iter().map(|s| s.to_string()).collect()),
            tags: None,
            tech_stack: Some(tech.iter().map(|s| s.to_string()).collect()),
            domain: Some(domain.to_string()),
        }
    }

    fn catalog() -> Vec<CatalogProject> {
        vec![
            project(
                "1",
                "Chainlink Docs",
                "Oracles",
                &["Chainlink", "Solidity"],
                &["vrf", "oracle"],
            ),
            project("2", "Hardhat Docs", "Smart Contracts", &["Hardhat"], &["deploy", "testing"]),
            project("3", "Uniswap V3", "DeFi", &["Solidity"], &["swap", "amm"]),
        ]
    }

    #[test]
    fn test_extract_keywords_drops_stop_words_and_short_words() {
        assert_eq!(
            extract_keywords("How do I use Chainlink VRF?"),
            vec!["use", "chainlink", "vrf"]
        );
    }

    #[test]
    fn test_chainlink_query_ranks_chainlink_first() {
        let selected = route_projects("How do I use Chainlink VRF?", &catalog(), 5);
        assert_eq!(selected[0].id, "1");
        assert!(selected[0].reason.contains("keyword match"));
        assert!(selected.iter().all(|p| p.score > 0.0));
    }

    #[test]
    fn test_max_projects_truncates() {
        let selected = route_projects("deploy a solidity contract with hardhat", &catalog(), 1);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "2");
    }

    #[test]
    fn test_unrelated_query_selects_nothing() {
        assert!(route_projects("bake sourdough bread", &catalog(), 5).is_empty());
        assert!(route_projects("How do I use Chainlink VRF?", &[], 5).is_empty());
    }

    #[test]
    fn test_catalog_page_tolerates_nulls() {
        let page: CatalogPage = serde_json::from_str(
            r#"{"projects":[{"id":"x","name":"Graph","keywords":null,"tags":["subgraph"],"domain":null}]}"#,
        )
        .unwrap();
        assert_eq!(page.projects.len(), 1);
        let selected = route_projects("write a subgraph", &page.projects, 5);
        assert_eq!(selected.len(), 1);
    }
}
