//! # Coordinator Configuration
//!
//! Persisted as JSON under `.conduit/config.json`. Missing fields take their
//! defaults, so a partial file only overrides what it names. Collaborator
//! endpoints can additionally be overridden from the environment.

use crate::error::{CoordinatorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH: &str = ".conduit/config.json";

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.asi1.ai/v1";
pub const DEFAULT_LLM_MODEL: &str = "asi1-mini";

/// Where each collaborator lives
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// Project catalog API base (serves `/projects`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing: Option<String>,
    /// Documentation API base (serves `/docs/multi-search`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// JSON-over-HTTP reasoning service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// JSON-over-HTTP code extraction service; local extractor when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codegen: Option<String>,
    /// OpenAI-compatible API base
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_model: Option<String>,
    /// Never written back to disk
    #[serde(skip_serializing)]
    pub generation_api_key: Option<String>,
}

/// Configuration for the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Bounded wait for optional fan-out collaborators
    pub fanout_timeout_ms: u64,
    /// Hard per-session deadline
    pub session_timeout_ms: u64,
    pub max_projects: usize,
    pub top_k: usize,
    pub target_language: String,
    pub max_tokens: u32,
    pub enable_reasoning: bool,
    pub enable_codegen: bool,
    /// Capacity of each proxy's request queue
    pub channel_capacity: usize,
    pub max_history_messages: usize,
    /// Forget a user's history after this long without a new exchange
    pub history_idle_timeout_secs: u64,
    pub endpoints: Endpoints,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            fanout_timeout_ms: 8_000,
            session_timeout_ms: 45_000,
            max_projects: 5,
            top_k: 5,
            target_language: "solidity".to_string(),
            max_tokens: 2048,
            enable_reasoning: true,
            enable_codegen: true,
            channel_capacity: 64,
            max_history_messages: 20,
            history_idle_timeout_secs: 3_600,
            endpoints: Endpoints::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Load from `path`, falling back to defaults when the file is missing
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CoordinatorError::config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| CoordinatorError::config(format!("{}: {e}", path.display())))
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoordinatorError::config(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| CoordinatorError::config(e.to_string()))
    }

    /// Override endpoints from `CONDUIT_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        let ep = &mut self.endpoints;
        if let Some(v) = get("CONDUIT_ROUTING_URL") {
            ep.routing = Some(v);
        }
        if let Some(v) = get("CONDUIT_SEARCH_URL") {
            ep.search = Some(v);
        }
        if let Some(v) = get("CONDUIT_REASONING_URL") {
            ep.reasoning = Some(v);
        }
        if let Some(v) = get("CONDUIT_CODEGEN_URL") {
            ep.codegen = Some(v);
        }
        if let Some(v) = get("CONDUIT_LLM_BASE_URL") {
            ep.generation_base_url = Some(v);
        }
        if let Some(v) = get("CONDUIT_LLM_MODEL") {
            ep.generation_model = Some(v);
        }
        if let Some(v) = get("CONDUIT_LLM_API_KEY") {
            ep.generation_api_key = Some(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.fanout_timeout_ms == 0 || self.session_timeout_ms == 0 {
            return Err(CoordinatorError::config("timeouts must be non-zero"));
        }
        if self.session_timeout_ms <= self.fanout_timeout_ms {
            return Err(CoordinatorError::config(format!(
                "session_timeout_ms ({}) must exceed fanout_timeout_ms ({})",
                self.session_timeout_ms, self.fanout_timeout_ms
            )));
        }
        if self.max_projects == 0 || self.top_k == 0 {
            return Err(CoordinatorError::config(
                "max_projects and top_k must be at least 1",
            ));
        }
        if self.channel_capacity == 0 {
            return Err(CoordinatorError::config("channel_capacity must be at least 1"));
        }
        Ok(())
    }

    pub fn fanout_timeout(&self) -> Duration {
        Duration::from_millis(self.fanout_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn history_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.history_idle_timeout_secs)
    }

    pub fn llm_base_url(&self) -> &str {
        self.endpoints
            .generation_base_url
            .as_deref()
            .unwrap_or(DEFAULT_LLM_BASE_URL)
    }

    pub fn llm_model(&self) -> &str {
        self.endpoints
            .generation_model
            .as_deref()
            .unwrap_or(DEFAULT_LLM_MODEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_coordinator_config_default() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.fanout_timeout(), Duration::from_secs(8));
        assert_eq!(config.max_history_messages, 20);
        assert_eq!(config.history_idle_timeout(), Duration::from_secs(3_600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_merges_over_defaults() {
        let config: CoordinatorConfig =
            serde_json::from_str(r#"{"fanout_timeout_ms": 2000, "endpoints": {"search": "http://docs"}}"#)
                .unwrap();
        assert_eq!(config.fanout_timeout_ms, 2000);
        assert_eq!(config.session_timeout_ms, 45_000);
        assert_eq!(config.endpoints.search.as_deref(), Some("http://docs"));
        assert_eq!(config.target_language, "solidity");
    }

    #[test]
    fn test_validate_rejects_bad_timeouts() {
        let mut config = CoordinatorConfig {
            fanout_timeout_ms: 10_000,
            session_timeout_ms: 5_000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CoordinatorError::Config(_))));

        config.fanout_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_endpoints() {
        let vars: HashMap<&str, &str> = [
            ("CONDUIT_SEARCH_URL", "http://localhost:3000/api"),
            ("CONDUIT_LLM_MODEL", "gpt-4o-mini"),
            ("CONDUIT_ROUTING_URL", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = CoordinatorConfig::default();
        config.apply_vars(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(
            config.endpoints.search.as_deref(),
            Some("http://localhost:3000/api")
        );
        assert_eq!(config.llm_model(), "gpt-4o-mini");
        assert_eq!(config.endpoints.routing, None);
        assert_eq!(config.llm_base_url(), DEFAULT_LLM_BASE_URL);
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut config = CoordinatorConfig::default();
        config.endpoints.generation_api_key = Some("secret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_save_then_load() {
        let path = std::env::temp_dir()
            .join(format!("conduit-config-{}", std::process::id()))
            .join("config.json");
        let config = CoordinatorConfig {
            fanout_timeout_ms: 3_000,
            enable_codegen: false,
            ..Default::default()
        };

        tokio_test::block_on(config.save(&path)).unwrap();
        let loaded = tokio_test::block_on(CoordinatorConfig::load(&path)).unwrap();
        assert_eq!(loaded, config);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let config = CoordinatorConfig::load("/nonexistent/conduit/config.json")
            .await
            .unwrap();
        assert_eq!(config, CoordinatorConfig::default());
    }
}
