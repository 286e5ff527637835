use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application configuration, loaded from TOML and then overridden
/// by environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub vision: VisionConfig,
    pub embedding: EmbeddingConfig,
    pub store: StoreConfig,
    pub search: SearchConfig,
    pub sandbox: SandboxConfig,
    pub session: SessionConfig,
    pub system_prompt: Option<String>,
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are an intelligent AI assistant with access to a \
knowledge base of documents, a web search tool, a SQL tool for tabular files, an image \
analysis tool and a code execution sandbox. Always start by searching the knowledge base \
with retrieval before anything else. If the documents don't answer the question, list the \
available documents and read the relevant one in full, or query tabular data with SQL. \
Only search the web when the knowledge base cannot answer. Use the code sandbox for \
calculations and be honest when you cannot find an answer.";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            vision: VisionConfig::default(),
            embedding: EmbeddingConfig::default(),
            store: StoreConfig::default(),
            search: SearchConfig::default(),
            sandbox: SandboxConfig::default(),
            session: SessionConfig::default(),
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.into()),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.config/rag-agent/config.toml),
    /// falling back to defaults if the file doesn't exist, then apply environment
    /// overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a specific path. No environment overrides.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Write current configuration to the default path.
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::default_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rag-agent")
            .join("config.toml")
    }

    /// Data directory for sessions.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rag-agent")
    }

    /// Override fields from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override fields from `lookup`. Unset and empty variables leave the
    /// configured value alone.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("LLM_BASE_URL") {
            self.provider.api_base = v;
        }
        if let Some(v) = get("LLM_API_KEY") {
            self.provider.api_key = Some(v);
        }
        if let Some(v) = get("LLM_CHOICE") {
            self.provider.model = v;
        }
        if let Some(v) = get("VISION_LLM_CHOICE") {
            self.vision.model = v;
        }
        if let Some(v) = get("EMBEDDING_BASE_URL") {
            self.embedding.api_base = v;
        }
        if let Some(v) = get("EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(v);
        }
        if let Some(v) = get("EMBEDDING_MODEL_CHOICE") {
            self.embedding.model = v;
        }
        if let Some(v) = get("SUPABASE_URL") {
            self.store.url = v;
        }
        if let Some(v) = get("SUPABASE_SERVICE_KEY") {
            self.store.service_key = v;
        }
        if let Some(v) = get("BRAVE_API_KEY") {
            self.search.brave_api_key = v;
        }
        if let Some(v) = get("SEARXNG_BASE_URL") {
            self.search.searxng_base_url = v;
        }
    }

    /// Endpoint and key for the vision model, inheriting from the chat
    /// provider when not set.
    pub fn vision_endpoint(&self) -> (String, Option<String>) {
        let base = self
            .vision
            .api_base
            .clone()
            .unwrap_or_else(|| self.provider.api_base.clone());
        let key = self
            .vision
            .api_key
            .clone()
            .or_else(|| self.provider.api_key.clone());
        (base, key)
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL for the OpenAI-compatible API.
    pub api_base: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            api_key: None,
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// Vision-capable model used by image analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub model: String,
    /// Defaults to the provider's base URL.
    pub api_base: Option<String>,
    /// Defaults to the provider's key.
    pub api_key: Option<String>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            api_base: None,
            api_key: None,
        }
    }
}

/// Embeddings endpoint for document retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".into(),
            api_key: None,
            model: "text-embedding-3-small".into(),
        }
    }
}

/// Hosted document store (PostgREST API).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub service_key: String,
}

impl StoreConfig {
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty() && !self.service_key.is_empty()
    }
}

/// Web search providers. Brave wins when both are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub brave_api_key: String,
    pub searxng_base_url: String,
}

/// Limits for the code execution sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Maximum depth of nested function calls.
    pub recursion_limit: usize,
    /// Characters a run may print before it is stopped.
    pub max_output: usize,
    /// Return output printed before an error along with the error line.
    pub include_partial_output: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 1000,
            max_output: 64 * 1024 * 1024,
            include_partial_output: false,
        }
    }
}

/// Session persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory for persisting sessions.
    pub history_dir: Option<PathBuf>,
    /// Maximum messages to keep in history for context window.
    pub max_history: usize,
    /// Automatically save sessions on each message.
    pub auto_save: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_dir: None, // resolved at runtime to data_dir/sessions
            max_history: 100,
            auto_save: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("gpt-4o-mini"));
        assert!(toml_str.contains("text-embedding-3-small"));
        assert!(toml_str.contains("recursion_limit = 1000"));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.provider.model, config.provider.model);
        assert_eq!(parsed.provider.max_tokens, config.provider.max_tokens);
        assert_eq!(parsed.sandbox.recursion_limit, 1000);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: AppConfig = toml::from_str(
            "[sandbox]\nmax_output = 5000\n\n[search]\nsearxng_base_url = \"http://localhost:8080\"\n",
        )
        .unwrap();
        assert_eq!(parsed.sandbox.max_output, 5000);
        assert_eq!(parsed.sandbox.recursion_limit, 1000);
        assert!(!parsed.sandbox.include_partial_output);
        assert_eq!(parsed.search.searxng_base_url, "http://localhost:8080");
        assert!(parsed.search.brave_api_key.is_empty());
        assert_eq!(parsed.vision.model, "gpt-4o");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("LLM_BASE_URL", "http://localhost:11434/v1"),
            ("LLM_API_KEY", "sk-test"),
            ("LLM_CHOICE", "llama3"),
            ("VISION_LLM_CHOICE", "llava"),
            ("EMBEDDING_MODEL_CHOICE", "nomic-embed-text"),
            ("SUPABASE_URL", "https://example.supabase.co"),
            ("SUPABASE_SERVICE_KEY", "service"),
            ("BRAVE_API_KEY", ""),
            ("SEARXNG_BASE_URL", "http://searx"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.provider.api_base, "http://localhost:11434/v1");
        assert_eq!(config.provider.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.provider.model, "llama3");
        assert_eq!(config.vision.model, "llava");
        assert_eq!(config.embedding.model, "nomic-embed-text");
        assert_eq!(config.embedding.api_base, "https://api.openai.com/v1");
        assert!(config.store.is_configured());
        assert!(config.search.brave_api_key.is_empty());
        assert_eq!(config.search.searxng_base_url, "http://searx");
    }

    #[test]
    fn test_vision_inherits_provider_endpoint() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-chat".into());
        let (base, key) = config.vision_endpoint();
        assert_eq!(base, "https://api.openai.com/v1");
        assert_eq!(key.as_deref(), Some("sk-chat"));

        config.vision.api_base = Some("http://vision".into());
        config.vision.api_key = Some("sk-vision".into());
        let (base, key) = config.vision_endpoint();
        assert_eq!(base, "http://vision");
        assert_eq!(key.as_deref(), Some("sk-vision"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AppConfig::default();
        config.sandbox.include_partial_output = true;
        config.save_to(&path).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert!(loaded.sandbox.include_partial_output);
    }
}
