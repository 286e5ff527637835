use agent_core::config::EmbeddingConfig;
use agent_core::error::AgentError;
use async_openai::config::OpenAIConfig;
use async_openai::types::CreateEmbeddingRequestArgs;
use async_openai::Client;
use async_trait::async_trait;
use tracing::debug;

/// Turns text into a vector for similarity search.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AgentError>;
}

/// Embedder backed by an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_base(&config.api_base)
            .with_api_key(config.api_key.clone().unwrap_or_else(|| "not-needed".to_string()));
        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
        }
    }
}

/// Embedding input with newlines flattened to spaces.
pub fn prepare_text(text: &str) -> String {
    text.replace('\n', " ")
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AgentError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(vec![prepare_text(text)])
            .build()
            .map_err(|e| AgentError::Embedding(e.to_string()))?;
        debug!(model = %self.model, "requesting embedding");
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| AgentError::Embedding(e.to_string()))?;
        response
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| AgentError::Embedding("no embedding in response".into()))
    }
}
