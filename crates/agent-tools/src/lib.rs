pub mod code_exec;
pub mod documents;
pub mod embedding;
pub mod image;
pub mod sql;
pub mod store;
pub mod web_search;

#[cfg(test)]
mod testing;

use agent_core::config::AppConfig;
use agent_core::tool_registry::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;

/// HTTP client shared by the search and store adapters.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("rag-agent/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

/// Register all built-in tools into the registry.
pub fn register_all(registry: &mut ToolRegistry, config: &AppConfig) {
    let client = http_client();
    let store: Arc<dyn store::DocumentStore> =
        Arc::new(store::PostgrestStore::new(client.clone(), &config.store));
    let embedder: Arc<dyn embedding::Embedder> =
        Arc::new(embedding::OpenAiEmbedder::new(&config.embedding));
    let vision: Arc<dyn image::VisionModel> = Arc::new(image::OpenAiVision::new(config));

    if !config.store.is_configured() {
        tracing::warn!("document store is not configured; knowledge-base tools will report errors");
    }

    registry.register(Arc::new(web_search::WebSearchTool::new(client, &config.search)));
    registry.register(Arc::new(documents::RetrieveDocumentsTool::new(
        store.clone(),
        embedder,
    )));
    registry.register(Arc::new(documents::ListDocumentsTool::new(store.clone())));
    registry.register(Arc::new(documents::DocumentContentTool::new(store.clone())));
    registry.register(Arc::new(sql::SqlQueryTool::new(store.clone())));
    registry.register(Arc::new(image::ImageAnalysisTool::new(store, vision)));
    registry.register(Arc::new(code_exec::CodeExecTool::new(&config.sandbox)));
}
