use agent_core::config::SearchConfig;
use agent_core::error::AgentError;
use agent_core::tool_registry::{required_str, Tool};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

const BRAVE_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";

const NO_RESULTS: &str = "No results found for the query.";

const NO_PROVIDER: &str =
    "No search provider configured. Please set up either Brave API key or SearXNG base URL.";

/// Which backend a search goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    Brave { api_key: String },
    Searxng { base_url: String },
}

impl Provider {
    /// Brave when a key is set, else SearXNG when a URL is set.
    pub fn from_config(config: &SearchConfig) -> Option<Self> {
        if !config.brave_api_key.is_empty() {
            Some(Self::Brave {
                api_key: config.brave_api_key.clone(),
            })
        } else if !config.searxng_base_url.is_empty() {
            Some(Self::Searxng {
                base_url: config.searxng_base_url.trim_end_matches('/').to_string(),
            })
        } else {
            None
        }
    }
}

/// Search the web through Brave or a SearXNG instance.
pub struct WebSearchTool {
    client: reqwest::Client,
    provider: Option<Provider>,
}

impl WebSearchTool {
    pub fn new(client: reqwest::Client, config: &SearchConfig) -> Self {
        Self {
            client,
            provider: Provider::from_config(config),
        }
    }

    async fn search(&self, provider: &Provider, query: &str) -> Result<String, AgentError> {
        match provider {
            Provider::Brave { api_key } => {
                debug!("brave search");
                let data: Value = self
                    .client
                    .get(BRAVE_ENDPOINT)
                    .query(&[
                        ("q", query),
                        ("count", "5"),
                        ("text_decorations", "true"),
                        ("search_lang", "en"),
                    ])
                    .header("X-Subscription-Token", api_key)
                    .header("Accept", "application/json")
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                Ok(format_brave(&data))
            }
            Provider::Searxng { base_url } => {
                debug!(%base_url, "searxng search");
                let data: Value = self
                    .client
                    .get(format!("{}/search", base_url))
                    .query(&[("q", query), ("format", "json")])
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                Ok(format_searxng(&data))
            }
        }
    }
}

fn str_field<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    item.get(key).and_then(|v| v.as_str())
}

/// Top three Brave web results that carry both a title and a description.
pub fn format_brave(data: &Value) -> String {
    let results: Vec<String> = data
        .pointer("/web/results")
        .and_then(|r| r.as_array())
        .map(|items| items.iter().take(3).collect::<Vec<_>>())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| {
            let title = str_field(item, "title").filter(|t| !t.is_empty())?;
            let description = str_field(item, "description").filter(|d| !d.is_empty())?;
            let url = str_field(item, "url").unwrap_or_default();
            Some(format!(
                "Title: {}\nSummary: {}\nSource: {}\n",
                title, description, url
            ))
        })
        .collect();
    if results.is_empty() {
        NO_RESULTS.to_string()
    } else {
        results.join("\n")
    }
}

/// Top ten SearXNG results with the first 300 characters of each snippet.
pub fn format_searxng(data: &Value) -> String {
    let mut out = String::new();
    let items = data
        .get("results")
        .and_then(|r| r.as_array())
        .cloned()
        .unwrap_or_default();
    for (i, page) in items.iter().take(10).enumerate() {
        let title = str_field(page, "title").unwrap_or("No title");
        let url = str_field(page, "url").unwrap_or("No URL");
        let content: String = str_field(page, "content")
            .unwrap_or("No content")
            .chars()
            .take(300)
            .collect();
        out.push_str(&format!(
            "{}. {}   URL: {}   Content: {}...\n\n",
            i + 1,
            title,
            url,
            content
        ));
    }
    if out.is_empty() {
        NO_RESULTS.to_string()
    } else {
        out
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and get a summary of the top results. Use this only when the \
         knowledge base cannot answer the question."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The query for the web search"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        let query = required_str(&args, "query")?;
        let Some(provider) = &self.provider else {
            return Ok(NO_PROVIDER.to_string());
        };
        Ok(self.search(provider, query).await.unwrap_or_else(|e| {
            warn!("Error searching the web: {}", e);
            format!("Error searching the web: {}", e)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Provider selection ──────────────────────────────────────

    #[test]
    fn test_brave_preferred_over_searxng() {
        let config = SearchConfig {
            brave_api_key: "key".into(),
            searxng_base_url: "http://searx".into(),
        };
        assert_eq!(
            Provider::from_config(&config),
            Some(Provider::Brave { api_key: "key".into() })
        );
    }

    #[test]
    fn test_searxng_url_is_trimmed() {
        let config = SearchConfig {
            brave_api_key: String::new(),
            searxng_base_url: "http://searx:8080/".into(),
        };
        assert_eq!(
            Provider::from_config(&config),
            Some(Provider::Searxng { base_url: "http://searx:8080".into() })
        );
    }

    #[tokio::test]
    async fn test_no_provider_sentinel() {
        let tool = WebSearchTool::new(reqwest::Client::new(), &SearchConfig::default());
        assert_eq!(tool.execute(json!({"query": "rust"})).await.unwrap(), NO_PROVIDER);
        assert!(tool.execute(json!({})).await.is_err());
    }

    // ── Formatting ──────────────────────────────────────────────

    #[test]
    fn test_format_brave() {
        let data = json!({"web": {"results": [
            {"title": "Rust", "description": "A language", "url": "https://rust-lang.org"},
            {"title": "No description", "url": "https://x"},
            {"title": "Cargo", "description": "The package manager"},
            {"title": "Fourth", "description": "Never shown", "url": "https://y"}
        ]}});
        assert_eq!(
            format_brave(&data),
            "Title: Rust\nSummary: A language\nSource: https://rust-lang.org\n\n\
             Title: Cargo\nSummary: The package manager\nSource: \n"
        );
        assert_eq!(format_brave(&json!({})), NO_RESULTS);
    }

    #[test]
    fn test_format_searxng() {
        let long = "x".repeat(400);
        let data = json!({"results": [
            {"title": "One", "url": "https://one", "content": "short"},
            {"content": long}
        ]});
        let out = format_searxng(&data);
        assert!(out.starts_with("1. One   URL: https://one   Content: short...\n\n2. No title   URL: No URL   Content: "));
        assert!(out.ends_with(&format!("{}...\n\n", "x".repeat(300))));
        assert_eq!(format_searxng(&json!({"results": []})), NO_RESULTS);
    }

    #[test]
    fn test_format_searxng_caps_at_ten() {
        let results: Vec<Value> = (0..15).map(|i| json!({"title": format!("t{}", i)})).collect();
        let out = format_searxng(&json!({ "results": results }));
        assert!(out.contains("10. t9"));
        assert!(!out.contains("11."));
    }
}
