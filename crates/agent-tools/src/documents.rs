//! Knowledge-base tools: similarity retrieval, listing, and full document text.

use crate::embedding::Embedder;
use crate::store::{DocumentStore, Query};
use agent_core::error::AgentError;
use agent_core::tool_registry::{required_str, Tool};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

/// Chunks returned per retrieval.
const MATCH_COUNT: usize = 4;

pub struct RetrieveDocumentsTool {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
}

impl RetrieveDocumentsTool {
    pub fn new(store: Arc<dyn DocumentStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    async fn retrieve(&self, query: &str) -> Result<String, AgentError> {
        let embedding = self.embedder.embed(query).await?;
        let response = self
            .store
            .rpc(
                "match_documents",
                json!({ "query_embedding": embedding, "match_count": MATCH_COUNT }),
            )
            .await?;
        let rows = response.as_array().cloned().unwrap_or_default();
        if rows.is_empty() {
            return Ok("No relevant documents found for the query.".into());
        }
        let chunks: Vec<String> = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let content = row.get("content").map(text).unwrap_or_default();
                let source = source_of(row)
                    .map(|s| format!(" (Source: {})", s))
                    .unwrap_or_default();
                format!("Document {}: {}{}\n", i + 1, content, source)
            })
            .collect();
        Ok(chunks.join("\n"))
    }
}

/// `metadata.source`, where metadata is an object or a JSON-encoded object.
fn source_of(row: &Value) -> Option<String> {
    let metadata = match row.get("metadata")? {
        Value::String(s) => serde_json::from_str::<Value>(s).ok()?,
        other => other.clone(),
    };
    match metadata.get("source")? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        other => Some(text(other)),
    }
}

/// A JSON value as display text: strings unquoted, everything else as JSON.
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A field that is present and truthy, else the fallback.
fn field_or(row: &Value, key: &str, fallback: &str) -> String {
    match row.get(key) {
        None | Some(Value::Null) => fallback.to_string(),
        Some(v) => text(v),
    }
}

#[async_trait]
impl Tool for RetrieveDocumentsTool {
    fn name(&self) -> &str {
        "retrieve_relevant_documents"
    }

    fn description(&self) -> &str {
        "Retrieve the document chunks most relevant to the user's question from the \
         knowledge base using similarity search."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_query": {
                    "type": "string",
                    "description": "The user's question or query"
                }
            },
            "required": ["user_query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        let query = required_str(&args, "user_query")?;
        Ok(self.retrieve(query).await.unwrap_or_else(|e| {
            warn!("Error retrieving documents: {}", e);
            format!("Error retrieving documents: {}", e)
        }))
    }
}

pub struct ListDocumentsTool {
    store: Arc<dyn DocumentStore>,
}

impl ListDocumentsTool {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn list(&self) -> Result<String, AgentError> {
        let rows = self.store.select("document_metadata", &Query::all()).await?;
        if rows.is_empty() {
            return Ok("No documents available in the knowledge base.".into());
        }
        let lines: Vec<String> = rows
            .iter()
            .map(|doc| {
                let schema = match doc.get("schema") {
                    None | Some(Value::Null) => String::new(),
                    Some(Value::String(s)) if s.is_empty() => String::new(),
                    Some(s) => format!(" (Schema: {})", text(s)),
                };
                format!(
                    "ID: {} - {} from {} ({}){}",
                    field_or(doc, "id", "Unknown ID"),
                    field_or(doc, "title", "Untitled"),
                    field_or(doc, "source", "Unknown source"),
                    field_or(doc, "file_type", "Unknown type"),
                    schema
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

#[async_trait]
impl Tool for ListDocumentsTool {
    fn name(&self) -> &str {
        "list_documents"
    }

    fn description(&self) -> &str {
        "List every document in the knowledge base with its ID, title, source, file type \
         and, for tabular files, the column schema."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> Result<String, AgentError> {
        Ok(self.list().await.unwrap_or_else(|e| {
            warn!("Error listing documents: {}", e);
            format!("Error listing documents: {}", e)
        }))
    }
}

pub struct DocumentContentTool {
    store: Arc<dyn DocumentStore>,
}

impl DocumentContentTool {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn content(&self, document_id: &str) -> Result<String, AgentError> {
        let metadata = self
            .store
            .select("document_metadata", &Query::all().eq("id", document_id))
            .await?;
        if metadata.is_empty() {
            return Ok(format!("Document with ID {} not found.", document_id));
        }
        let chunks = self
            .store
            .select(
                "documents",
                &Query::all()
                    .eq("metadata->>document_id", document_id)
                    .order("metadata->>chunk_index"),
            )
            .await?;
        if chunks.is_empty() {
            return Ok(format!(
                "No content chunks found for document with ID {}.",
                document_id
            ));
        }
        let parts: Vec<String> = chunks
            .iter()
            .map(|c| c.get("content").map(text).unwrap_or_default())
            .collect();
        Ok(parts.join("\n"))
    }
}

#[async_trait]
impl Tool for DocumentContentTool {
    fn name(&self) -> &str {
        "get_document_content"
    }

    fn description(&self) -> &str {
        "Get the full text of a document by joining all of its chunks in order. \
         Use list_documents first to find the document ID."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "document_id": {
                    "type": "string",
                    "description": "The ID (or file path) of the document"
                }
            },
            "required": ["document_id"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        let document_id = required_str(&args, "document_id")?;
        Ok(self.content(document_id).await.unwrap_or_else(|e| {
            warn!("Error retrieving document content: {}", e);
            format!("Error retrieving document content: {}", e)
        }))
    }
}
