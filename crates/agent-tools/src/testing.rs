//! In-memory collaborators for adapter tests.

use crate::embedding::Embedder;
use crate::image::VisionModel;
use crate::store::{column_text, DocumentStore, Query};
use agent_core::error::AgentError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// Tables and canned RPC results held in memory. Every RPC call is recorded.
#[derive(Default)]
pub struct MemoryStore {
    tables: HashMap<String, Vec<Value>>,
    rpcs: HashMap<String, Value>,
    failure: Option<String>,
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: &str, rows: Vec<Value>) -> Self {
        self.tables.insert(table.to_string(), rows);
        self
    }

    pub fn with_rpc(mut self, function: &str, result: Value) -> Self {
        self.rpcs.insert(function.to_string(), result);
        self
    }

    /// Every call fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn rpc_calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn check(&self) -> Result<(), AgentError> {
        match &self.failure {
            Some(message) => Err(AgentError::Backend(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>, AgentError> {
        self.check()?;
        let mut rows: Vec<Value> = self
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|row| {
                query
                    .filters
                    .iter()
                    .all(|(column, value)| column_text(row, column).as_deref() == Some(value))
            })
            .collect();
        if let Some(order) = &query.order {
            rows.sort_by_key(|row| column_text(row, order));
        }
        Ok(rows)
    }

    async fn rpc(&self, function: &str, params: Value) -> Result<Value, AgentError> {
        self.check()?;
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((function.to_string(), params));
        }
        self.rpcs
            .get(function)
            .cloned()
            .ok_or_else(|| AgentError::Backend(format!("function {} does not exist", function)))
    }
}

/// Returns the same vector for every text and remembers what it was asked.
#[derive(Default)]
pub struct FixedEmbedder {
    pub texts: Mutex<Vec<String>>,
}

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AgentError> {
        if let Ok(mut texts) = self.texts.lock() {
            texts.push(text.to_string());
        }
        Ok(vec![0.25, 0.5, 0.75])
    }
}

/// Vision call recorded by [`StubVision`].
#[derive(Debug, Clone, PartialEq)]
pub struct VisionCall {
    pub system_prompt: String,
    pub query: String,
    pub image: Vec<u8>,
    pub media_type: String,
}

#[derive(Default)]
pub struct StubVision {
    pub calls: Mutex<Vec<VisionCall>>,
}

#[async_trait]
impl VisionModel for StubVision {
    async fn analyze(
        &self,
        system_prompt: &str,
        query: &str,
        image: &[u8],
        media_type: &str,
    ) -> Result<String, AgentError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(VisionCall {
                system_prompt: system_prompt.to_string(),
                query: query.to_string(),
                image: image.to_vec(),
                media_type: media_type.to_string(),
            });
        }
        Ok(format!("{} bytes of {}", image.len(), media_type))
    }
}
