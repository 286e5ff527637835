use crate::store::DocumentStore;
use agent_core::error::AgentError;
use agent_core::tool_registry::{required_str, Tool};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use tracing::warn;

const MUTATING_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "truncate", "replace", "upsert",
    "copy", "grant", "revoke",
];

struct Patterns {
    line_comment: Regex,
    block_comment: Regex,
    mutating: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                line_comment: Regex::new(r"(?m)--.*$").ok()?,
                block_comment: Regex::new(r"(?s)/\*.*?\*/").ok()?,
                mutating: Regex::new(&format!(r"\b(?:{})\b", MUTATING_KEYWORDS.join("|"))).ok()?,
            })
        })
        .as_ref()
}

/// Whether `sql` is a single read-only `SELECT`: after stripping comments it
/// must start with `select` and mention no mutating keyword as a whole word.
pub fn is_read_only_query(sql: &str) -> bool {
    let Some(p) = patterns() else {
        return false;
    };
    let without_lines = p.line_comment.replace_all(sql, "");
    let normalized = p.block_comment.replace_all(&without_lines, "");
    let normalized = normalized.trim().to_lowercase();
    normalized.starts_with("select") && !p.mutating.is_match(&normalized)
}

/// Read-only SQL over tabular documents, run by the `execute_sql` procedure.
pub struct SqlQueryTool {
    store: Arc<dyn DocumentStore>,
}

impl SqlQueryTool {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn run(&self, sql: &str) -> Result<String, AgentError> {
        if !is_read_only_query(sql) {
            return Ok("Only SELECT queries are allowed for security reasons.".into());
        }
        let response = self
            .store
            .rpc("execute_sql", json!({ "query_text": sql }))
            .await?;
        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Ok(format!("SQL Error: {}", message));
        }
        let empty = match &response {
            Value::Null => true,
            Value::Array(rows) => rows.is_empty(),
            Value::Object(fields) => fields.is_empty(),
            _ => false,
        };
        if empty {
            return Ok("Query executed successfully but returned no results.".into());
        }
        Ok(serde_json::to_string_pretty(&response)?)
    }
}

#[async_trait]
impl Tool for SqlQueryTool {
    fn name(&self) -> &str {
        "execute_sql_query"
    }

    fn description(&self) -> &str {
        "Run a read-only SQL query against the document_rows table, which holds the rows of \
         tabular files. dataset_id is the file ID from list_documents and row_data is a jsonb \
         column keyed by the file's schema, e.g. \
         SELECT AVG((row_data->>'revenue')::numeric) FROM document_rows WHERE dataset_id = '123'. \
         Never use a placeholder file ID."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sql_query": {
                    "type": "string",
                    "description": "The SQL query to execute (must be read-only)"
                }
            },
            "required": ["sql_query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        let sql = required_str(&args, "sql_query")?;
        Ok(self.run(sql).await.unwrap_or_else(|e| {
            warn!("Error executing SQL query: {}", e);
            format!("Error executing SQL query: {}", e)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;

    // ── Read-only gate ──────────────────────────────────────────

    #[test]
    fn test_plain_selects_pass() {
        assert!(is_read_only_query("SELECT * FROM document_rows"));
        assert!(is_read_only_query(
            "  select row_data->>'category' as category from document_rows where dataset_id = '1'"
        ));
        assert!(is_read_only_query("-- totals\nSELECT 1"));
        assert!(is_read_only_query("/* multi\nline */ select updated_at from t"));
    }

    #[test]
    fn test_mutations_are_rejected() {
        assert!(!is_read_only_query("DELETE FROM document_rows"));
        assert!(!is_read_only_query("SELECT 1; DROP TABLE document_rows"));
        assert!(!is_read_only_query("select * from t where x = 'a'; insert into t values (1)"));
        assert!(!is_read_only_query("with x as (select 1) select * from x"));
        assert!(!is_read_only_query(""));
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        assert!(is_read_only_query("SELECT created_at, updated_by FROM t"));
        assert!(!is_read_only_query("SELECT replace(name, 'a', 'b') FROM t"));
    }

    #[test]
    fn test_comments_cannot_hide_the_statement() {
        assert!(!is_read_only_query("-- select\nupdate t set x = 1"));
        assert!(is_read_only_query("select 1 -- drop table t"));
    }

    // ── Tool ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_refusal() {
        let tool = SqlQueryTool::new(Arc::new(MemoryStore::new()));
        let out = tool
            .execute(json!({"sql_query": "UPDATE document_rows SET x = 1"}))
            .await
            .unwrap();
        assert_eq!(out, "Only SELECT queries are allowed for security reasons.");
    }

    #[tokio::test]
    async fn test_results_are_pretty_json() {
        let store = Arc::new(
            MemoryStore::new().with_rpc("execute_sql", json!([{"category": "a", "total": 3}])),
        );
        let tool = SqlQueryTool::new(store.clone());
        let out = tool
            .execute(json!({"sql_query": "SELECT 1"}))
            .await
            .unwrap();
        assert_eq!(out, "[\n  {\n    \"category\": \"a\",\n    \"total\": 3\n  }\n]");
        assert_eq!(store.rpc_calls()[0].1, json!({"query_text": "SELECT 1"}));
    }

    #[tokio::test]
    async fn test_empty_and_error_responses() {
        let tool = SqlQueryTool::new(Arc::new(MemoryStore::new().with_rpc("execute_sql", json!([]))));
        assert_eq!(
            tool.execute(json!({"sql_query": "SELECT 1"})).await.unwrap(),
            "Query executed successfully but returned no results."
        );

        let tool = SqlQueryTool::new(Arc::new(
            MemoryStore::new().with_rpc("execute_sql", json!({"error": {"message": "column x does not exist"}})),
        ));
        assert_eq!(
            tool.execute(json!({"sql_query": "SELECT x"})).await.unwrap(),
            "SQL Error: column x does not exist"
        );

        let tool = SqlQueryTool::new(Arc::new(MemoryStore::failing("permission denied")));
        assert_eq!(
            tool.execute(json!({"sql_query": "SELECT 1"})).await.unwrap(),
            "Error executing SQL query: permission denied"
        );
    }
}
