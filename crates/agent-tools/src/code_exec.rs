use agent_core::config::SandboxConfig;
use agent_core::error::AgentError;
use agent_core::tool_registry::{required_str, Tool};
use agent_sandbox::{Limits, Sandbox, ERROR_PREFIX};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Runs Python code in the restricted sandbox.
pub struct CodeExecTool {
    sandbox: Sandbox,
}

impl CodeExecTool {
    pub fn new(config: &SandboxConfig) -> Self {
        let limits = Limits {
            recursion_limit: config.recursion_limit,
            max_output: config.max_output,
        };
        Self {
            sandbox: Sandbox::new(limits).with_partial_output(config.include_partial_output),
        }
    }
}

#[async_trait]
impl Tool for CodeExecTool {
    fn name(&self) -> &str {
        "execute_code"
    }

    fn description(&self) -> &str {
        "Execute Python code in a restricted sandbox and return what it prints. \
         Only these modules can be imported: datetime, math, random, time, collections, \
         itertools, functools, copy, re, json, csv, uuid, string, statistics, heapq, bisect, \
         array, enum, dataclasses, io, base64, hashlib, tempfile. Only common built-ins are \
         available and class statements are not. Use print() for output."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The Python code to execute"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        let code = required_str(&args, "code")?.to_string();
        let sandbox = self.sandbox.clone();
        debug!(bytes = code.len(), "executing code");
        match tokio::task::spawn_blocking(move || sandbox.execute(&code)).await {
            Ok(output) => Ok(output),
            Err(e) => {
                warn!("code execution task failed: {}", e);
                Ok(format!("{}{}", ERROR_PREFIX, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> CodeExecTool {
        CodeExecTool::new(&SandboxConfig::default())
    }

    #[tokio::test]
    async fn test_output_is_returned() {
        let out = tool()
            .execute(json!({"code": "print('Hello, World!')\nresult = 2 + 2\nprint(f'2 + 2 = {result}')"}))
            .await
            .unwrap();
        assert_eq!(out, "Hello, World!\n2 + 2 = 4\n");
    }

    #[tokio::test]
    async fn test_errors_are_strings() {
        let out = tool().execute(json!({"code": "import os"})).await.unwrap();
        assert_eq!(out, "Error executing code: Module os is not allowed");
    }

    #[tokio::test]
    async fn test_config_limits_apply() {
        let config = SandboxConfig {
            recursion_limit: 1000,
            max_output: 16,
            include_partial_output: true,
        };
        let out = CodeExecTool::new(&config)
            .execute(json!({"code": "print('start')\nfor i in range(10):\n    print(i * 100)"}))
            .await
            .unwrap();
        assert_eq!(out, "start\n0\n100\n200\nError executing code: output limit exceeded");
    }

    #[tokio::test]
    async fn test_missing_code_is_rejected() {
        assert!(tool().execute(json!({"source": "1"})).await.is_err());
    }
}
