use crate::config::AppConfig;
use crate::error::AgentError;
use crate::tool_registry::ToolRegistry;
use crate::types::{AgentEvent, Message, Role, ToolCall, ToolOutput, ToolSchema};

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
    CreateChatCompletionRequestArgs, FunctionObjectArgs,
};
use async_openai::Client;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Maximum number of tool-calling iterations before we force a text response.
const MAX_TOOL_ITERATIONS: usize = 20;

/// Drives the chat model through tool calls until it answers in text.
pub struct AgentLoop {
    client: Client<OpenAIConfig>,
    config: AppConfig,
    tool_registry: Arc<ToolRegistry>,
}

/// The configured system prompt with the user's memories appended.
pub fn compose_system_prompt(base: Option<&str>, memories: &[String]) -> Option<String> {
    if memories.is_empty() {
        return base.map(str::to_string);
    }
    let section = format!("\nUser Memories:\n{}", memories.join("\n"));
    Some(format!("{}{}", base.unwrap_or_default(), section))
}

fn openai_tools(schemas: &[ToolSchema]) -> Result<Vec<ChatCompletionTool>, AgentError> {
    schemas
        .iter()
        .map(|s| {
            let func = FunctionObjectArgs::default()
                .name(&s.name)
                .description(&s.description)
                .parameters(s.parameters.clone())
                .build()
                .map_err(|e| AgentError::Schema(format!("function '{}': {}", s.name, e)))?;
            ChatCompletionToolArgs::default()
                .r#type(ChatCompletionToolType::Function)
                .function(func)
                .build()
                .map_err(|e| AgentError::Schema(format!("tool '{}': {}", s.name, e)))
        })
        .collect()
}

impl AgentLoop {
    /// Create a new agent loop.
    pub fn new(config: AppConfig, tool_registry: Arc<ToolRegistry>) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_base(&config.provider.api_base)
            .with_api_key(
                config
                    .provider
                    .api_key
                    .clone()
                    .unwrap_or_else(|| "not-needed".to_string()),
            );

        let client = Client::with_config(openai_config);
        Self {
            client,
            config,
            tool_registry,
        }
    }

    /// Run the agent for a single user turn. Takes the message history and the
    /// user's memories, returns the final assistant message and reports
    /// progress on the channel.
    pub async fn run(
        &self,
        messages: &[Message],
        memories: &[String],
        event_tx: mpsc::UnboundedSender<AgentEvent>,
    ) -> Result<Message, AgentError> {
        let tools = openai_tools(&self.tool_registry.schemas())?;

        // Running message list, extended with tool results.
        let mut running_messages = self.build_openai_messages(messages, memories)?;
        let mut iteration = 0;

        loop {
            iteration += 1;
            if iteration > MAX_TOOL_ITERATIONS {
                warn!("Hit max tool iterations ({}), forcing text response", MAX_TOOL_ITERATIONS);
                break;
            }

            debug!("Agent loop iteration {}", iteration);

            // Build the request.
            let mut request_builder = CreateChatCompletionRequestArgs::default();
            request_builder
                .model(&self.config.provider.model)
                .messages(running_messages.clone())
                .temperature(self.config.provider.temperature)
                .max_completion_tokens(self.config.provider.max_tokens);

            if !tools.is_empty() {
                request_builder.tools(tools.clone());
            }

            let request = request_builder
                .build()
                .map_err(|e| AgentError::Provider(e.to_string()))?;

            // Make the API call.
            let response = self
                .client
                .chat()
                .create(request)
                .await
                .map_err(|e| AgentError::Provider(e.to_string()))?;

            let choice = response
                .choices
                .first()
                .ok_or_else(|| AgentError::Provider("No choices in response".into()))?;

            let assistant_msg = &choice.message;
            let content = assistant_msg.content.clone().unwrap_or_default();

            // Check for tool calls.
            if let Some(tool_calls) = &assistant_msg.tool_calls {
                if !tool_calls.is_empty() {
                    // Send content tokens if any.
                    if !content.is_empty() {
                        let _ = event_tx.send(AgentEvent::ContentChunk(content.clone()));
                    }

                    running_messages.push(ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(&*content)
                            .tool_calls(tool_calls.clone())
                            .build()
                            .map_err(|e| AgentError::Provider(e.to_string()))?,
                    ));

                    let calls: Vec<ToolCall> = tool_calls
                        .iter()
                        .map(|tc| ToolCall {
                            id: tc.id.clone(),
                            name: tc.function.name.clone(),
                            arguments: tc.function.arguments.clone(),
                        })
                        .collect();

                    for tc in &calls {
                        let _ = event_tx.send(AgentEvent::ToolCallStart {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                        });
                        debug!(tool = %tc.name, "executing tool call");

                        let output = match serde_json::from_str::<serde_json::Value>(&tc.arguments) {
                            Ok(args) => self.tool_registry.execute(&tc.name, &tc.id, args).await,
                            Err(e) => {
                                ToolOutput::error(&tc.id, format!("Invalid JSON arguments: {}", e))
                            }
                        };

                        let _ = event_tx.send(AgentEvent::ToolResult(output.clone()));
                        running_messages.push(ChatCompletionRequestMessage::Tool(
                            ChatCompletionRequestToolMessageArgs::default()
                                .tool_call_id(&tc.id)
                                .content(&*output.content)
                                .build()
                                .map_err(|e| AgentError::Provider(e.to_string()))?,
                        ));
                    }

                    // The model still has to read the tool results.
                    continue;
                }
            }

            // No tool calls — this is the final text response.
            if !content.is_empty() {
                let _ = event_tx.send(AgentEvent::ContentChunk(content.clone()));
            }

            let final_message = Message::assistant(&content);
            let _ = event_tx.send(AgentEvent::Done(final_message.clone()));
            return Ok(final_message);
        }

        // If we hit max iterations, return whatever we have.
        let fallback = Message::assistant("[Agent reached maximum tool iterations]");
        let _ = event_tx.send(AgentEvent::Done(fallback.clone()));
        Ok(fallback)
    }

    /// Convert our Message types to async-openai request messages.
    fn build_openai_messages(
        &self,
        messages: &[Message],
        memories: &[String],
    ) -> Result<Vec<ChatCompletionRequestMessage>, AgentError> {
        let mut result = Vec::new();

        // Inject the system prompt unless the history carries its own.
        let has_system = messages.iter().any(|m| m.role == Role::System);
        if !has_system {
            let prompt = compose_system_prompt(self.config.system_prompt.as_deref(), memories);
            if let Some(sys_prompt) = &prompt {
                let sys_msg = ChatCompletionRequestSystemMessageArgs::default()
                    .content(sys_prompt.as_str())
                    .build()
                    .map_err(|e| AgentError::Provider(e.to_string()))?;
                result.push(ChatCompletionRequestMessage::System(sys_msg));
            }
        }

        for msg in messages {
            match msg.role {
                Role::System => {
                    let m = ChatCompletionRequestSystemMessageArgs::default()
                        .content(msg.content.as_str())
                        .build()
                        .map_err(|e| AgentError::Provider(e.to_string()))?;
                    result.push(ChatCompletionRequestMessage::System(m));
                }
                Role::User => {
                    let m = ChatCompletionRequestUserMessageArgs::default()
                        .content(msg.content.as_str())
                        .build()
                        .map_err(|e| AgentError::Provider(e.to_string()))?;
                    result.push(ChatCompletionRequestMessage::User(m));
                }
                Role::Assistant => {
                    let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
                    builder.content(msg.content.as_str());
                    if let Some(tool_calls) = &msg.tool_calls {
                        let tc_openai: Vec<ChatCompletionMessageToolCall> = tool_calls
                            .iter()
                            .map(|tc| ChatCompletionMessageToolCall {
                                id: tc.id.clone(),
                                r#type: ChatCompletionToolType::Function,
                                function: async_openai::types::FunctionCall {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect();
                        builder.tool_calls(tc_openai);
                    }
                    let m = builder
                        .build()
                        .map_err(|e| AgentError::Provider(e.to_string()))?;
                    result.push(ChatCompletionRequestMessage::Assistant(m));
                }
                Role::Tool => {
                    let m = ChatCompletionRequestToolMessageArgs::default()
                        .tool_call_id(msg.tool_call_id.as_deref().unwrap_or(""))
                        .content(msg.content.as_str())
                        .build()
                        .map_err(|e| AgentError::Provider(e.to_string()))?;
                    result.push(ChatCompletionRequestMessage::Tool(m));
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memories_are_appended_to_prompt() {
        let memories = vec!["Test memory 1".to_string(), "Test memory 2".to_string()];
        assert_eq!(
            compose_system_prompt(Some("Base."), &memories).unwrap(),
            "Base.\nUser Memories:\nTest memory 1\nTest memory 2"
        );
        assert_eq!(
            compose_system_prompt(None, &memories).unwrap(),
            "\nUser Memories:\nTest memory 1\nTest memory 2"
        );
    }

    #[test]
    fn test_prompt_without_memories_is_unchanged() {
        assert_eq!(compose_system_prompt(Some("Base."), &[]).as_deref(), Some("Base."));
        assert_eq!(compose_system_prompt(None, &[]), None);
    }

    #[test]
    fn test_openai_tools_from_schemas() {
        let schemas = vec![ToolSchema {
            name: "execute_code".into(),
            description: "Run code".into(),
            parameters: json!({"type": "object", "properties": {"code": {"type": "string"}}}),
        }];
        let tools = openai_tools(&schemas).unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].function.name, "execute_code");
    }

    #[test]
    fn test_history_gets_system_prompt_once() {
        let agent = AgentLoop::new(AppConfig::default(), Arc::new(ToolRegistry::new()));
        let history = vec![Message::user("hello")];
        let built = agent
            .build_openai_messages(&history, &["likes tea".to_string()])
            .unwrap();
        assert_eq!(built.len(), 2);
        assert!(matches!(built[0], ChatCompletionRequestMessage::System(_)));

        let history = vec![Message::system("custom"), Message::user("hello")];
        let built = agent.build_openai_messages(&history, &[]).unwrap();
        assert_eq!(built.len(), 2);
    }
}
