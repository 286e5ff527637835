use crate::store::{DocumentStore, Query};
use agent_core::config::AppConfig;
use agent_core::error::AgentError;
use agent_core::tool_registry::{required_str, Tool};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

const DEFAULT_MEDIA_TYPE: &str = "image/jpeg";

/// A language model that can answer questions about an image.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn analyze(
        &self,
        system_prompt: &str,
        query: &str,
        image: &[u8],
        media_type: &str,
    ) -> Result<String, AgentError>;
}

/// [`VisionModel`] over an OpenAI-compatible chat endpoint, sending the image
/// inline as a data URL.
pub struct OpenAiVision {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiVision {
    pub fn new(config: &AppConfig) -> Self {
        let (api_base, api_key) = config.vision_endpoint();
        let openai_config = OpenAIConfig::new()
            .with_api_base(api_base)
            .with_api_key(api_key.unwrap_or_else(|| "not-needed".to_string()));
        Self {
            client: Client::with_config(openai_config),
            model: config.vision.model.clone(),
        }
    }
}

fn vision_error(e: impl std::fmt::Display) -> AgentError {
    AgentError::Vision(e.to_string())
}

#[async_trait]
impl VisionModel for OpenAiVision {
    async fn analyze(
        &self,
        system_prompt: &str,
        query: &str,
        image: &[u8],
        media_type: &str,
    ) -> Result<String, AgentError> {
        let data_url = format!("data:{};base64,{}", media_type, STANDARD.encode(image));
        let parts = vec![
            ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(query)
                    .build()
                    .map_err(vision_error)?,
            ),
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(
                        ImageUrlArgs::default()
                            .url(data_url)
                            .detail(ImageDetail::Auto)
                            .build()
                            .map_err(vision_error)?,
                    )
                    .build()
                    .map_err(vision_error)?,
            ),
        ];
        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_prompt)
                    .build()
                    .map_err(vision_error)?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(parts)
                    .build()
                    .map_err(vision_error)?,
            ),
        ];
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(vision_error)?;

        debug!(model = %self.model, bytes = image.len(), "vision request");
        let response = self.client.chat().create(request).await.map_err(vision_error)?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AgentError::Vision("empty response".into()))
    }
}

pub fn is_image_type(file_type: &str) -> bool {
    let file_type = file_type.to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| file_type.ends_with(ext))
}

/// Answers questions about an image stored in the knowledge base.
pub struct ImageAnalysisTool {
    store: Arc<dyn DocumentStore>,
    vision: Arc<dyn VisionModel>,
}

impl ImageAnalysisTool {
    pub fn new(store: Arc<dyn DocumentStore>, vision: Arc<dyn VisionModel>) -> Self {
        Self { store, vision }
    }

    async fn analyze(&self, document_id: &str, query: &str) -> Result<String, AgentError> {
        let metadata = self
            .store
            .select("document_metadata", &Query::all().eq("id", document_id))
            .await?;
        let Some(doc) = metadata.first() else {
            return Ok(format!("Image with ID {} not found.", document_id));
        };

        let file_type = doc
            .get("file_type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_lowercase();
        if !is_image_type(&file_type) {
            return Ok(format!(
                "Document with ID {} is not an image (type: {}).",
                document_id, file_type
            ));
        }

        let binaries = self
            .store
            .select("document_binary", &Query::all().eq("document_id", document_id))
            .await?;
        let Some(binary) = binaries.first() else {
            return Ok(format!(
                "Binary data for image with ID {} not found.",
                document_id
            ));
        };

        let encoded = binary
            .get("binary_data")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let media_type = binary
            .get("mime_type")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_MEDIA_TYPE);
        let image = STANDARD
            .decode(encoded.trim())
            .map_err(|e| AgentError::Vision(format!("invalid image data: {}", e)))?;

        let system_prompt = format!(
            "You are an AI that analyzes images. Answer the following question about the image: {}",
            query
        );
        self.vision
            .analyze(&system_prompt, query, &image, media_type)
            .await
    }
}

#[async_trait]
impl Tool for ImageAnalysisTool {
    fn name(&self) -> &str {
        "image_analysis"
    }

    fn description(&self) -> &str {
        "Analyze an image from the knowledge base with a vision model. Pass the image's \
         document ID and what you want to know about it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "document_id": {
                    "type": "string",
                    "description": "The ID (or file path) of the image to analyze"
                },
                "query": {
                    "type": "string",
                    "description": "What to extract from the image"
                }
            },
            "required": ["document_id", "query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        let document_id = required_str(&args, "document_id")?;
        let query = required_str(&args, "query")?;
        Ok(self.analyze(document_id, query).await.unwrap_or_else(|e| {
            warn!("Error analyzing image: {}", e);
            format!("Error analyzing image: {}", e)
        }))
    }
}
