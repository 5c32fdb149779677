/// The seam between the assistant and the remote model.
///
/// Components receive an `Arc<dyn ChatCompleter>` at construction time instead
/// of reaching for a process-wide client, so tests can substitute a fake.
use async_trait::async_trait;
use tracing::debug;

use crate::error::CompletionError;
use crate::openai::{ChatCompletionRequest, ChatCompletionResponse, Message, OpenAiClient};

/// Sampling parameters for one call site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodingConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl DecodingConfig {
    pub fn request(&self, model: &str, messages: Vec<Message>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: model.to_string(),
            messages,
            temperature: Some(self.temperature),
            top_p: Some(self.top_p),
            max_tokens: Some(self.max_tokens),
        }
    }
}

#[async_trait]
pub trait ChatCompleter: Send + Sync {
    /// Submit the request and return the text of the first choice.
    async fn complete(&self, request: ChatCompletionRequest) -> Result<String, CompletionError>;
}

#[async_trait]
impl ChatCompleter for OpenAiClient {
    async fn complete(&self, request: ChatCompletionRequest) -> Result<String, CompletionError> {
        let response = self.chat_completions(request, None).await?;
        if let Some(usage) = &response.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "completion usage"
            );
        }
        first_choice_text(&response)
    }
}

fn first_choice_text(response: &ChatCompletionResponse) -> Result<String, CompletionError> {
    response
        .first_content()
        .map(str::to_string)
        .ok_or(CompletionError::EmptyCompletion)
}
