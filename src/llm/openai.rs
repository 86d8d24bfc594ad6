//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；DeepSeek、Ollama、自建代理都走这里。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client 与 model 名，complete 时转 Message 为 API 格式并取首条 content
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    /// api_key 为 None 时使用占位值（Ollama 等本地端点不校验 Key）
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key.unwrap_or("sk-placeholder").to_string();

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        messages
            .iter()
            .map(|m| {
                let msg = match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                    // 工具结果没有 tool_call_id 可关联，按 user 角色回传给模型
                    Role::Tool => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(format!("Tool result: {}", m.content))
                            .build()?,
                    ),
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                };
                Ok(msg)
            })
            .collect()
    }
}

/// 把 async_openai 的错误映射为 LlmError；保留原始文本供分类器识别
fn map_openai_error(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::Reqwest(e) => LlmError::Network(e.to_string()),
        OpenAIError::ApiError(api) => {
            let code = api.code.clone().unwrap_or_default();
            if code == "context_length_exceeded" {
                LlmError::ContextLengthExceeded(api.message)
            } else if code == "rate_limit_exceeded" {
                // 限流码下也可能是单次请求过大，原文要交给分类器
                LlmError::RateLimited {
                    retry_after_ms: 0,
                    message: api.message,
                }
            } else {
                LlmError::Api(api.message)
            }
        }
        other => LlmError::Api(other.to_string()),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages).map_err(map_openai_error)?)
            .build()
            .map_err(map_openai_error)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        // 提取 token 使用统计
        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::error::ApiError;

    use crate::core::{AgentError, ErrorClassifier, FailureClassification, MarkerClassifier};

    fn api_error(message: &str, code: &str) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: message.to_string(),
            r#type: Some("tokens".to_string()),
            param: None,
            code: Some(code.to_string()),
        })
    }

    #[test]
    fn test_oversized_request_under_rate_limit_code_is_capacity() {
        let err = map_openai_error(api_error(
            "Request too large for gpt-4o in organization org-x on tokens per min (TPM): Limit 30000, Requested 41200.",
            "rate_limit_exceeded",
        ));
        assert!(matches!(err, LlmError::RateLimited { retry_after_ms: 0, .. }));
        assert!(err.to_string().contains("Request too large for gpt-4o"));

        let wrapped = AgentError::Llm(err);
        assert_eq!(
            MarkerClassifier::new().classify_error(&wrapped),
            FailureClassification::CapacityExceeded
        );
    }

    #[test]
    fn test_plain_rate_limit_stays_general() {
        let err = map_openai_error(api_error(
            "Rate limit reached for gpt-4o on requests per min (RPM): Limit 500.",
            "rate_limit_exceeded",
        ));
        assert_eq!(
            MarkerClassifier::new().classify_error(&AgentError::Llm(err)),
            FailureClassification::General
        );
    }

    #[test]
    fn test_context_length_code_keeps_message() {
        let err = map_openai_error(api_error(
            "This model's maximum context length is 128000 tokens.",
            "context_length_exceeded",
        ));
        assert_eq!(
            err,
            LlmError::ContextLengthExceeded("This model's maximum context length is 128000 tokens.".into())
        );
    }
}
