//! OpenAI 兼容的第三方端点：DeepSeek 与本地 Ollama
//!
//! - DeepSeek Base URL: https://api.deepseek.com，需要 `DEEPSEEK_API_KEY`
//! - Ollama Base URL: http://localhost:11434/v1，无需 Key

use crate::llm::OpenAiClient;

/// DeepSeek API 常量
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// Ollama 默认本地端点
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// 创建 DeepSeek 客户端
///
/// - `deepseek-chat`: 常规对话，响应快
/// - `deepseek-reasoner`: 思考模式，适合复杂推理
pub fn create_deepseek_client(
    base_url: Option<&str>,
    model: Option<&str>,
    api_key: &str,
) -> OpenAiClient {
    let model = model.unwrap_or(DEEPSEEK_CHAT);
    OpenAiClient::new(
        Some(base_url.unwrap_or(DEEPSEEK_BASE_URL)),
        model,
        Some(api_key),
    )
}

/// 创建 Ollama 客户端（本地模型，不需要凭证）
pub fn create_ollama_client(base_url: Option<&str>, model: &str) -> OpenAiClient {
    OpenAiClient::new(Some(base_url.unwrap_or(OLLAMA_BASE_URL)), model, None)
}
