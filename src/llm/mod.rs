//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Ollama / Mock）、档位注册表与 Monitor

pub mod deepseek;
pub mod mock;
pub mod monitor;
pub mod openai;
pub mod tier;
pub mod traits;

pub use deepseek::{create_deepseek_client, create_ollama_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use monitor::{parse_decision, Monitor};
pub use openai::{OpenAiClient, TokenUsage};
pub use tier::{
    BackendFactory, Credential, CredentialSource, EnvCredentials, Provider, ProviderBackends,
    StaticCredentials, Tier, TierBinding, TierEntry, TierRegistry,
};
pub use traits::{LlmClient, LlmError, TokenStream};
