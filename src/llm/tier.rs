//! 模型档位注册表
//!
//! 三个固定档位（fast / smart / cheap）各绑定一个后端与凭证，启动时构建一次，之后只读。
//! - 缺少凭证且 provider 需要凭证的档位标记为不可用（只告警，不阻止启动）
//! - smart 是默认 / 基线档位，缺失即为致命配置错误

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{TierSection, TiersSection};
use crate::core::AgentError;
use crate::llm::{create_deepseek_client, create_ollama_client, LlmClient, MockLlmClient, OpenAiClient};

/// 模型档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// 快速轻量
    Fast,
    /// 能力最强，默认档位
    #[default]
    Smart,
    /// 成本最低
    Cheap,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Fast, Tier::Smart, Tier::Cheap];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Fast => "fast",
            Tier::Smart => "smart",
            Tier::Cheap => "cheap",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Tier::Fast),
            "smart" => Ok(Tier::Smart),
            "cheap" => Ok(Tier::Cheap),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

/// 后端提供方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    DeepSeek,
    /// 本地模型，无需凭证
    Ollama,
    /// 离线回显，无需凭证
    Mock,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::DeepSeek => "deepseek",
            Provider::Ollama => "ollama",
            Provider::Mock => "mock",
        }
    }

    pub fn requires_credential(&self) -> bool {
        matches!(self, Provider::OpenAi | Provider::DeepSeek)
    }
}

/// API Key；Debug 输出时打码
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// 凭证来源：按 provider 名（或自定义环境变量名）查找
pub trait CredentialSource: Send + Sync {
    fn lookup(&self, key: &str) -> Option<Credential>;
}

/// 从进程环境读取；key 既可是 provider 名也可是环境变量名
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn lookup(&self, key: &str) -> Option<Credential> {
        let var = match key {
            "openai" => "OPENAI_API_KEY",
            "deepseek" => "DEEPSEEK_API_KEY",
            other => other,
        };
        std::env::var(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(Credential::new)
    }
}

/// 内存凭证表（测试或嵌入式场景）
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    entries: HashMap<String, Credential>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.entries.insert(key.into(), Credential::new(secret));
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn lookup(&self, key: &str) -> Option<Credential> {
        self.entries.get(key).cloned()
    }
}

/// 档位绑定：provider / model / 凭证
#[derive(Debug, Clone)]
pub struct TierBinding {
    pub tier: Tier,
    pub provider: Provider,
    pub model: String,
    pub base_url: Option<String>,
    pub credential: Option<Credential>,
}

impl TierBinding {
    /// 有凭证或 provider 不需要凭证时可用
    pub fn is_usable(&self) -> bool {
        self.credential.is_some() || !self.provider.requires_credential()
    }
}

/// 为绑定构造后端句柄
pub trait BackendFactory: Send + Sync {
    fn build(&self, binding: &TierBinding) -> Result<Arc<dyn LlmClient>, AgentError>;
}

impl<F> BackendFactory for F
where
    F: Fn(&TierBinding) -> Result<Arc<dyn LlmClient>, AgentError> + Send + Sync,
{
    fn build(&self, binding: &TierBinding) -> Result<Arc<dyn LlmClient>, AgentError> {
        self(binding)
    }
}

/// 默认工厂：按 provider 构造 OpenAI 兼容客户端
#[derive(Debug, Default, Clone, Copy)]
pub struct ProviderBackends;

impl BackendFactory for ProviderBackends {
    fn build(&self, binding: &TierBinding) -> Result<Arc<dyn LlmClient>, AgentError> {
        let key = binding.credential.as_ref().map(Credential::expose);
        let base = binding.base_url.as_deref();
        let client: Arc<dyn LlmClient> = match binding.provider {
            Provider::OpenAi => Arc::new(OpenAiClient::new(base, &binding.model, key)),
            Provider::DeepSeek => {
                let key = key.ok_or(AgentError::TierUnavailable(binding.tier))?;
                Arc::new(create_deepseek_client(base, Some(&binding.model), key))
            }
            Provider::Ollama => Arc::new(create_ollama_client(base, &binding.model)),
            Provider::Mock => Arc::new(MockLlmClient),
        };
        Ok(client)
    }
}

/// 一个可用档位：绑定 + 已构造的后端
#[derive(Clone)]
pub struct TierEntry {
    pub binding: TierBinding,
    pub client: Arc<dyn LlmClient>,
}

/// 档位注册表：按封闭枚举定长存储，smart 必有
pub struct TierRegistry {
    fast: Option<TierEntry>,
    smart: TierEntry,
    cheap: Option<TierEntry>,
}

impl TierRegistry {
    /// 从配置构建；只有 smart 不可用时报错
    pub fn build(
        tiers: &TiersSection,
        credentials: &dyn CredentialSource,
        backends: &dyn BackendFactory,
    ) -> Result<Self, AgentError> {
        let fast = Self::optional_entry(Tier::Fast, &tiers.fast, credentials, backends);
        let cheap = Self::optional_entry(Tier::Cheap, &tiers.cheap, credentials, backends);
        let smart = Self::build_entry(Tier::Smart, &tiers.smart, credentials, backends)?
            .ok_or_else(|| {
                AgentError::Config(format!(
                    "smart tier ({} / {}) has no credential; it is mandatory",
                    tiers.smart.provider.name(),
                    tiers.smart.model
                ))
            })?;

        tracing::info!(
            smart = %smart.binding.model,
            fast = fast.is_some(),
            cheap = cheap.is_some(),
            "Tier registry ready"
        );

        Ok(Self { fast, smart, cheap })
    }

    /// 可选档位：构造失败只告警
    fn optional_entry(
        tier: Tier,
        section: &TierSection,
        credentials: &dyn CredentialSource,
        backends: &dyn BackendFactory,
    ) -> Option<TierEntry> {
        Self::build_entry(tier, section, credentials, backends).unwrap_or_else(|e| {
            tracing::warn!("Tier '{}' unavailable: {}", tier, e);
            None
        })
    }

    fn build_entry(
        tier: Tier,
        section: &TierSection,
        credentials: &dyn CredentialSource,
        backends: &dyn BackendFactory,
    ) -> Result<Option<TierEntry>, AgentError> {
        let lookup_key = section
            .api_key_env
            .as_deref()
            .unwrap_or_else(|| section.provider.name());
        let binding = TierBinding {
            tier,
            provider: section.provider,
            model: section.model.clone(),
            base_url: section.base_url.clone(),
            credential: credentials.lookup(lookup_key),
        };

        if !binding.is_usable() {
            tracing::warn!(
                "Tier '{}' unavailable: no credential for provider '{}' (looked up '{}')",
                tier,
                binding.provider.name(),
                lookup_key
            );
            return Ok(None);
        }

        let client = backends.build(&binding)?;
        Ok(Some(TierEntry { binding, client }))
    }

    fn entry(&self, tier: Tier) -> Option<&TierEntry> {
        match tier {
            Tier::Fast => self.fast.as_ref(),
            Tier::Smart => Some(&self.smart),
            Tier::Cheap => self.cheap.as_ref(),
        }
    }

    /// 档位 -> 绑定；不可用时返回 None
    pub fn resolve(&self, tier: Tier) -> Option<&TierBinding> {
        self.entry(tier).map(|e| &e.binding)
    }

    /// 档位 -> 可调用的后端
    pub fn client(&self, tier: Tier) -> Option<Arc<dyn LlmClient>> {
        self.entry(tier).map(|e| Arc::clone(&e.client))
    }

    pub fn is_available(&self, tier: Tier) -> bool {
        self.entry(tier).is_some()
    }

    pub fn available(&self) -> Vec<Tier> {
        Tier::ALL
            .into_iter()
            .filter(|t| self.is_available(*t))
            .collect()
    }
}
