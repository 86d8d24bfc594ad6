//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AUTOPILOT__*` 覆盖（双下划线表示嵌套，如 `AUTOPILOT__APP__MODE=chat`）。
//! 凭证不在配置文件里，只在启动时从进程环境读取（见 llm::tier::EnvCredentials）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::llm::Provider;

/// 运行模式：交互式对话 / 自主循环
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    Chat,
    #[default]
    Autonomous,
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentMode::Chat => write!(f, "chat"),
            AgentMode::Autonomous => write!(f, "autonomous"),
        }
    }
}

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub autonomous: AutonomousSection,
    /// 向执行器声明的工具清单（工具本身由外部工具图实现）
    pub tools: Vec<ToolSpec>,
}

/// [app] 段：应用名、运行模式、日志级别、系统提示词路径
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    pub mode: AgentMode,
    /// EnvFilter 默认指令，RUST_LOG 优先
    pub log_level: String,
    /// 未设置时依次查找 config/prompts/{mode}.md
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            mode: AgentMode::Autonomous,
            log_level: "info".to_string(),
            system_prompt_path: None,
        }
    }
}

/// [llm] 段：三个固定档位
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LlmSection {
    pub tiers: TiersSection,
}

/// [llm.tiers] 段：fast / smart / cheap 各自的后端
#[derive(Debug, Clone, Deserialize)]
pub struct TiersSection {
    #[serde(default = "default_fast_tier")]
    pub fast: TierSection,
    #[serde(default = "default_smart_tier")]
    pub smart: TierSection,
    #[serde(default = "default_cheap_tier")]
    pub cheap: TierSection,
}

impl Default for TiersSection {
    fn default() -> Self {
        Self {
            fast: default_fast_tier(),
            smart: default_smart_tier(),
            cheap: default_cheap_tier(),
        }
    }
}

/// 单个档位：provider + model，可选 base_url 与自定义 Key 环境变量名
#[derive(Debug, Clone, Deserialize)]
pub struct TierSection {
    pub provider: Provider,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// 覆盖 provider 默认的 Key 环境变量（如 `MY_PROXY_KEY`）
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_fast_tier() -> TierSection {
    TierSection {
        provider: Provider::OpenAi,
        model: "gpt-4o-mini".to_string(),
        base_url: None,
        api_key_env: None,
    }
}

fn default_smart_tier() -> TierSection {
    TierSection {
        provider: Provider::OpenAi,
        model: "gpt-4o".to_string(),
        base_url: None,
        api_key_env: None,
    }
}

fn default_cheap_tier() -> TierSection {
    TierSection {
        provider: Provider::DeepSeek,
        model: "deepseek-chat".to_string(),
        base_url: None,
        api_key_env: None,
    }
}

/// [autonomous] 段：节奏、截断上限、提示词
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutonomousSection {
    /// 成功响应后的基础等待（毫秒）
    pub base_interval_ms: u64,
    /// 单次响应展示的 token 上限，超出则截断
    pub token_ceiling: usize,
    /// Monitor 参考的最近轮数
    pub monitor_history_turns: usize,
    /// 执行器内部保留的对话轮数
    pub max_context_turns: usize,
    pub continue_prompt: String,
    /// tokens_error_count > 0 时使用
    pub reduced_scope_prompt: String,
    /// 执行器遇到容量错误时是否用简化提示重试一次
    pub retry_on_capacity: bool,
}

impl Default for AutonomousSection {
    fn default() -> Self {
        Self {
            base_interval_ms: 5000,
            token_ceiling: 20_000,
            monitor_history_turns: 10,
            max_context_turns: 20,
            continue_prompt: "Continue with your autonomous operation. Review the current \
                state, choose the next most valuable action and perform it."
                .to_string(),
            reduced_scope_prompt: "Continue with your autonomous operation, but keep the \
                scope small: perform a single simple action and keep the response brief."
                .to_string(),
            retry_on_capacity: true,
        }
    }
}

/// 工具描述（名称 + 一句话说明）
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
}

/// 从 config 目录加载配置，环境变量 AUTOPILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AUTOPILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AUTOPILOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 读取系统提示词：显式路径 > config/prompts/{mode}.md > 内置默认
pub fn load_system_prompt(app: &AppSection) -> String {
    if let Some(path) = &app.system_prompt_path {
        match std::fs::read_to_string(path) {
            Ok(text) => return text,
            Err(e) => tracing::warn!(
                "Failed to read system prompt {} ({}), falling back",
                path.display(),
                e
            ),
        }
    }

    let mode = app.mode.to_string();
    [
        format!("config/prompts/{}.md", mode),
        format!("../config/prompts/{}.md", mode),
    ]
    .into_iter()
    .find_map(|p| std::fs::read_to_string(p).ok())
    .unwrap_or_else(|| default_system_prompt(app.mode).to_string())
}

fn default_system_prompt(mode: AgentMode) -> &'static str {
    match mode {
        AgentMode::Chat => {
            "You are an on-chain automation assistant. Answer the operator's questions and \
             perform the actions they request using the available tools."
        }
        AgentMode::Autonomous => {
            "You are an autonomous on-chain automation agent. On every turn, inspect the \
             current state, decide on one concrete action, perform it with the available \
             tools and report what you did in a few sentences."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.mode, AgentMode::Autonomous);
        assert_eq!(cfg.autonomous.base_interval_ms, 5000);
        assert_eq!(cfg.autonomous.token_ceiling, 20_000);
        assert_eq!(cfg.autonomous.monitor_history_turns, 10);
        assert_eq!(cfg.llm.tiers.smart.provider, Provider::OpenAi);
        assert_eq!(cfg.llm.tiers.cheap.provider, Provider::DeepSeek);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[app]
mode = "chat"

[llm.tiers.smart]
provider = "ollama"
model = "llama3"

[autonomous]
base_interval_ms = 1200

[[tools]]
name = "get_balance"
description = "Read the wallet balance"
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.app.mode, AgentMode::Chat);
        assert_eq!(cfg.llm.tiers.smart.provider, Provider::Ollama);
        assert_eq!(cfg.llm.tiers.smart.model, "llama3");
        // 未写的档位与字段保持默认
        assert_eq!(cfg.llm.tiers.fast.model, "gpt-4o-mini");
        assert_eq!(cfg.autonomous.base_interval_ms, 1200);
        assert_eq!(cfg.autonomous.token_ceiling, 20_000);
        assert_eq!(cfg.tools.len(), 1);
        assert_eq!(cfg.tools[0].name, "get_balance");
    }

    #[test]
    fn test_system_prompt_falls_back_per_mode() {
        let app = AppSection {
            system_prompt_path: Some(PathBuf::from("/nonexistent/prompt.md")),
            mode: AgentMode::Chat,
            ..AppSection::default()
        };
        let prompt = load_system_prompt(&app);
        assert!(prompt.contains("assistant"));
    }
}
