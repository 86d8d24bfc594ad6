//! Monitor：为下一轮挑选模型档位
//!
//! 取最近若干轮历史 + 当前任务，交给轻量档位（优先 fast，其次 cheap）判断下一轮该用 fast / smart / cheap。
//! 纯建议性质：任何失败（无轻量档位、后端报错、回复无法解析）都退回 smart，绝不向调用方抛错。

use std::sync::Arc;

use crate::llm::{Tier, TierRegistry};
use crate::memory::Message;

/// 默认参考的历史条数
pub const DEFAULT_HISTORY_TURNS: usize = 10;

/// 单条历史在提示词中的最大字符数
const TURN_PREVIEW_CHARS: usize = 400;

const DEFAULT_PROMPT_TEMPLATE: &str = "\
You route work between three model tiers for an autonomous agent.
- fast: quick, simple, routine actions
- smart: complex reasoning, multi-step planning, error analysis
- cheap: repetitive low-stakes work where cost matters most

Recent turns:
{history}

Current task:
{task}

Reply with exactly one word: fast, smart or cheap.";

/// 档位决策器
pub struct Monitor {
    registry: Arc<TierRegistry>,
    history_turns: usize,
    prompt_template: String,
}

impl Monitor {
    pub fn new(registry: Arc<TierRegistry>) -> Self {
        Self {
            registry,
            history_turns: DEFAULT_HISTORY_TURNS,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
        }
    }

    pub fn with_history_turns(mut self, turns: usize) -> Self {
        self.history_turns = turns.max(1);
        self
    }

    /// 模板占位符：{history}、{task}
    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    /// 执行决策的档位：fast > cheap；都不可用时为 None
    pub fn monitor_tier(&self) -> Option<Tier> {
        [Tier::Fast, Tier::Cheap]
            .into_iter()
            .find(|t| self.registry.is_available(*t))
    }

    pub async fn decide(&self, history: &[Message], current_task: &str) -> Tier {
        let Some(tier) = self.monitor_tier() else {
            tracing::debug!("No monitor tier available, defaulting to smart");
            return Tier::Smart;
        };
        let Some(client) = self.registry.client(tier) else {
            return Tier::Smart;
        };

        let prompt = self.render_prompt(history, current_task);
        match client.complete(&[Message::user(prompt)]).await {
            Ok(reply) => match parse_decision(&reply) {
                Some(decision) => {
                    tracing::debug!(monitor = %tier, decision = %decision, "Monitor decided tier");
                    decision
                }
                None => {
                    tracing::warn!("Monitor reply not understood ({:?}), defaulting to smart", reply);
                    Tier::Smart
                }
            },
            Err(e) => {
                tracing::warn!("Monitor call failed ({}), defaulting to smart", e);
                Tier::Smart
            }
        }
    }

    fn render_prompt(&self, history: &[Message], current_task: &str) -> String {
        let start = history.len().saturating_sub(self.history_turns);
        let rendered = history[start..]
            .iter()
            .map(|m| {
                let preview: String = m.content.chars().take(TURN_PREVIEW_CHARS).collect();
                format!("[{}] {}", m.role.as_str(), preview)
            })
            .collect::<Vec<_>>()
            .join("\n");
        let rendered = if rendered.is_empty() {
            "(none)".to_string()
        } else {
            rendered
        };

        self.prompt_template
            .replace("{history}", &rendered)
            .replace("{task}", current_task)
    }
}

/// 取回复中第一个档位名（整词，不区分大小写）
pub fn parse_decision(reply: &str) -> Option<Tier> {
    reply
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .find_map(|w| w.parse::<Tier>().ok())
}
