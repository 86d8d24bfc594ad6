//! 默认执行器：每轮先问 Monitor 用哪个档位，再把 system + 历史发给该档位的后端
//!
//! 工具图（工具调用如何解析执行）在外部实现；这里只把工具清单写进系统提示词。

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{AgentMode, ToolSpec};
use crate::core::{AgentError, ErrorClassifier};
use crate::executor::{CapacityRetry, Executor, ExecutorFactory, ExecutorOutput, RuntimeOptions};
use crate::llm::{Monitor, Tier, TierBinding, TierRegistry};
use crate::memory::{ConversationMemory, Message};

/// 简化重试后保留的消息条数
const SHRUNK_CONTEXT_MESSAGES: usize = 2;

pub struct TurnExecutor {
    tier: Tier,
    thread_id: String,
    registry: Arc<TierRegistry>,
    monitor: Option<Arc<Monitor>>,
    system_prompt: String,
    conversation: ConversationMemory,
}

impl TurnExecutor {
    pub fn new(
        tier: Tier,
        registry: Arc<TierRegistry>,
        system_prompt: impl Into<String>,
        max_context_turns: usize,
    ) -> Self {
        Self {
            tier,
            thread_id: uuid::Uuid::new_v4().to_string(),
            registry,
            monitor: None,
            system_prompt: system_prompt.into(),
            conversation: ConversationMemory::new(max_context_turns),
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn history(&self) -> &[Message] {
        self.conversation.messages()
    }

    /// Monitor 建议的档位；不可用时退回绑定档位
    async fn select_tier(&self) -> Tier {
        let Some(monitor) = &self.monitor else {
            return self.tier;
        };
        let task = self.conversation.last_user_content().unwrap_or_default();
        let advised = monitor.decide(self.conversation.messages(), task).await;
        if self.registry.is_available(advised) {
            advised
        } else {
            tracing::debug!("Advised tier '{}' unavailable, using '{}'", advised, self.tier);
            self.tier
        }
    }
}

#[async_trait]
impl Executor for TurnExecutor {
    async fn invoke(
        &mut self,
        initial_messages: Vec<Message>,
        options: &RuntimeOptions,
    ) -> Result<ExecutorOutput, AgentError> {
        self.conversation.extend(initial_messages);

        let tier = self.select_tier().await;
        let client = self
            .registry
            .client(tier)
            .ok_or(AgentError::TierUnavailable(tier))?;

        let mut messages = Vec::with_capacity(self.conversation.len() + 1);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend_from_slice(self.conversation.messages());

        tracing::debug!(
            iteration = options.iteration,
            thread = %self.thread_id,
            tier = %tier,
            messages = messages.len(),
            "Invoking backend"
        );
        let reply = client.complete(&messages).await?;

        if !reply.trim().is_empty() {
            self.conversation.push(Message::assistant(reply));
        }
        Ok(ExecutorOutput::new(self.conversation.messages().to_vec()))
    }

    fn tier(&self) -> Tier {
        self.tier
    }

    fn thread_id(&self) -> &str {
        &self.thread_id
    }

    fn shrink_context(&mut self) {
        let keep = self.conversation.tail(SHRUNK_CONTEXT_MESSAGES).to_vec();
        self.conversation.clear();
        self.conversation.extend(keep);
    }
}

/// 把基础提示词、运行模式与工具清单拼成系统提示词
pub fn compose_system_prompt(base: &str, mode: AgentMode, tools: &[ToolSpec]) -> String {
    let mut prompt = base.trim_end().to_string();
    prompt.push_str(&format!("\n\n## Mode\n{}", mode));
    if !tools.is_empty() {
        prompt.push_str("\n\n## Available tools\n");
        for tool in tools {
            prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        }
    }
    prompt
}

/// 默认执行器工厂
pub struct TurnExecutorFactory {
    registry: Arc<TierRegistry>,
    monitor: Option<Arc<Monitor>>,
    base_prompt: String,
    tools: Vec<ToolSpec>,
    max_context_turns: usize,
    /// 设置后用 CapacityRetry 包装
    capacity_retry: Option<Arc<dyn ErrorClassifier>>,
}

impl TurnExecutorFactory {
    pub fn new(registry: Arc<TierRegistry>, base_prompt: impl Into<String>) -> Self {
        Self {
            registry,
            monitor: None,
            base_prompt: base_prompt.into(),
            tools: Vec::new(),
            max_context_turns: 20,
            capacity_retry: None,
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_context_turns(mut self, turns: usize) -> Self {
        self.max_context_turns = turns;
        self
    }

    pub fn with_capacity_retry(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.capacity_retry = Some(classifier);
        self
    }
}

impl ExecutorFactory for TurnExecutorFactory {
    fn build(&self, binding: &TierBinding, mode: AgentMode) -> Result<Box<dyn Executor>, AgentError> {
        if !self.registry.is_available(binding.tier) {
            return Err(AgentError::TierUnavailable(binding.tier));
        }

        let prompt = compose_system_prompt(&self.base_prompt, mode, &self.tools);
        let mut executor = TurnExecutor::new(
            binding.tier,
            Arc::clone(&self.registry),
            prompt,
            self.max_context_turns,
        );
        if let Some(monitor) = &self.monitor {
            executor = executor.with_monitor(Arc::clone(monitor));
        }

        match &self.capacity_retry {
            Some(classifier) => Ok(Box::new(CapacityRetry::new(
                Box::new(executor),
                Arc::clone(classifier),
            ))),
            None => Ok(Box::new(executor)),
        }
    }
}
