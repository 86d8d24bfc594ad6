//! 执行器接口
//!
//! 执行器是有状态的会话对象：一次 invoke 跑完一整轮（提示进、工具调用、回复出）。
//! 执行器只由 ExecutorLifecycle 通过 ExecutorFactory 构造。

use async_trait::async_trait;
use serde::Serialize;

use crate::config::AgentMode;
use crate::core::AgentError;
use crate::llm::{Tier, TierBinding};
use crate::memory::{Message, Role};

/// 单轮运行参数
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeOptions {
    /// 会话标识，同一执行器实例内保持不变
    pub thread_id: String,
    /// 自主循环的迭代序号（对话模式为 0）
    pub iteration: u64,
}

impl RuntimeOptions {
    pub fn new(thread_id: impl Into<String>, iteration: u64) -> Self {
        Self {
            thread_id: thread_id.into(),
            iteration,
        }
    }
}

/// 单轮结果：本轮结束时的消息序列
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutorOutput {
    pub messages: Vec<Message>,
}

impl ExecutorOutput {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// 最后一条非空 assistant 消息；没有则视为空回复
    pub fn final_content(&self) -> Option<&str> {
        self.messages
            .last()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
            .filter(|c| !c.trim().is_empty())
    }
}

#[async_trait]
pub trait Executor: Send {
    async fn invoke(
        &mut self,
        initial_messages: Vec<Message>,
        options: &RuntimeOptions,
    ) -> Result<ExecutorOutput, AgentError>;

    /// 构造时绑定的档位
    fn tier(&self) -> Tier;

    /// 会话标识
    fn thread_id(&self) -> &str;

    /// 丢弃大部分累积上下文，只留最近一两条；用于容量超限后的简化重试
    fn shrink_context(&mut self) {}
}

/// 从档位绑定 + 运行模式构造执行器
pub trait ExecutorFactory: Send + Sync {
    fn build(&self, binding: &TierBinding, mode: AgentMode) -> Result<Box<dyn Executor>, AgentError>;
}

impl<F> ExecutorFactory for F
where
    F: Fn(&TierBinding, AgentMode) -> Result<Box<dyn Executor>, AgentError> + Send + Sync,
{
    fn build(&self, binding: &TierBinding, mode: AgentMode) -> Result<Box<dyn Executor>, AgentError> {
        self(binding, mode)
    }
}
