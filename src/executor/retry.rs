//! 容量超限重试装饰器
//!
//! 包住任意执行器，实现同一个 Executor 接口：内层因容量超限失败时，
//! 先让内层丢弃大部分上下文，再用简化提示重试一次。第二次失败与其它错误原样返回。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{AgentError, ErrorClassifier, FailureClassification};
use crate::executor::{Executor, ExecutorOutput, RuntimeOptions};
use crate::llm::Tier;
use crate::memory::{Message, Role};

/// 简化提示中保留的原始任务字符数
const SIMPLIFIED_TASK_CHARS: usize = 500;

const SIMPLIFIED_SUFFIX: &str = "The previous attempt was rejected for being too large. \
Perform only the smallest useful step and answer in at most a few sentences.";

pub struct CapacityRetry {
    inner: Box<dyn Executor>,
    classifier: Arc<dyn ErrorClassifier>,
}

impl CapacityRetry {
    pub fn new(inner: Box<dyn Executor>, classifier: Arc<dyn ErrorClassifier>) -> Self {
        Self { inner, classifier }
    }
}

/// 最后一条 user 消息截断后加上「缩小范围」指令
pub fn simplify_prompt(messages: &[Message]) -> Vec<Message> {
    let task = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.chars().take(SIMPLIFIED_TASK_CHARS).collect::<String>())
        .unwrap_or_default();

    let content = if task.is_empty() {
        SIMPLIFIED_SUFFIX.to_string()
    } else {
        format!("{}\n\n{}", task, SIMPLIFIED_SUFFIX)
    };
    vec![Message::user(content)]
}

#[async_trait]
impl Executor for CapacityRetry {
    async fn invoke(
        &mut self,
        initial_messages: Vec<Message>,
        options: &RuntimeOptions,
    ) -> Result<ExecutorOutput, AgentError> {
        let simplified = simplify_prompt(&initial_messages);
        match self.inner.invoke(initial_messages, options).await {
            Err(e) if self.classifier.classify_error(&e) == FailureClassification::CapacityExceeded => {
                tracing::warn!(
                    iteration = options.iteration,
                    "Capacity exceeded ({}), retrying once with a simplified prompt",
                    e
                );
                self.inner.shrink_context();
                self.inner.invoke(simplified, options).await
            }
            other => other,
        }
    }

    fn tier(&self) -> Tier {
        self.inner.tier()
    }

    fn thread_id(&self) -> &str {
        self.inner.thread_id()
    }

    fn shrink_context(&mut self) {
        self.inner.shrink_context();
    }
}
