//! 控制器错误类型
//!
//! - Config / TierUnavailable / ExecutorUnavailable：配置类错误，致命，直接向上传播
//! - Llm / Executor：单轮失败，由 RecoveryLadder 吸收，不会越过当前迭代

use thiserror::Error;

use crate::llm::{LlmError, Tier};

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Tier '{0}' is not available")]
    TierUnavailable(Tier),

    /// 既没有现存执行器，也无法新建
    #[error("Executor unavailable: {0}")]
    ExecutorUnavailable(String),

    #[error("Executor failed: {0}")]
    Executor(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    /// 配置类错误不可恢复
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::Config(_) | AgentError::TierUnavailable(_) | AgentError::ExecutorUnavailable(_)
        )
    }
}
