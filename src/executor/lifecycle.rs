//! 执行器生命周期：唯一持有当前执行器句柄的地方
//!
//! - create：按档位构造新执行器并替换旧的（唯一的构造路径），构造错误原样传播
//! - refresh_if_due：每 5 轮（容量压力下每 3 轮）整体换新，限制上下文增长
//! - reset：无条件丢弃并重建 smart 执行器，供恢复阶梯使用

use std::sync::Arc;

use crate::config::AgentMode;
use crate::core::{AgentError, IterationState};
use crate::executor::{Executor, ExecutorFactory};
use crate::llm::{Tier, TierRegistry};

/// 正常情况下的刷新间隔（轮）
pub const REFRESH_INTERVAL: u64 = 5;
/// 容量压力下的刷新间隔（轮）
pub const PRESSURE_REFRESH_INTERVAL: u64 = 3;

pub struct ExecutorLifecycle {
    registry: Arc<TierRegistry>,
    factory: Arc<dyn ExecutorFactory>,
    mode: AgentMode,
    current: Option<Box<dyn Executor>>,
    /// 每次成功 create 加 1；用来判断句柄是否换过
    generation: u64,
}

impl ExecutorLifecycle {
    pub fn new(registry: Arc<TierRegistry>, factory: Arc<dyn ExecutorFactory>, mode: AgentMode) -> Self {
        Self {
            registry,
            factory,
            mode,
            current: None,
            generation: 0,
        }
    }

    /// 构造绑定到 tier 的新执行器并装入；返回新句柄的代号
    pub fn create(&mut self, tier: Tier) -> Result<u64, AgentError> {
        let binding = self
            .registry
            .resolve(tier)
            .ok_or(AgentError::TierUnavailable(tier))?;
        let executor = self.factory.build(binding, self.mode)?;

        self.current = Some(executor);
        self.generation += 1;
        tracing::info!(
            tier = %tier,
            model = %binding.model,
            generation = self.generation,
            "Executor created"
        );
        Ok(self.generation)
    }

    /// 当前迭代对应的刷新间隔
    pub fn refresh_interval(tokens_error_count: u32) -> u64 {
        if tokens_error_count > 0 {
            PRESSURE_REFRESH_INTERVAL
        } else {
            REFRESH_INTERVAL
        }
    }

    /// 第 1 轮永不刷新；之后在间隔的整数倍上刷新
    pub fn is_refresh_due(state: &IterationState) -> bool {
        let interval = Self::refresh_interval(state.tokens_error_count);
        state.iteration_count > 1 && state.iteration_count % interval == 0
    }

    /// 到期则丢弃当前执行器并重建 smart；返回是否刷新
    pub fn refresh_if_due(&mut self, state: &IterationState) -> Result<bool, AgentError> {
        if !Self::is_refresh_due(state) {
            return Ok(false);
        }
        tracing::info!(
            iteration = state.iteration_count,
            interval = Self::refresh_interval(state.tokens_error_count),
            "Refreshing executor"
        );
        self.discard();
        self.create(Tier::Smart)?;
        Ok(true)
    }

    /// 无条件丢弃并重建 smart 执行器
    pub fn reset(&mut self) -> Result<u64, AgentError> {
        tracing::info!(generation = self.generation, "Resetting executor");
        self.discard();
        self.create(Tier::Smart)
    }

    /// 句柄丢失时重建；仍失败则返回 ExecutorUnavailable
    pub fn ensure_live(&mut self) -> Result<(), AgentError> {
        if self.current.is_some() {
            return Ok(());
        }
        tracing::warn!("Executor handle lost, recreating");
        self.create(Tier::Smart)
            .map(|_| ())
            .map_err(|e| AgentError::ExecutorUnavailable(e.to_string()))
    }

    fn discard(&mut self) {
        if let Some(old) = self.current.take() {
            tracing::debug!(thread = %old.thread_id(), "Executor discarded");
        }
    }

    pub fn current_mut(&mut self) -> Option<&mut (dyn Executor + 'static)> {
        self.current.as_deref_mut()
    }

    pub fn is_live(&self) -> bool {
        self.current.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn mode(&self) -> AgentMode {
        self.mode
    }

    pub fn registry(&self) -> &Arc<TierRegistry> {
        &self.registry
    }
}
