//! 恢复阶梯
//!
//! 每个失败迭代调用一次，永不失败。按分类走两条路径：
//!
//! - 容量超限：通知「动作已放弃」→ 退避等待 → 连续失败或容量压力足够大时重置执行器；
//!   重置本身失败则改为普通等待，必要时再做一次尽力而为的紧急重置
//! - 一般错误：按连续失败次数递增等待，连续 7 次以上重置执行器
//!
//! 所有等待都是取消点；被取消时立即返回，`interrupted = true`。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::autonomous::display::{render_notice, DisplaySink, Notice};
use crate::autonomous::timing::Waiter;
use crate::core::{FailureClassification, IterationState};
use crate::executor::ExecutorLifecycle;

/// 容量超限退避：基础等待、每次连续失败的增量、上限
const CAPACITY_BASE_WAIT_MS: u64 = 5000;
const CAPACITY_STEP_MS: u64 = 1000;
const CAPACITY_MAX_WAIT_MS: u64 = 15000;
/// 重置后的稳定等待
const POST_RESET_WAIT_MS: u64 = 8000;
/// 重置失败后的普通等待；连续失败达到阈值时用长等待
const FAILED_RESET_LONG_WAIT_CONSECUTIVE: u32 = 3;
const FAILED_RESET_LONG_WAIT_MS: u64 = 15000;
const FAILED_RESET_SHORT_WAIT_MS: u64 = 5000;

/// 一般错误退避
const GENERAL_SHORT_WAIT_MS: u64 = 3000;
const GENERAL_MEDIUM_WAIT_MS: u64 = 10000;
const GENERAL_LONG_WAIT_MS: u64 = 30000;
const GENERAL_RESET_SETTLE_MS: u64 = 5000;

/// 容量路径：触发重置的连续失败数 / 容量压力
const CAPACITY_RESET_CONSECUTIVE: u32 = 2;
const CAPACITY_RESET_TOKENS: u32 = 3;
const EMERGENCY_RESET_CONSECUTIVE: u32 = 5;
/// 一般路径：触发重置的连续失败数
const GENERAL_RESET_CONSECUTIVE: u32 = 7;

/// 一次恢复做了什么
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub waits: Vec<Duration>,
    pub resets_attempted: u32,
    pub reset_succeeded: bool,
    /// 等待期间收到取消信号
    pub interrupted: bool,
}

impl RecoveryReport {
    pub fn total_wait(&self) -> Duration {
        self.waits.iter().sum()
    }
}

/// 容量超限后的退避时长
pub fn capacity_backoff_ms(consecutive_errors: u32) -> u64 {
    (CAPACITY_BASE_WAIT_MS + u64::from(consecutive_errors) * CAPACITY_STEP_MS).min(CAPACITY_MAX_WAIT_MS)
}

/// 一般错误的退避时长
pub fn general_backoff_ms(consecutive_errors: u32) -> u64 {
    match consecutive_errors {
        n if n >= 5 => GENERAL_LONG_WAIT_MS,
        n if n >= 3 => GENERAL_MEDIUM_WAIT_MS,
        _ => GENERAL_SHORT_WAIT_MS,
    }
}

pub struct RecoveryLadder {
    display: Arc<dyn DisplaySink>,
    waiter: Waiter,
}

impl RecoveryLadder {
    pub fn new(display: Arc<dyn DisplaySink>, waiter: Waiter) -> Self {
        Self { display, waiter }
    }

    /// state 是已记入本次失败后的状态
    pub async fn handle(
        &self,
        classification: FailureClassification,
        state: &IterationState,
        lifecycle: &mut ExecutorLifecycle,
    ) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        tracing::info!(
            iteration = state.iteration_count,
            consecutive_errors = state.consecutive_errors,
            tokens_errors = state.tokens_error_count,
            ?classification,
            "Recovery ladder engaged"
        );
        match classification {
            FailureClassification::CapacityExceeded => {
                self.capacity_path(state, lifecycle, &mut report).await
            }
            FailureClassification::General => self.general_path(state, lifecycle, &mut report).await,
        }
        report
    }

    async fn capacity_path(
        &self,
        state: &IterationState,
        lifecycle: &mut ExecutorLifecycle,
        report: &mut RecoveryReport,
    ) {
        let consecutive = state.consecutive_errors;
        self.display.write(&render_notice(
            Notice::ActionAbandoned,
            &format!(
                "The request exceeded the model's capacity and was dropped.\n\
                 Consecutive failures: {}. Continuing with reduced scope.",
                consecutive
            ),
        ));

        if !self.pause(report, capacity_backoff_ms(consecutive)).await {
            return;
        }

        if consecutive < CAPACITY_RESET_CONSECUTIVE && state.tokens_error_count < CAPACITY_RESET_TOKENS {
            return;
        }

        report.resets_attempted += 1;
        match lifecycle.reset() {
            Ok(generation) => {
                report.reset_succeeded = true;
                self.announce_reset(generation);
                self.pause(report, POST_RESET_WAIT_MS).await;
            }
            Err(e) => {
                tracing::error!("Executor reset failed after capacity errors: {}", e);
                let wait = if consecutive >= FAILED_RESET_LONG_WAIT_CONSECUTIVE {
                    FAILED_RESET_LONG_WAIT_MS
                } else {
                    FAILED_RESET_SHORT_WAIT_MS
                };
                if !self.pause(report, wait).await {
                    return;
                }
                if consecutive >= EMERGENCY_RESET_CONSECUTIVE {
                    report.resets_attempted += 1;
                    match lifecycle.reset() {
                        Ok(generation) => {
                            report.reset_succeeded = true;
                            self.announce_reset(generation);
                        }
                        Err(e) => tracing::error!("Emergency reset failed: {}", e),
                    }
                }
            }
        }
    }

    async fn general_path(
        &self,
        state: &IterationState,
        lifecycle: &mut ExecutorLifecycle,
        report: &mut RecoveryReport,
    ) {
        let consecutive = state.consecutive_errors;
        if !self.pause(report, general_backoff_ms(consecutive)).await {
            return;
        }

        if consecutive < GENERAL_RESET_CONSECUTIVE {
            return;
        }

        report.resets_attempted += 1;
        match lifecycle.reset() {
            Ok(generation) => {
                report.reset_succeeded = true;
                self.announce_reset(generation);
            }
            Err(e) => tracing::error!("Executor reset failed after {} consecutive errors: {}", consecutive, e),
        }
        self.pause(report, GENERAL_RESET_SETTLE_MS).await;
    }

    fn announce_reset(&self, generation: u64) {
        tracing::warn!(generation, "Executor reset, conversation context discarded");
        self.display.write(&render_notice(
            Notice::AgentReset,
            "Repeated failures: the agent was restarted and its conversation context discarded.",
        ));
    }

    /// 记录并执行一次等待；返回 false 表示被取消
    async fn pause(&self, report: &mut RecoveryReport, ms: u64) -> bool {
        let duration = Duration::from_millis(ms);
        report.waits.push(duration);
        tracing::debug!(wait_ms = ms, "Recovery wait");
        if self.waiter.wait(duration).await {
            true
        } else {
            report.interrupted = true;
            false
        }
    }
}
