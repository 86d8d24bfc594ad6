//! 自主循环的迭代状态
//!
//! 只属于一次控制器运行，以 `&mut IterationState` 显式传入每轮迭代与恢复阶梯，
//! 因此状态机可以脱离整个控制器单独测试。不跨进程持久化。

use std::collections::VecDeque;

use serde::Serialize;

use crate::core::FailureClassification;

/// 最近错误最多保留条数
pub const RECENT_ERRORS_CAPACITY: usize = 3;

/// 每次容量超限失败对 tokens_error_count 的增量
const CAPACITY_PENALTY: u32 = 2;

/// 最近的不同错误信息（按插入顺序，满了淘汰最旧的）
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecentErrors {
    entries: VecDeque<String>,
}

impl RecentErrors {
    /// 已存在的信息移到末尾（视为最新），不重复存
    pub fn push(&mut self, message: impl Into<String>) {
        let message = message.into();
        if let Some(pos) = self.entries.iter().position(|m| *m == message) {
            self.entries.remove(pos);
        }
        self.entries.push_back(message);
        while self.entries.len() > RECENT_ERRORS_CAPACITY {
            self.entries.pop_front();
        }
    }

    pub fn contains(&self, message: &str) -> bool {
        self.entries.iter().any(|m| m == message)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 进入迭代前的计数快照，失败时用来撤销进入时的预调整
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationEntry {
    pub iteration: u64,
    prior_consecutive_errors: u32,
    prior_tokens_error_count: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IterationState {
    /// 当前迭代序号；第一轮为 1
    pub iteration_count: u64,
    /// 连续失败次数，任一成功即清零
    pub consecutive_errors: u32,
    /// 容量超限压力：失败 +2，成功 -1，下限 0
    pub tokens_error_count: u32,
    pub recent_errors: RecentErrors,
}

impl IterationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进入新一轮：序号 +1，并预先按「本轮会成功」调整计数
    /// （consecutive_errors 清零，tokens_error_count 减 1）。
    pub fn begin_iteration(&mut self) -> IterationEntry {
        let entry = IterationEntry {
            iteration: self.iteration_count + 1,
            prior_consecutive_errors: self.consecutive_errors,
            prior_tokens_error_count: self.tokens_error_count,
        };
        self.iteration_count = entry.iteration;
        self.consecutive_errors = 0;
        self.tokens_error_count = self.tokens_error_count.saturating_sub(1);
        entry
    }

    /// 本轮失败：先撤销进入时的预调整，再记入这次失败。
    ///
    /// 进入时清零 consecutive_errors 若不撤销，连续失败永远只能数到 1，
    /// 恢复阶梯的升级条件（>=2 / >=5 / >=7）就不可能满足。
    pub fn record_failure(
        &mut self,
        entry: IterationEntry,
        message: impl Into<String>,
        classification: FailureClassification,
    ) {
        self.consecutive_errors = entry.prior_consecutive_errors;
        self.tokens_error_count = entry.prior_tokens_error_count;

        self.recent_errors.push(message);
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        if classification == FailureClassification::CapacityExceeded {
            self.tokens_error_count = self.tokens_error_count.saturating_add(CAPACITY_PENALTY);
        }
    }

    /// 是否处于容量压力下（影响刷新间隔与提示词）
    pub fn under_capacity_pressure(&self) -> bool {
        self.tokens_error_count > 0
    }
}
