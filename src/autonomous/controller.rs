//! 自主循环控制器
//!
//! 单状态机（running），没有正常出口。每轮：
//! 进入迭代（计数 +1、预调整计数）→ 到期刷新执行器 → 句柄丢失则重建 →
//! 选提示词（容量压力下缩小范围）→ 调用执行器 → 截断、展示、按回复大小等待。
//!
//! 刷新或调用失败时记入失败、分类并交给恢复阶梯，循环继续。
//! 只有两种结束方式：取消令牌触发，或者连新执行器都建不出来。

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::autonomous::display::{render_notice, DisplaySink, Notice};
use crate::autonomous::pacing::{process_response, PacingSettings, ProcessedResponse};
use crate::autonomous::timing::Waiter;
use crate::config::{AgentMode, AutonomousSection};
use crate::core::{
    AgentError, ErrorClassifier, FailureClassification, IterationEntry, IterationState, MarkerClassifier,
    RecoveryLadder, RecoveryReport,
};
use crate::executor::{ExecutorLifecycle, RuntimeOptions};
use crate::memory::Message;

/// 循环过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    IterationStarted { iteration: u64 },
    /// 执行器按计划整体换新
    ExecutorRefreshed { iteration: u64, generation: u64 },
    /// 回复为空，不算失败
    EmptyResponse { iteration: u64 },
    Response {
        iteration: u64,
        estimated_tokens: usize,
        truncated: bool,
        delay_ms: u64,
    },
    Failure {
        iteration: u64,
        classification: FailureClassification,
        message: String,
        consecutive_errors: u32,
        tokens_error_count: u32,
    },
    Recovery {
        iteration: u64,
        waits_ms: Vec<u64>,
        resets_attempted: u32,
        reset_succeeded: bool,
    },
    Stopped { reason: String },
}

/// 循环结束原因
#[derive(Debug)]
pub enum LoopExit {
    /// 取消令牌触发
    Cancelled,
    /// 现有句柄丢失且无法新建
    ExecutorUnavailable(AgentError),
}

/// 单轮结果
#[derive(Debug)]
pub enum IterationOutcome {
    Responded(ProcessedResponse),
    /// 执行器没有给出回复，直接进入下一轮
    Empty,
    Failed {
        classification: FailureClassification,
        report: RecoveryReport,
    },
    Cancelled,
    Fatal(AgentError),
}

/// 单轮尝试中的错误去向
enum AttemptError {
    /// 交给恢复阶梯
    Recoverable(AgentError),
    Fatal(AgentError),
    Cancelled,
}

pub struct AutonomousController {
    lifecycle: ExecutorLifecycle,
    classifier: Arc<dyn ErrorClassifier>,
    ladder: RecoveryLadder,
    display: Arc<dyn DisplaySink>,
    waiter: Waiter,
    pacing: PacingSettings,
    continue_prompt: String,
    reduced_scope_prompt: String,
    events: Option<mpsc::UnboundedSender<LoopEvent>>,
}

impl AutonomousController {
    pub fn new(
        lifecycle: ExecutorLifecycle,
        settings: &AutonomousSection,
        display: Arc<dyn DisplaySink>,
        waiter: Waiter,
    ) -> Self {
        let ladder = RecoveryLadder::new(Arc::clone(&display), waiter.clone());
        Self {
            lifecycle,
            classifier: Arc::new(MarkerClassifier::new()),
            ladder,
            display,
            waiter,
            pacing: PacingSettings::from(settings),
            continue_prompt: settings.continue_prompt.clone(),
            reduced_scope_prompt: settings.reduced_scope_prompt.clone(),
            events: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// 订阅循环事件
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<LoopEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn lifecycle(&self) -> &ExecutorLifecycle {
        &self.lifecycle
    }

    pub fn into_lifecycle(self) -> ExecutorLifecycle {
        self.lifecycle
    }

    fn emit(&self, event: LoopEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// 运行直到取消或执行器彻底不可用。前置条件不满足时返回 Config 错误，循环不启动。
    pub async fn run(&mut self) -> Result<LoopExit, AgentError> {
        if self.lifecycle.mode() != AgentMode::Autonomous {
            return Err(AgentError::Config(format!(
                "autonomous loop requires autonomous mode, current mode is '{}'",
                self.lifecycle.mode()
            )));
        }
        if !self.lifecycle.is_live() {
            return Err(AgentError::Config(
                "no executor available; create one before starting the autonomous loop".to_string(),
            ));
        }

        tracing::info!(
            base_interval_ms = self.pacing.base_interval.as_millis() as u64,
            token_ceiling = self.pacing.token_ceiling,
            "Autonomous loop started"
        );

        let mut state = IterationState::new();
        loop {
            if self.waiter.is_cancelled() {
                return Ok(self.stop(&state, LoopExit::Cancelled));
            }
            match self.run_iteration(&mut state).await {
                IterationOutcome::Cancelled => return Ok(self.stop(&state, LoopExit::Cancelled)),
                IterationOutcome::Fatal(e) => {
                    tracing::error!(iteration = state.iteration_count, "Executor unavailable: {}", e);
                    self.display.write(&render_notice(
                        Notice::Error,
                        &format!("The agent could not be restarted and has stopped.\n{}", e),
                    ));
                    return Ok(self.stop(&state, LoopExit::ExecutorUnavailable(e)));
                }
                IterationOutcome::Responded(_) | IterationOutcome::Empty | IterationOutcome::Failed { .. } => {}
            }
        }
    }

    fn stop(&self, state: &IterationState, exit: LoopExit) -> LoopExit {
        let reason = match &exit {
            LoopExit::Cancelled => "cancelled".to_string(),
            LoopExit::ExecutorUnavailable(e) => e.to_string(),
        };
        tracing::info!(iterations = state.iteration_count, reason = %reason, "Autonomous loop stopped");
        self.emit(LoopEvent::Stopped { reason });
        exit
    }

    /// 跑一轮（含成功后的节奏等待或失败后的恢复阶梯）
    pub async fn run_iteration(&mut self, state: &mut IterationState) -> IterationOutcome {
        let entry = state.begin_iteration();
        let iteration = entry.iteration;
        self.emit(LoopEvent::IterationStarted { iteration });
        tracing::debug!(iteration, tokens_errors = state.tokens_error_count, "Iteration started");

        let content = match self.attempt(state).await {
            Ok(content) => content,
            Err(AttemptError::Recoverable(e)) => return self.recover(state, entry, e).await,
            Err(AttemptError::Fatal(e)) => return IterationOutcome::Fatal(e),
            Err(AttemptError::Cancelled) => return IterationOutcome::Cancelled,
        };

        let Some(content) = content else {
            tracing::info!(iteration, "Executor returned an empty response, continuing");
            self.emit(LoopEvent::EmptyResponse { iteration });
            return IterationOutcome::Empty;
        };

        let processed = process_response(&content, &self.pacing);
        let mut body = processed.display.clone();
        if processed.truncated {
            body.push_str("\n\n[response truncated]");
        }
        self.display.write(&render_notice(Notice::Response, &body));

        let delay_ms = processed.delay.as_millis() as u64;
        tracing::info!(
            iteration,
            estimated_tokens = processed.estimated_tokens,
            delay_ms,
            "Iteration completed"
        );
        self.emit(LoopEvent::Response {
            iteration,
            estimated_tokens: processed.estimated_tokens,
            truncated: processed.truncated,
            delay_ms,
        });

        if !self.waiter.wait(processed.delay).await {
            return IterationOutcome::Cancelled;
        }
        IterationOutcome::Responded(processed)
    }

    /// 刷新、确保句柄、调用执行器；Ok(None) 表示空回复
    async fn attempt(&mut self, state: &IterationState) -> Result<Option<String>, AttemptError> {
        match self.lifecycle.refresh_if_due(state) {
            Ok(true) => self.emit(LoopEvent::ExecutorRefreshed {
                iteration: state.iteration_count,
                generation: self.lifecycle.generation(),
            }),
            Ok(false) => {}
            Err(e) => return Err(AttemptError::Recoverable(e)),
        }

        self.lifecycle.ensure_live().map_err(AttemptError::Fatal)?;

        let prompt = if state.under_capacity_pressure() {
            self.reduced_scope_prompt.clone()
        } else {
            self.continue_prompt.clone()
        };
        let cancel = self.waiter.token();
        let executor = self.lifecycle.current_mut().ok_or_else(|| {
            AttemptError::Fatal(AgentError::ExecutorUnavailable("executor handle missing".to_string()))
        })?;
        let options = RuntimeOptions::new(executor.thread_id(), state.iteration_count);

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AttemptError::Cancelled),
            result = executor.invoke(vec![Message::user(prompt)], &options) => {
                result.map_err(AttemptError::Recoverable)?
            }
        };
        Ok(output.final_content().map(str::to_string))
    }

    /// 记入失败、分类、交给恢复阶梯
    async fn recover(&mut self, state: &mut IterationState, entry: IterationEntry, err: AgentError) -> IterationOutcome {
        let message = err.to_string();
        let classification = self.classifier.classify(&message);
        state.record_failure(entry, message.clone(), classification);

        tracing::warn!(
            iteration = state.iteration_count,
            consecutive_errors = state.consecutive_errors,
            tokens_errors = state.tokens_error_count,
            ?classification,
            "Iteration failed: {}",
            message
        );
        self.emit(LoopEvent::Failure {
            iteration: state.iteration_count,
            classification,
            message,
            consecutive_errors: state.consecutive_errors,
            tokens_error_count: state.tokens_error_count,
        });

        let report = self.ladder.handle(classification, state, &mut self.lifecycle).await;
        self.emit(LoopEvent::Recovery {
            iteration: state.iteration_count,
            waits_ms: report.waits.iter().map(|d| d.as_millis() as u64).collect(),
            resets_attempted: report.resets_attempted,
            reset_succeeded: report.reset_succeeded,
        });

        if report.interrupted {
            IterationOutcome::Cancelled
        } else {
            IterationOutcome::Failed { classification, report }
        }
    }
}
