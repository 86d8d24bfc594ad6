//! 挂起点：所有等待都经过 Waiter，每个等待同时监听取消信号

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// 真实计时
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// 只记录时长、立即返回（测试用）
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn durations(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.durations().into_iter().sum()
    }

    pub fn clear(&self) {
        if let Ok(mut s) = self.slept.lock() {
            s.clear();
        }
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut s) = self.slept.lock() {
            s.push(duration);
        }
    }
}

/// Sleeper + 取消令牌
#[derive(Clone)]
pub struct Waiter {
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationToken,
}

impl Waiter {
    pub fn new(sleeper: Arc<dyn Sleeper>, cancel: CancellationToken) -> Self {
        Self { sleeper, cancel }
    }

    /// 等待 duration；返回 false 表示等待期间（或之前）已被取消
    pub async fn wait(&self, duration: Duration) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = self.sleeper.sleep(duration) => !self.cancel.is_cancelled(),
        }
    }

    pub fn wait_ms(&self, ms: u64) -> impl std::future::Future<Output = bool> + '_ {
        self.wait(Duration::from_millis(ms))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
