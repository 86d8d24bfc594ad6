//! 错误分类：容量超限 / 一般错误
//!
//! 目前按错误文本做大小写敏感的子串匹配。分类器放在 trait 后面，
//! 以后换成结构化错误码时 RecoveryLadder 与主循环不用改。

use serde::Serialize;

/// 单次失败的分类，每次都从错误文本重新计算
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClassification {
    /// 后端因输入 / 输出过大拒绝了请求
    CapacityExceeded,
    General,
}

pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, message: &str) -> FailureClassification;

    fn classify_error(&self, err: &dyn std::error::Error) -> FailureClassification {
        self.classify(&err.to_string())
    }
}

/// 容量超限的特征短语（大小写敏感）
pub const CAPACITY_MARKERS: &[&str] = &[
    "context length",
    "context_length_exceeded",
    "maximum context",
    "token limit",
    "too many tokens",
    "Request too large",
    "request too large",
    "prompt is too long",
    "input is too long",
    "max_tokens",
    "reduce the length",
];

/// 子串匹配分类器
#[derive(Debug, Clone)]
pub struct MarkerClassifier {
    markers: Vec<String>,
}

impl MarkerClassifier {
    pub fn new() -> Self {
        Self {
            markers: CAPACITY_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// 追加自定义特征短语
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.markers.push(marker.into());
        self
    }
}

impl Default for MarkerClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier for MarkerClassifier {
    fn classify(&self, message: &str) -> FailureClassification {
        if self.markers.iter().any(|m| message.contains(m.as_str())) {
            FailureClassification::CapacityExceeded
        } else {
            FailureClassification::General
        }
    }
}
