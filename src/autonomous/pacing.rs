//! 响应处理与自适应节奏
//!
//! 估算回复大小（抽象 token），超过上限时截断后再展示；
//! 回复超过上限一半时把下一轮前的等待拉长 1.5 倍，给后端一点喘息。

use std::time::Duration;

use crate::config::AutonomousSection;

/// 默认截断上限（估算 token）
pub const DEFAULT_TOKEN_CEILING: usize = 20_000;
/// 默认基础等待（毫秒）
pub const DEFAULT_BASE_INTERVAL_MS: u64 = 5_000;

/// 估算文本的 token 数量
/// 使用简单的启发式规则：英文约 4 字符/token，中文约 1.5 字符/token
pub fn estimate_tokens(text: &str) -> usize {
    let (ascii, non_ascii) = text.chars().fold((0usize, 0usize), |(a, n), c| {
        if c.is_ascii() {
            (a + 1, n)
        } else {
            (a, n + 1)
        }
    });
    tokens_for(ascii, non_ascii).max(1)
}

/// 向上取整的 n / 1.5
fn tokens_for(ascii: usize, non_ascii: usize) -> usize {
    ascii / 4 + (non_ascii * 2).div_ceil(3)
}

/// 截断到估算 token 不超过 max_tokens 的最长前缀；返回是否截断
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> (String, bool) {
    if estimate_tokens(text) <= max_tokens {
        return (text.to_string(), false);
    }

    let (mut ascii, mut non_ascii) = (0usize, 0usize);
    let mut end = 0;
    for (idx, c) in text.char_indices() {
        let (a, n) = if c.is_ascii() {
            (ascii + 1, non_ascii)
        } else {
            (ascii, non_ascii + 1)
        };
        if tokens_for(a, n) > max_tokens {
            break;
        }
        ascii = a;
        non_ascii = n;
        end = idx + c.len_utf8();
    }
    (text[..end].to_string(), true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingSettings {
    pub base_interval: Duration,
    pub token_ceiling: usize,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(DEFAULT_BASE_INTERVAL_MS),
            token_ceiling: DEFAULT_TOKEN_CEILING,
        }
    }
}

impl From<&AutonomousSection> for PacingSettings {
    fn from(section: &AutonomousSection) -> Self {
        Self {
            base_interval: Duration::from_millis(section.base_interval_ms),
            token_ceiling: section.token_ceiling,
        }
    }
}

/// 处理后的回复
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedResponse {
    /// 要展示的内容（可能已截断）
    pub display: String,
    /// 原始回复的估算大小
    pub estimated_tokens: usize,
    pub truncated: bool,
    /// 下一轮之前的等待
    pub delay: Duration,
}

/// 估算、截断并计算下一轮前的等待
pub fn process_response(content: &str, settings: &PacingSettings) -> ProcessedResponse {
    let estimated_tokens = estimate_tokens(content);
    let (display, truncated) = truncate_to_tokens(content, settings.token_ceiling);
    if truncated {
        tracing::warn!(
            estimated_tokens,
            ceiling = settings.token_ceiling,
            "Response exceeds token ceiling, truncated before display"
        );
    }

    let delay = if estimated_tokens > settings.token_ceiling / 2 {
        settings.base_interval * 3 / 2
    } else {
        settings.base_interval
    };

    ProcessedResponse {
        display,
        estimated_tokens,
        truncated,
        delay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens(&"a".repeat(400)), 100);
        // 3 个中文字符 -> 2 token
        assert_eq!(estimate_tokens("你好吗"), 2);
        assert_eq!(estimate_tokens("你好吗啊"), 3);
    }

    #[test]
    fn test_small_response_uses_base_interval() {
        let settings = PacingSettings::default();
        let out = process_response("Swapped 0.1 ETH for USDC.", &settings);
        assert!(!out.truncated);
        assert_eq!(out.display, "Swapped 0.1 ETH for USDC.");
        assert_eq!(out.delay, Duration::from_millis(5000));
    }

    #[test]
    fn test_oversized_response_is_truncated_and_slowed() {
        let settings = PacingSettings::default();
        let content = "a".repeat(100_000);
        assert_eq!(estimate_tokens(&content), 25_000);

        let out = process_response(&content, &settings);
        assert!(out.truncated);
        assert_eq!(out.estimated_tokens, 25_000);
        assert_eq!(estimate_tokens(&out.display), 20_000);
        assert_eq!(out.delay, Duration::from_millis(7500));
    }

    #[test]
    fn test_medium_response_slows_without_truncation() {
        let settings = PacingSettings::default();
        // 12000 token：超过上限一半，未超上限
        let out = process_response(&"b".repeat(48_000), &settings);
        assert!(!out.truncated);
        assert_eq!(out.delay, Duration::from_millis(7500));

        let out = process_response(&"b".repeat(40_000), &settings);
        assert_eq!(out.delay, Duration::from_millis(5000));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "数据".repeat(100);
        let (cut, truncated) = truncate_to_tokens(&text, 10);
        assert!(truncated);
        assert!(estimate_tokens(&cut) <= 10);
        assert_eq!(cut.chars().count(), 15);
    }
}
