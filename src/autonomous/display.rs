//! 展示输出：把通知与最终回复渲染成带边框的文本块
//!
//! 运维人员盯着输出时，能直接看到「动作已放弃」「Agent 已重置」等通知，而不是一串崩溃日志。

use std::io::Write;
use std::sync::Mutex;

/// 展示终端；假定非阻塞，无返回值
pub trait DisplaySink: Send + Sync {
    fn write(&self, boxed_text: &str);
}

/// 通知种类（决定边框标题）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// 单轮动作因容量超限被放弃
    ActionAbandoned,
    /// 执行器被重置，对话上下文已丢弃
    AgentReset,
    /// Agent 的回复
    Response,
    Error,
}

impl Notice {
    pub fn title(&self) -> &'static str {
        match self {
            Notice::ActionAbandoned => "Action abandoned",
            Notice::AgentReset => "Agent reset",
            Notice::Response => "Agent",
            Notice::Error => "Error",
        }
    }
}

/// 渲染边框文本块
pub fn boxed(title: &str, body: &str) -> String {
    let lines: Vec<&str> = if body.is_empty() { vec![""] } else { body.lines().collect() };
    let width = lines
        .iter()
        .map(|l| l.chars().count())
        .chain(std::iter::once(title.chars().count() + 2))
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    let header_fill = width.saturating_sub(title.chars().count() + 1);
    out.push_str(&format!("╭─ {} {}╮\n", title, "─".repeat(header_fill)));
    for line in lines {
        let pad = width - line.chars().count();
        out.push_str(&format!("│ {}{} │\n", line, " ".repeat(pad)));
    }
    out.push_str(&format!("╰{}╯", "─".repeat(width + 2)));
    out
}

/// 渲染通知
pub fn render_notice(notice: Notice, body: &str) -> String {
    let stamp = chrono::Local::now().format("%H:%M:%S");
    boxed(&format!("{} · {}", notice.title(), stamp), body)
}

/// 标准输出
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl DisplaySink for ConsoleSink {
    fn write(&self, boxed_text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}", boxed_text);
        let _ = out.flush();
    }
}

/// 记录所有输出（测试用）
#[derive(Debug, Default)]
pub struct MemorySink {
    written: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> Vec<String> {
        self.written.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// render_notice 输出中该种通知的条目数
    pub fn count(&self, notice: Notice) -> usize {
        let needle = format!("─ {} ·", notice.title());
        self.written()
            .iter()
            .filter(|w| w.lines().next().is_some_and(|l| l.contains(&needle)))
            .count()
    }
}

impl DisplaySink for MemorySink {
    fn write(&self, boxed_text: &str) {
        if let Ok(mut w) = self.written.lock() {
            w.push(boxed_text.to_string());
        }
    }
}
