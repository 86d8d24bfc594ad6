//! 对话模式：逐行读输入，交给当前执行器，展示回复
//!
//! 单轮失败只展示、不中断会话；exit / quit / EOF / 取消信号结束。

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;

use crate::autonomous::display::{render_notice, DisplaySink, Notice};
use crate::core::AgentError;
use crate::executor::{ExecutorLifecycle, RuntimeOptions};
use crate::memory::Message;

/// 会话统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatSummary {
    pub turns: u64,
    pub failures: u64,
}

pub async fn run_chat<R>(
    lifecycle: &mut ExecutorLifecycle,
    input: R,
    display: Arc<dyn DisplaySink>,
    cancel: CancellationToken,
) -> Result<ChatSummary, AgentError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut summary = ChatSummary::default();

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Failed to read input: {}", e);
                break;
            }
        };

        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if matches!(text, "exit" | "quit") {
            break;
        }

        lifecycle.ensure_live()?;
        let Some(executor) = lifecycle.current_mut() else {
            return Err(AgentError::ExecutorUnavailable("executor handle missing".to_string()));
        };
        summary.turns += 1;
        let options = RuntimeOptions::new(executor.thread_id(), 0);

        match executor.invoke(vec![Message::user(text)], &options).await {
            Ok(output) => {
                let reply = output.final_content().unwrap_or("(no response)");
                display.write(&render_notice(Notice::Response, reply));
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                summary.failures += 1;
                tracing::warn!("Chat turn failed: {}", e);
                display.write(&render_notice(Notice::Error, &e.to_string()));
            }
        }
    }

    tracing::info!(turns = summary.turns, failures = summary.failures, "Chat session ended");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autonomous::display::MemorySink;
    use crate::config::{AgentMode, TierSection, TiersSection};
    use crate::executor::TurnExecutorFactory;
    use crate::llm::{LlmClient, LlmError, Provider, ScriptedLlmClient, StaticCredentials, Tier, TierBinding, TierRegistry};

    fn lifecycle(backend: Arc<ScriptedLlmClient>) -> ExecutorLifecycle {
        let section = TierSection {
            provider: Provider::Mock,
            model: "m".to_string(),
            base_url: None,
            api_key_env: None,
        };
        let tiers = TiersSection {
            fast: section.clone(),
            smart: section.clone(),
            cheap: section,
        };
        let backends = move |_: &TierBinding| -> Result<Arc<dyn LlmClient>, AgentError> {
            let c: Arc<dyn LlmClient> = backend.clone();
            Ok(c)
        };
        let registry = Arc::new(TierRegistry::build(&tiers, &StaticCredentials::new(), &backends).unwrap());
        let factory = Arc::new(TurnExecutorFactory::new(Arc::clone(&registry), "You are a helpful assistant."));
        let mut lc = ExecutorLifecycle::new(registry, factory, AgentMode::Chat);
        lc.create(Tier::Smart).unwrap();
        lc
    }

    #[tokio::test]
    async fn test_chat_session_survives_failed_turn() {
        let backend = Arc::new(ScriptedLlmClient::new(vec![
            Ok("Balance is 3 ETH.".to_string()),
            Err(LlmError::Network("connection reset".into())),
            Ok("Done.".to_string()),
        ]));
        let mut lc = lifecycle(Arc::clone(&backend));
        let sink = Arc::new(MemorySink::new());
        let input: &[u8] = b"what is my balance?\n\nsend 1 ETH\nretry\nexit\nnever read\n";

        let summary = run_chat(&mut lc, input, sink.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary, ChatSummary { turns: 3, failures: 1 });
        assert_eq!(backend.calls(), 3);
        assert_eq!(sink.count(Notice::Response), 2);
        assert_eq!(sink.count(Notice::Error), 1);
    }

    #[tokio::test]
    async fn test_chat_ends_on_cancel() {
        let backend = Arc::new(ScriptedLlmClient::always("hi"));
        let mut lc = lifecycle(Arc::clone(&backend));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let input: &[u8] = b"hello\n";

        let summary = run_chat(&mut lc, input, Arc::new(MemorySink::new()), cancel)
            .await
            .unwrap();
        assert_eq!(summary.turns, 0);
        assert_eq!(backend.calls(), 0);
    }
}
