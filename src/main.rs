//! Autopilot - 自主执行智能体
//!
//! 入口：加载配置、初始化日志、构建档位注册表与执行器，按模式运行自主循环或对话。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use autopilot::autonomous::{
    run_chat, AutonomousController, ConsoleSink, DisplaySink, LoopEvent, LoopExit, TokioSleeper, Waiter,
};
use autopilot::config::{load_config, load_system_prompt, AgentMode};
use autopilot::core::{MarkerClassifier, ShutdownManager};
use autopilot::executor::{ExecutorLifecycle, TurnExecutorFactory};
use autopilot::llm::{EnvCredentials, Monitor, ProviderBackends, Tier, TierRegistry};
use autopilot::observability;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 可选参数：额外的配置文件路径
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;
    observability::init(&cfg.app.log_level);
    tracing::info!(name = ?cfg.app.name, mode = %cfg.app.mode, "Starting");

    let registry = Arc::new(
        TierRegistry::build(&cfg.llm.tiers, &EnvCredentials, &ProviderBackends)
            .context("Failed to build tier registry")?,
    );
    let monitor = Arc::new(
        Monitor::new(Arc::clone(&registry)).with_history_turns(cfg.autonomous.monitor_history_turns),
    );

    let mut factory = TurnExecutorFactory::new(Arc::clone(&registry), load_system_prompt(&cfg.app))
        .with_monitor(monitor)
        .with_tools(cfg.tools.clone())
        .with_max_context_turns(cfg.autonomous.max_context_turns);
    if cfg.autonomous.retry_on_capacity {
        factory = factory.with_capacity_retry(Arc::new(MarkerClassifier::new()));
    }

    let mut lifecycle = ExecutorLifecycle::new(registry, Arc::new(factory), cfg.app.mode);
    lifecycle
        .create(Tier::Smart)
        .context("Failed to create the baseline executor")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let display: Arc<dyn DisplaySink> = Arc::new(ConsoleSink);

    match cfg.app.mode {
        AgentMode::Autonomous => {
            let waiter = Waiter::new(Arc::new(TokioSleeper), shutdown.token());
            let (event_tx, mut event_rx) = mpsc::unbounded_channel::<LoopEvent>();
            tokio::spawn(async move {
                while let Some(event) = event_rx.recv().await {
                    match serde_json::to_string(&event) {
                        Ok(json) => tracing::debug!(target: "autopilot::events", "{}", json),
                        Err(e) => tracing::warn!("Failed to serialize loop event: {}", e),
                    }
                }
            });
            let mut controller =
                AutonomousController::new(lifecycle, &cfg.autonomous, display, waiter).with_events(event_tx);
            match controller.run().await.context("Autonomous loop failed to start")? {
                LoopExit::Cancelled => {
                    tracing::info!(reason = ?shutdown.reason(), "Autonomous loop stopped")
                }
                LoopExit::ExecutorUnavailable(e) => {
                    return Err(anyhow::Error::new(e).context("Autonomous loop terminated"));
                }
            }
        }
        AgentMode::Chat => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            run_chat(&mut lifecycle, stdin, display, shutdown.token())
                .await
                .context("Chat session failed")?;
            if let Some(reason) = shutdown.reason() {
                tracing::info!(?reason, "Chat session interrupted");
            }
        }
    }

    Ok(())
}
