//! 自主循环集成测试：脚本化后端 + 记录型等待 + 内存展示

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use autopilot::autonomous::{
        estimate_tokens, AutonomousController, DisplaySink, IterationOutcome, LoopEvent, LoopExit,
        MemorySink, Notice, RecordingSleeper, Waiter,
    };
    use autopilot::config::{AgentMode, AutonomousSection, TierSection, TiersSection};
    use autopilot::core::{AgentError, FailureClassification, IterationState, ShutdownManager, ShutdownReason};
    use autopilot::executor::{Executor, ExecutorLifecycle, TurnExecutor, TurnExecutorFactory};
    use autopilot::llm::{
        LlmClient, LlmError, Monitor, Provider, ScriptedLlmClient, StaticCredentials, Tier, TierBinding,
        TierRegistry,
    };
    use autopilot::memory::Message;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn section(provider: Provider) -> TierSection {
        TierSection {
            provider,
            model: "test-model".to_string(),
            base_url: None,
            api_key_env: None,
        }
    }

    /// smart 用给定后端；fast / cheap 需要凭证但没有，因此不可用
    fn registry(smart: Arc<ScriptedLlmClient>) -> Arc<TierRegistry> {
        let tiers = TiersSection {
            fast: section(Provider::OpenAi),
            smart: section(Provider::Mock),
            cheap: section(Provider::DeepSeek),
        };
        let backends = move |_: &TierBinding| -> Result<Arc<dyn LlmClient>, AgentError> {
            let c: Arc<dyn LlmClient> = smart.clone();
            Ok(c)
        };
        Arc::new(TierRegistry::build(&tiers, &StaticCredentials::new(), &backends).unwrap())
    }

    struct Rig {
        controller: AutonomousController,
        sink: Arc<MemorySink>,
        sleeper: Arc<RecordingSleeper>,
    }

    fn rig(backend: Arc<ScriptedLlmClient>, settings: AutonomousSection) -> Rig {
        let registry = registry(backend);
        let factory = Arc::new(TurnExecutorFactory::new(Arc::clone(&registry), "You are a test agent."));
        let mut lifecycle = ExecutorLifecycle::new(registry, factory, AgentMode::Autonomous);
        lifecycle.create(Tier::Smart).unwrap();

        let sink = Arc::new(MemorySink::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let waiter = Waiter::new(sleeper.clone(), CancellationToken::new());
        let controller = AutonomousController::new(lifecycle, &settings, sink.clone(), waiter);
        Rig {
            controller,
            sink,
            sleeper,
        }
    }

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|v| Duration::from_millis(*v)).collect()
    }

    #[tokio::test]
    async fn test_small_first_iteration_paces_at_base_interval() {
        let backend = Arc::new(ScriptedLlmClient::always("Rebalanced the pool."));
        let mut rig = rig(backend, AutonomousSection::default());
        let mut state = IterationState::new();

        let outcome = rig.controller.run_iteration(&mut state).await;
        assert!(matches!(outcome, IterationOutcome::Responded(_)));
        assert_eq!(rig.sleeper.durations(), ms(&[5000]));
        assert_eq!(rig.controller.lifecycle().generation(), 1);
        assert_eq!(rig.sink.count(Notice::AgentReset), 0);
    }

    #[tokio::test]
    async fn test_fifth_iteration_replaces_executor() {
        let backend = Arc::new(ScriptedLlmClient::always("ok"));
        let mut rig = rig(backend, AutonomousSection::default());
        let mut state = IterationState::new();

        let mut generations = Vec::new();
        for _ in 0..10 {
            rig.controller.run_iteration(&mut state).await;
            generations.push(rig.controller.lifecycle().generation());
        }
        assert_eq!(generations, vec![1, 1, 1, 1, 2, 2, 2, 2, 2, 3]);
    }

    #[tokio::test]
    async fn test_capacity_failure_adds_pressure() {
        let backend = Arc::new(ScriptedLlmClient::new(vec![Err(LlmError::ContextLengthExceeded(
            "maximum context length is 8192 tokens".into(),
        ))]));
        let mut rig = rig(backend, AutonomousSection::default());
        let mut state = IterationState::new();

        let outcome = rig.controller.run_iteration(&mut state).await;
        let IterationOutcome::Failed { classification, report } = outcome else {
            panic!("expected failure, got {:?}", outcome);
        };
        assert_eq!(classification, FailureClassification::CapacityExceeded);
        assert_eq!(state.tokens_error_count, 2);
        assert_eq!(report.waits, ms(&[6000]));
        assert_eq!(rig.sink.count(Notice::ActionAbandoned), 1);
    }

    #[tokio::test]
    async fn test_two_capacity_failures_force_a_reset() {
        let capacity = || Err(LlmError::Api("Request too large for gpt-4o".into()));
        let backend = Arc::new(ScriptedLlmClient::new(vec![capacity(), capacity()]));
        let mut rig = rig(backend, AutonomousSection::default());
        let mut state = IterationState::new();

        rig.controller.run_iteration(&mut state).await;
        let outcome = rig.controller.run_iteration(&mut state).await;
        let IterationOutcome::Failed { report, .. } = outcome else {
            panic!("expected failure, got {:?}", outcome);
        };
        assert_eq!(state.consecutive_errors, 2);
        assert_eq!(state.tokens_error_count, 4);
        assert_eq!(report.resets_attempted, 1);
        assert!(report.reset_succeeded);
        assert_eq!(report.waits, ms(&[7000, 8000]));
        assert_eq!(rig.sink.count(Notice::AgentReset), 1);
    }

    #[tokio::test]
    async fn test_seventh_general_failure_resets_and_settles() {
        let errors = (0..7).map(|_| Err(LlmError::Network("connection reset by peer".into())));
        let backend = Arc::new(ScriptedLlmClient::new(errors));
        let mut rig = rig(backend, AutonomousSection::default());
        let mut state = IterationState::new();

        for _ in 0..6 {
            let outcome = rig.controller.run_iteration(&mut state).await;
            let IterationOutcome::Failed { report, .. } = outcome else {
                panic!("expected failure, got {:?}", outcome);
            };
            assert_eq!(report.resets_attempted, 0);
        }
        // 第 5 轮按计划刷新过一次
        assert_eq!(rig.controller.lifecycle().generation(), 2);

        rig.sleeper.clear();
        let outcome = rig.controller.run_iteration(&mut state).await;
        let IterationOutcome::Failed { classification, report } = outcome else {
            panic!("expected failure, got {:?}", outcome);
        };
        assert_eq!(classification, FailureClassification::General);
        assert_eq!(state.consecutive_errors, 7);
        assert_eq!(report.resets_attempted, 1);
        assert_eq!(rig.sleeper.durations(), ms(&[30000, 5000]));
        assert_eq!(rig.controller.lifecycle().generation(), 3);

        // 之后一次成功即清零
        rig.controller.run_iteration(&mut state).await;
        assert_eq!(state.consecutive_errors, 0);
        assert_eq!(state.recent_errors.len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_response_truncated_and_slowed() {
        let backend = Arc::new(ScriptedLlmClient::always("x".repeat(100_000)));
        let mut rig = rig(backend, AutonomousSection::default());
        let mut state = IterationState::new();

        let outcome = rig.controller.run_iteration(&mut state).await;
        let IterationOutcome::Responded(processed) = outcome else {
            panic!("expected response, got {:?}", outcome);
        };
        assert!(processed.truncated);
        assert_eq!(processed.estimated_tokens, 25_000);
        assert_eq!(estimate_tokens(&processed.display), 20_000);
        // 最长前缀：80004 个字符会估算为 20001
        assert_eq!(processed.display.len(), 80_003);
        assert_eq!(rig.sleeper.durations(), ms(&[7500]));
        assert!(rig.sink.written()[0].contains("[response truncated]"));
    }

    #[tokio::test]
    async fn test_monitor_backend_failure_defaults_to_smart() {
        let fast = Arc::new(ScriptedLlmClient::new(vec![Err(LlmError::Network("timeout".into()))]));
        let tiers = TiersSection {
            fast: section(Provider::Mock),
            smart: section(Provider::Mock),
            cheap: section(Provider::Mock),
        };
        let monitor_backend = Arc::clone(&fast);
        let backends = move |b: &TierBinding| -> Result<Arc<dyn LlmClient>, AgentError> {
            let c: Arc<dyn LlmClient> = match b.tier {
                Tier::Fast => monitor_backend.clone(),
                _ => Arc::new(ScriptedLlmClient::always("unused")),
            };
            Ok(c)
        };
        let registry = Arc::new(TierRegistry::build(&tiers, &StaticCredentials::new(), &backends).unwrap());
        let monitor = Monitor::new(registry);

        let history = vec![Message::user("swap 1 ETH"), Message::assistant("done")];
        assert_eq!(monitor.decide(&history, "swap again").await, Tier::Smart);
        assert_eq!(fast.calls(), 1);
    }

    #[test]
    fn test_missing_optional_credentials_do_not_block_startup() {
        let tiers = TiersSection {
            fast: section(Provider::OpenAi),
            smart: section(Provider::Ollama),
            cheap: section(Provider::DeepSeek),
        };
        let backends =
            |_: &TierBinding| -> Result<Arc<dyn LlmClient>, AgentError> { Ok(Arc::new(ScriptedLlmClient::always("ok"))) };
        let registry = TierRegistry::build(&tiers, &StaticCredentials::new(), &backends).unwrap();
        assert!(registry.resolve(Tier::Fast).is_none());
        assert!(registry.resolve(Tier::Cheap).is_none());
        assert!(registry.resolve(Tier::Smart).is_some());
    }

    #[test]
    fn test_missing_smart_credential_is_fatal() {
        let tiers = TiersSection {
            fast: section(Provider::Mock),
            smart: section(Provider::OpenAi),
            cheap: section(Provider::Mock),
        };
        let backends =
            |_: &TierBinding| -> Result<Arc<dyn LlmClient>, AgentError> { Ok(Arc::new(ScriptedLlmClient::always("ok"))) };
        let err = TierRegistry::build(&tiers, &StaticCredentials::new(), &backends)
            .err()
            .expect("smart tier without credential must fail");
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[tokio::test]
    async fn test_loop_ends_when_no_executor_can_be_built() {
        let backend = Arc::new(ScriptedLlmClient::always("ok"));
        let registry = registry(backend);
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let reg = Arc::clone(&registry);
        // 只能成功构造一次
        let factory = move |b: &TierBinding, _: AgentMode| -> Result<Box<dyn Executor>, AgentError> {
            if counter.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(AgentError::Config("credential revoked".into()));
            }
            Ok(Box::new(TurnExecutor::new(b.tier, Arc::clone(&reg), "sys", 10)))
        };
        let mut lifecycle = ExecutorLifecycle::new(registry, Arc::new(factory), AgentMode::Autonomous);
        lifecycle.create(Tier::Smart).unwrap();

        let sink = Arc::new(MemorySink::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let waiter = Waiter::new(sleeper.clone(), CancellationToken::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut controller =
            AutonomousController::new(lifecycle, &AutonomousSection::default(), sink.clone(), waiter).with_events(tx);

        let exit = controller.run().await.unwrap();
        assert!(matches!(exit, LoopExit::ExecutorUnavailable(AgentError::ExecutorUnavailable(_))));

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        // 第 5 轮刷新失败进入恢复阶梯，第 6 轮重建失败后退出
        let failures: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                LoopEvent::Failure { iteration, .. } => Some(*iteration),
                _ => None,
            })
            .collect();
        assert_eq!(failures, vec![5]);
        assert!(matches!(events.last(), Some(LoopEvent::Stopped { .. })));
        assert_eq!(sleeper.durations(), ms(&[5000, 5000, 5000, 5000, 3000]));
        assert_eq!(sink.count(Notice::Error), 1);
    }

    /// 写满 n 条后触发取消的展示终端
    struct CancelAfter {
        remaining: Mutex<usize>,
        cancel: CancellationToken,
    }

    impl DisplaySink for CancelAfter {
        fn write(&self, _boxed_text: &str) {
            let mut remaining = self.remaining.lock().unwrap();
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.cancel.cancel();
            }
        }
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_pacing_wait() {
        let backend = Arc::new(ScriptedLlmClient::always("ok"));
        let registry = registry(Arc::clone(&backend));
        let factory = Arc::new(TurnExecutorFactory::new(Arc::clone(&registry), "sys"));
        let mut lifecycle = ExecutorLifecycle::new(registry, factory, AgentMode::Autonomous);
        lifecycle.create(Tier::Smart).unwrap();

        let cancel = CancellationToken::new();
        let sink = Arc::new(CancelAfter {
            remaining: Mutex::new(3),
            cancel: cancel.clone(),
        });
        let sleeper = Arc::new(RecordingSleeper::new());
        let waiter = Waiter::new(sleeper.clone(), cancel);
        let mut controller = AutonomousController::new(lifecycle, &AutonomousSection::default(), sink, waiter);

        let exit = controller.run().await.unwrap();
        assert!(matches!(exit, LoopExit::Cancelled));
        assert_eq!(backend.calls(), 3);
        // 第三轮的节奏等待被取消，不计入
        assert_eq!(sleeper.durations(), ms(&[5000, 5000]));
    }

    #[tokio::test]
    async fn test_sigterm_stops_loop_and_keeps_reason() {
        let backend = Arc::new(ScriptedLlmClient::always("ok"));
        let registry = registry(Arc::clone(&backend));
        let factory = Arc::new(TurnExecutorFactory::new(Arc::clone(&registry), "sys"));
        let mut lifecycle = ExecutorLifecycle::new(registry, factory, AgentMode::Autonomous);
        lifecycle.create(Tier::Smart).unwrap();

        let shutdown = ShutdownManager::new();
        let sleeper = Arc::new(RecordingSleeper::new());
        let waiter = Waiter::new(sleeper.clone(), shutdown.token());
        let mut controller =
            AutonomousController::new(lifecycle, &AutonomousSection::default(), Arc::new(MemorySink::new()), waiter);

        shutdown.shutdown(ShutdownReason::Signal);
        shutdown.shutdown(ShutdownReason::UserInitiated);

        let exit = controller.run().await.unwrap();
        assert!(matches!(exit, LoopExit::Cancelled));
        assert_eq!(shutdown.reason(), Some(ShutdownReason::Signal));
        assert_eq!(backend.calls(), 0);
        assert!(sleeper.durations().is_empty());
    }
}
