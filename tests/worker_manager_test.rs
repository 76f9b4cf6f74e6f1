//! WorkerManager 集成测试：并发去重、替换、强制停止、超时升级、重启与真实 Agent 运行

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::broadcast;
    use tokio_util::sync::CancellationToken;

    use triage::agent::{AgentComponents, AgentRunner};
    use triage::config::AppConfig;
    use triage::core::{
        AgentError, Backoff, StopReason, ThreadRunner, WorkerConfig, WorkerEvent, WorkerManager,
        WorkerState, WorkerStatus,
    };
    use triage::knowledge::InMemoryKnowledgeBase;
    use triage::llm::{LlmError, MockLlmClient};
    use triage::react::{RunFailure, RunSuccess};
    use triage::store::{
        Direction, DraftResponse, DraftStatus, InMemoryStore, NewEmail, NewThread, RecordId,
        SupportStore,
    };

    fn config() -> WorkerConfig {
        WorkerConfig {
            max_restarts: 2,
            restart_backoff: Backoff::new(1, 10),
            start_timeout: Duration::from_secs(2),
            stop_timeout: Duration::from_millis(200),
        }
    }

    fn cancelled() -> RunFailure {
        RunFailure {
            error: AgentError::Cancelled,
            actions: vec![],
        }
    }

    fn success(thread_id: RecordId) -> RunSuccess {
        RunSuccess {
            draft: DraftResponse {
                id: 1,
                email_id: 1,
                thread_id,
                body: "done".into(),
                status: DraftStatus::Pending,
                version: 1,
                parent_draft_id: None,
                confidence: 0.85,
                citation: None,
                created_at: Utc::now(),
            },
            actions: vec![],
        }
    }

    /// 运行到被取消为止；统计启动次数
    #[derive(Default)]
    struct ParkedRunner {
        prepares: AtomicUsize,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl ThreadRunner for ParkedRunner {
        async fn prepare(&self, _thread_id: RecordId) -> Result<(), AgentError> {
            self.prepares.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        }

        async fn run(
            &self,
            _thread_id: RecordId,
            stop: CancellationToken,
        ) -> Result<RunSuccess, RunFailure> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            stop.cancelled().await;
            Err(cancelled())
        }
    }

    /// 忽略停止信号的运行（模拟卡在一次工具调用里）
    struct StuckRunner;

    #[async_trait]
    impl ThreadRunner for StuckRunner {
        async fn run(
            &self,
            _thread_id: RecordId,
            _stop: CancellationToken,
        ) -> Result<RunSuccess, RunFailure> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(cancelled())
        }
    }

    /// 前 n 次运行以瞬时模型错误失败，之后成功
    struct FlakyRunner {
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl ThreadRunner for FlakyRunner {
        async fn run(
            &self,
            thread_id: RecordId,
            _stop: CancellationToken,
        ) -> Result<RunSuccess, RunFailure> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(RunFailure {
                    error: AgentError::Llm(LlmError::Network("connection reset".into())),
                    actions: vec![],
                });
            }
            Ok(success(thread_id))
        }
    }

    async fn collect_until_terminal(
        rx: &mut broadcast::Receiver<WorkerEvent>,
        thread_id: RecordId,
    ) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("event in time")
                .expect("bus open");
            if event.thread_id() != thread_id {
                continue;
            }
            let terminal = matches!(event, WorkerEvent::Stopped { .. } | WorkerEvent::Failed { .. });
            events.push(event);
            if terminal {
                return events;
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_start_if_not_active_yields_single_worker() {
        let runner = Arc::new(ParkedRunner::default());
        let manager = WorkerManager::new(runner.clone(), config());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let m = manager.clone();
                tokio::spawn(async move { m.start_worker_for_thread_if_not_active(42).await })
            })
            .collect();
        let mut workers = Vec::new();
        for handle in handles {
            workers.push(handle.await.unwrap().unwrap());
        }

        assert!(workers.iter().all(|w| Arc::ptr_eq(w, &workers[0])));
        assert_eq!(runner.prepares.load(Ordering::SeqCst), 1);
        assert_eq!(manager.get_active_threads().await, vec![42]);
        assert_eq!(manager.get_worker_status(42).await, WorkerStatus::Running);
        manager.stop_all_workers().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_replacing_starts_leave_one_active_worker() {
        let runner = Arc::new(ParkedRunner::default());
        let manager = WorkerManager::new(runner.clone(), config());

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let m = manager.clone();
                tokio::spawn(async move { m.start_worker_for_thread(7).await })
            })
            .collect();
        let mut workers = Vec::new();
        for handle in handles {
            workers.push(handle.await.unwrap().unwrap());
        }

        let live: Vec<_> = workers.iter().filter(|w| !w.state().is_terminal()).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(runner.prepares.load(Ordering::SeqCst), 5);
        let current = manager.get_worker(7).await.unwrap();
        assert!(Arc::ptr_eq(&current, live[0]));
        manager.stop_all_workers().await;
    }

    #[tokio::test]
    async fn test_idempotent_start_returns_existing_worker() {
        let manager = WorkerManager::new(Arc::new(ParkedRunner::default()), config());
        let first = manager.start_worker_for_thread_if_not_active(3).await.unwrap();
        let second = manager.start_worker_for_thread_if_not_active(3).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        manager.stop_all_workers().await;
    }

    #[tokio::test]
    async fn test_force_stop_makes_thread_not_found() {
        let manager = WorkerManager::new(Arc::new(ParkedRunner::default()), config());
        let mut events = manager.subscribe();
        let worker = manager.start_worker_for_thread(11).await.unwrap();

        manager.force_stop_worker_for_thread(11).await.unwrap();

        assert_eq!(manager.get_worker_status(11).await, WorkerStatus::NotFound);
        assert!(manager.get_active_threads().await.is_empty());
        assert_eq!(worker.state(), WorkerState::Stopped);
        let trail = collect_until_terminal(&mut events, 11).await;
        assert_eq!(
            trail.last(),
            Some(&WorkerEvent::Stopped {
                thread_id: 11,
                reason: StopReason::Forced
            })
        );
    }

    #[tokio::test]
    async fn test_stop_escalates_to_force_after_timeout() {
        let manager = WorkerManager::new(Arc::new(StuckRunner), config());
        let mut events = manager.subscribe();
        manager.start_worker_for_thread(12).await.unwrap();

        let stopped = tokio::time::timeout(
            Duration::from_secs(2),
            manager.stop_worker_for_thread(12, Some("shutdown")),
        )
        .await
        .expect("stop is bounded by the stop timeout");
        assert!(stopped.is_ok());
        assert_eq!(manager.get_worker_status(12).await, WorkerStatus::NotFound);
        let trail = collect_until_terminal(&mut events, 12).await;
        assert!(matches!(
            trail.last(),
            Some(WorkerEvent::Stopped {
                reason: StopReason::Forced,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_transient_failures_restart_then_complete() {
        let manager = WorkerManager::new(
            Arc::new(FlakyRunner {
                failures_left: AtomicUsize::new(2),
            }),
            config(),
        );
        let mut events = manager.subscribe();
        let worker = manager.start_worker_for_thread(13).await.unwrap();

        let trail = collect_until_terminal(&mut events, 13).await;
        let errors: Vec<u32> = trail
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Error { attempt, .. } => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(errors, vec![1, 2]);
        assert_eq!(
            trail.last(),
            Some(&WorkerEvent::Stopped {
                thread_id: 13,
                reason: StopReason::Completed
            })
        );
        assert_eq!(worker.restarts(), 2);
        assert!(worker.outcome().unwrap().is_success());
    }

    #[tokio::test]
    async fn test_restart_budget_exhaustion_ends_failed() {
        let manager = WorkerManager::new(
            Arc::new(FlakyRunner {
                failures_left: AtomicUsize::new(10),
            }),
            config(),
        );
        let mut events = manager.subscribe();
        let worker = manager.start_worker_for_thread(14).await.unwrap();

        let trail = collect_until_terminal(&mut events, 14).await;
        assert!(matches!(trail.last(), Some(WorkerEvent::Failed { thread_id: 14, .. })));
        assert_eq!(worker.wait_terminal().await, WorkerState::Failed);
        assert_eq!(worker.restarts(), 3);
    }

    #[tokio::test]
    async fn test_agent_worker_drafts_reply_and_is_reaped() {
        let store = Arc::new(InMemoryStore::new());
        let thread = store
            .insert_thread(NewThread {
                subject: "Shipping time".into(),
                participants: vec!["lee@example.com".into()],
            })
            .await
            .unwrap();
        store
            .insert_email(NewEmail {
                thread_id: thread.id,
                sender: "lee@example.com".into(),
                recipients: vec!["support@example.com".into()],
                body: "How long does shipping take to Canada?".into(),
                direction: Direction::Inbound,
                sent_at: Utc::now(),
            })
            .await
            .unwrap();
        let knowledge = InMemoryKnowledgeBase::new(3).with_document(
            "shipping.md",
            "Shipping to Canada takes 7 business days.",
        );
        let components = AgentComponents::new(
            store.clone(),
            Arc::new(knowledge),
            Arc::new(MockLlmClient::new()),
            &AppConfig::default(),
        );
        let manager = WorkerManager::new(Arc::new(AgentRunner::new(Arc::new(components))), config());
        let mut events = manager.subscribe();

        let worker = manager.start_worker_for_thread(thread.id).await.unwrap();
        let trail = collect_until_terminal(&mut events, thread.id).await;
        assert_eq!(trail.first(), Some(&WorkerEvent::Running { thread_id: thread.id }));

        let report = worker.outcome().expect("report");
        let draft = report.draft.expect("draft");
        assert_eq!(draft.citation.unwrap().filename, "shipping.md");
        assert_eq!(store.list_drafts_for_thread(thread.id).await.unwrap().len(), 1);

        tokio::time::timeout(Duration::from_secs(2), async {
            while manager.get_worker_status(thread.id).await != WorkerStatus::NotFound {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("worker reaped");
    }

    #[tokio::test]
    async fn test_agent_worker_for_missing_thread_fails_to_start() {
        let components = AgentComponents::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryKnowledgeBase::new(3)),
            Arc::new(MockLlmClient::new()),
            &AppConfig::default(),
        );
        let manager = WorkerManager::new(Arc::new(AgentRunner::new(Arc::new(components))), config());
        assert!(manager.start_worker_for_thread(999).await.is_err());
        assert_eq!(manager.get_worker_status(999).await, WorkerStatus::NotFound);
    }
}
