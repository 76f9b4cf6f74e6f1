//! 单线程 Worker：把一个线程的推理循环放进后台任务并管理其生命周期
//!
//! 状态保存在 watch 通道里，所有转换经 `transition` 校验；只有转换成功才广播事件，
//! 所以 forceStop 与后台任务的并发收尾不会产生重复或矛盾的事件。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::backoff::Backoff;
use crate::core::error::{AgentError, WorkerError};
use crate::core::lifecycle::{StopReason, WorkerEvent, WorkerState};
use crate::react::{RunFailure, RunReport, RunSuccess};
use crate::store::RecordId;

/// Worker 执行的工作单元（生产环境为 Agent，测试中为脚本化实现）
#[async_trait]
pub trait ThreadRunner: Send + Sync {
    /// 进入 running 前的准备；超过 start_timeout 视为启动失败
    async fn prepare(&self, _thread_id: RecordId) -> Result<(), AgentError> {
        Ok(())
    }

    async fn run(
        &self,
        thread_id: RecordId,
        stop: CancellationToken,
    ) -> Result<RunSuccess, RunFailure>;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// 可恢复失败后的最大重启次数
    pub max_restarts: u32,
    pub restart_backoff: Backoff,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_restarts: 2,
            restart_backoff: Backoff::new(1_000, 30_000),
            start_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(30),
        }
    }
}

pub struct Worker {
    thread_id: RecordId,
    config: WorkerConfig,
    runner: Arc<dyn ThreadRunner>,
    state_tx: watch::Sender<WorkerState>,
    events: broadcast::Sender<WorkerEvent>,
    cancel_token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    outcome: Mutex<Option<RunReport>>,
    restarts: AtomicU32,
}

impl Worker {
    pub fn new(
        thread_id: RecordId,
        runner: Arc<dyn ThreadRunner>,
        config: WorkerConfig,
        events: broadcast::Sender<WorkerEvent>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(WorkerState::Idle);
        Arc::new(Self {
            thread_id,
            config,
            runner,
            state_tx,
            events,
            cancel_token: CancellationToken::new(),
            handle: Mutex::new(None),
            outcome: Mutex::new(None),
            restarts: AtomicU32::new(0),
        })
    }

    pub fn thread_id(&self) -> RecordId {
        self.thread_id
    }

    pub fn state(&self) -> WorkerState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state_tx.subscribe()
    }

    /// 已发生的重启次数
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// 最近一次运行的报告（尚未跑完一次时为 None）
    pub fn outcome(&self) -> Option<RunReport> {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn transition(&self, next: WorkerState) -> Result<WorkerState, WorkerError> {
        let mut result = Ok(next);
        self.state_tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                result = Ok(*state);
                *state = next;
                true
            } else {
                result = Err(WorkerError::InvalidTransition {
                    thread_id: self.thread_id,
                    from: state.as_str(),
                    to: next.as_str(),
                });
                false
            }
        });
        if let Ok(from) = result {
            tracing::debug!(
                thread_id = self.thread_id,
                from = from.as_str(),
                to = next.as_str(),
                "Worker state changed"
            );
        }
        result
    }

    /// 转换成功时广播事件；返回是否转换成功
    fn transition_and_emit(&self, next: WorkerState, event: Option<WorkerEvent>) -> bool {
        if self.transition(next).is_err() {
            return false;
        }
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
        true
    }

    fn finish(&self, reason: StopReason) {
        self.transition_and_emit(
            WorkerState::Stopped,
            Some(WorkerEvent::Stopped {
                thread_id: self.thread_id,
                reason,
            }),
        );
    }

    fn fail(&self, error: String) {
        tracing::error!(thread_id = self.thread_id, error = %error, "Worker failed");
        self.transition_and_emit(
            WorkerState::Failed,
            Some(WorkerEvent::Failed {
                thread_id: self.thread_id,
                error,
            }),
        );
    }

    fn set_outcome(&self, report: RunReport) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(report);
    }

    /// idle → starting → running；后台任务在 start_timeout 内未进入 running 则转 failed
    pub async fn start(self: &Arc<Self>) -> Result<(), WorkerError> {
        self.transition(WorkerState::Starting)?;

        let (started_tx, started_rx) = oneshot::channel();
        let worker = Arc::clone(self);
        let handle = tokio::spawn(async move { worker.run_task(started_tx).await });
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        match tokio::time::timeout(self.config.start_timeout, started_rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                let reason = match self.state() {
                    WorkerState::Stopped => "stopped before running".to_string(),
                    state => format!("task exited while {}", state.as_str()),
                };
                Err(WorkerError::StartFailed(self.thread_id, reason))
            }
            Err(_) => {
                if let Some(handle) = self.take_handle() {
                    handle.abort();
                }
                self.cancel_token.cancel();
                let err = WorkerError::StartTimeout(self.thread_id, self.config.start_timeout);
                self.fail(err.to_string());
                Err(err)
            }
        }
    }

    async fn run_task(self: Arc<Self>, started_tx: oneshot::Sender<()>) {
        if let Err(e) = self.runner.prepare(self.thread_id).await {
            self.fail(format!("prepare failed: {e}"));
            return;
        }
        if !self.transition_and_emit(
            WorkerState::Running,
            Some(WorkerEvent::Running {
                thread_id: self.thread_id,
            }),
        ) {
            // stop 在进入 running 之前到达
            self.finish(StopReason::Requested);
            return;
        }
        let _ = started_tx.send(());
        tracing::info!(thread_id = self.thread_id, "Worker running");

        loop {
            let result = self
                .runner
                .run(self.thread_id, self.cancel_token.child_token())
                .await;
            self.set_outcome(RunReport::from_result(&result));

            let failure = match result {
                Ok(success) => {
                    tracing::info!(
                        thread_id = self.thread_id,
                        draft_id = success.draft.id,
                        "Worker completed"
                    );
                    self.finish(StopReason::Completed);
                    return;
                }
                Err(failure) => failure,
            };

            if self.cancel_token.is_cancelled() || matches!(failure.error, AgentError::Cancelled) {
                self.finish(StopReason::Requested);
                return;
            }
            if failure.error.is_permanent() {
                self.fail(failure.error.to_string());
                return;
            }

            let attempt = self.restarts.fetch_add(1, Ordering::SeqCst) + 1;
            let error = failure.error.to_string();
            tracing::warn!(thread_id = self.thread_id, attempt, error = %error, "Worker run failed");
            self.transition_and_emit(
                WorkerState::Error,
                Some(WorkerEvent::Error {
                    thread_id: self.thread_id,
                    attempt,
                    error: error.clone(),
                }),
            );
            if attempt > self.config.max_restarts {
                self.fail(format!(
                    "giving up after {} restarts: {error}",
                    self.config.max_restarts
                ));
                return;
            }

            let delay = self.config.restart_backoff.delay(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel_token.cancelled() => {
                    self.finish(StopReason::Requested);
                    return;
                }
            }
            if self.transition(WorkerState::Starting).is_err()
                || !self.transition_and_emit(
                    WorkerState::Running,
                    Some(WorkerEvent::Running {
                        thread_id: self.thread_id,
                    }),
                )
            {
                self.finish(StopReason::Requested);
                return;
            }
            tracing::info!(thread_id = self.thread_id, attempt, "Worker restarted");
        }
    }

    fn take_handle(&self) -> Option<JoinHandle<()>> {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// 协作式停止：当前一轮结束后退出，等到终态为止
    pub async fn stop(&self) {
        match self.state() {
            WorkerState::Idle => {
                self.finish(StopReason::Requested);
                return;
            }
            WorkerState::Starting | WorkerState::Running => {
                let _ = self.transition(WorkerState::Stopping);
            }
            _ => {}
        }
        self.cancel_token.cancel();
        self.wait_terminal().await;
    }

    /// stop；超过 timeout 则升级为 force_stop
    pub async fn stop_or_force(&self, timeout: Duration) {
        if tokio::time::timeout(timeout, self.stop()).await.is_err() {
            tracing::warn!(
                thread_id = self.thread_id,
                timeout_ms = timeout.as_millis() as u64,
                "Worker did not stop in time, forcing"
            );
            self.force_stop();
        }
    }

    /// 立即中止后台任务并进入 stopped，放弃进行中的一轮
    pub fn force_stop(&self) {
        if let Some(handle) = self.take_handle() {
            handle.abort();
        }
        self.cancel_token.cancel();
        if !self.state().is_terminal() {
            self.finish(StopReason::Forced);
        }
    }

    pub async fn wait_terminal(&self) -> WorkerState {
        let mut rx = self.state_tx.subscribe();
        let state = match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }
}
