//! WorkerManager：按线程 id 维护至多一个活跃 Worker
//!
//! - 同一线程的 start / stop 由线程级锁串行化；并发 start 只会留下一个 Worker
//! - starting 集合记录正在启动的 Worker，状态查询与去重都会看到它
//! - Worker 进入终态后由 reaper 任务从表中移除（仅当表中仍是同一个 Worker）

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{broadcast, Mutex};

use crate::core::error::WorkerError;
use crate::core::lifecycle::{WorkerEvent, WorkerStatus};
use crate::core::worker::{ThreadRunner, Worker, WorkerConfig};
use crate::store::RecordId;

const EVENT_CAPACITY: usize = 256;

#[derive(Default)]
struct ManagerState {
    workers: HashMap<RecordId, Arc<Worker>>,
    starting: HashMap<RecordId, Arc<Worker>>,
    locks: HashMap<RecordId, Arc<Mutex<()>>>,
}

impl ManagerState {
    fn lookup(&self, thread_id: RecordId) -> Option<Arc<Worker>> {
        self.workers
            .get(&thread_id)
            .or_else(|| self.starting.get(&thread_id))
            .cloned()
    }

    fn remove_if_same(&mut self, worker: &Arc<Worker>) {
        let id = worker.thread_id();
        if self.workers.get(&id).is_some_and(|w| Arc::ptr_eq(w, worker)) {
            self.workers.remove(&id);
        }
        if self.starting.get(&id).is_some_and(|w| Arc::ptr_eq(w, worker)) {
            self.starting.remove(&id);
        }
        self.prune_lock(id);
    }

    /// 没有 Worker 且无人持有时移除线程锁
    fn prune_lock(&mut self, thread_id: RecordId) {
        if self.locks.get(&thread_id).is_some_and(|l| Arc::strong_count(l) == 1)
            && !self.workers.contains_key(&thread_id)
            && !self.starting.contains_key(&thread_id)
        {
            self.locks.remove(&thread_id);
        }
    }
}

struct ManagerInner {
    runner: Arc<dyn ThreadRunner>,
    config: WorkerConfig,
    events: broadcast::Sender<WorkerEvent>,
    state: Mutex<ManagerState>,
}

#[derive(Clone)]
pub struct WorkerManager {
    inner: Arc<ManagerInner>,
}

impl WorkerManager {
    pub fn new(runner: Arc<dyn ThreadRunner>, config: WorkerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(ManagerInner {
                runner,
                config,
                events,
                state: Mutex::new(ManagerState::default()),
            }),
        }
    }

    /// 订阅所有 Worker 的生命周期事件
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    pub async fn get_worker(&self, thread_id: RecordId) -> Option<Arc<Worker>> {
        self.inner.state.lock().await.lookup(thread_id)
    }

    async fn thread_lock(&self, thread_id: RecordId) -> Arc<Mutex<()>> {
        self.inner
            .state
            .lock()
            .await
            .locks
            .entry(thread_id)
            .or_default()
            .clone()
    }

    /// 归还 thread_lock 取得的锁；失败路径（NotFound、启动失败）也要调用
    async fn release_thread_lock(&self, thread_id: RecordId, lock: Arc<Mutex<()>>) {
        let mut state = self.inner.state.lock().await;
        drop(lock);
        state.prune_lock(thread_id);
    }

    /// 启动（或替换）线程的 Worker：先停掉已有 Worker，再启动新的
    pub async fn start_worker_for_thread(
        &self,
        thread_id: RecordId,
    ) -> Result<Arc<Worker>, WorkerError> {
        let lock = self.thread_lock(thread_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.start_locked(thread_id).await
        };
        self.release_thread_lock(thread_id, lock).await;
        result
    }

    /// 已有活跃（或正在启动的）Worker 时直接返回它
    pub async fn start_worker_for_thread_if_not_active(
        &self,
        thread_id: RecordId,
    ) -> Result<Arc<Worker>, WorkerError> {
        if let Some(worker) = self.active_worker(thread_id).await {
            return Ok(worker);
        }
        let lock = self.thread_lock(thread_id).await;
        let result = {
            let _guard = lock.lock().await;
            match self.active_worker(thread_id).await {
                Some(worker) => {
                    tracing::debug!(thread_id, "Worker became active while waiting, reusing it");
                    Ok(worker)
                }
                None => self.start_locked(thread_id).await,
            }
        };
        self.release_thread_lock(thread_id, lock).await;
        result
    }

    async fn active_worker(&self, thread_id: RecordId) -> Option<Arc<Worker>> {
        self.inner
            .state
            .lock()
            .await
            .lookup(thread_id)
            .filter(|w| !w.state().is_terminal())
    }

    async fn start_locked(&self, thread_id: RecordId) -> Result<Arc<Worker>, WorkerError> {
        let worker = Worker::new(
            thread_id,
            self.inner.runner.clone(),
            self.inner.config.clone(),
            self.inner.events.clone(),
        );
        let existing = {
            let mut state = self.inner.state.lock().await;
            state.starting.insert(thread_id, worker.clone());
            state.workers.remove(&thread_id)
        };
        if let Some(old) = existing {
            tracing::info!(thread_id, state = old.state().as_str(), "Replacing existing worker");
            old.stop_or_force(self.inner.config.stop_timeout).await;
        }

        let result = worker.start().await;

        let mut state = self.inner.state.lock().await;
        if state
            .starting
            .get(&thread_id)
            .is_some_and(|w| Arc::ptr_eq(w, &worker))
        {
            state.starting.remove(&thread_id);
        } else {
            // 启动期间被 forceStop 移除
            return result.map(|()| worker);
        }
        match result {
            Ok(()) if !worker.state().is_terminal() => {
                state.workers.insert(thread_id, worker.clone());
                drop(state);
                self.spawn_reaper(worker.clone());
                tracing::info!(thread_id, "Worker started");
                Ok(worker)
            }
            Ok(()) => Ok(worker),
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "Worker failed to start");
                Err(e)
            }
        }
    }

    fn spawn_reaper(&self, worker: Arc<Worker>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let final_state = worker.wait_terminal().await;
            inner.state.lock().await.remove_if_same(&worker);
            tracing::debug!(
                thread_id = worker.thread_id(),
                state = final_state.as_str(),
                "Worker reaped"
            );
        });
    }

    /// 协作式停止；超过 stop_timeout 升级为强制停止
    pub async fn stop_worker_for_thread(
        &self,
        thread_id: RecordId,
        reason: Option<&str>,
    ) -> Result<(), WorkerError> {
        let lock = self.thread_lock(thread_id).await;
        let result = {
            let _guard = lock.lock().await;
            match self.get_worker(thread_id).await {
                Some(worker) => {
                    tracing::info!(
                        thread_id,
                        reason = reason.unwrap_or("unspecified"),
                        "Stopping worker"
                    );
                    worker.stop_or_force(self.inner.config.stop_timeout).await;
                    self.inner.state.lock().await.remove_if_same(&worker);
                    Ok(())
                }
                None => Err(WorkerError::NotFound(thread_id)),
            }
        };
        self.release_thread_lock(thread_id, lock).await;
        result
    }

    /// 立即中止；返回后该线程的状态即为 not_found
    pub async fn force_stop_worker_for_thread(&self, thread_id: RecordId) -> Result<(), WorkerError> {
        let mut state = self.inner.state.lock().await;
        let worker = state.lookup(thread_id).ok_or(WorkerError::NotFound(thread_id))?;
        worker.force_stop();
        state.workers.remove(&thread_id);
        state.starting.remove(&thread_id);
        state.prune_lock(thread_id);
        tracing::info!(thread_id, "Worker force-stopped");
        Ok(())
    }

    pub async fn stop_all_workers(&self) {
        let workers: Vec<Arc<Worker>> = {
            let state = self.inner.state.lock().await;
            state
                .workers
                .values()
                .chain(state.starting.values())
                .cloned()
                .collect()
        };
        if workers.is_empty() {
            return;
        }
        tracing::info!(count = workers.len(), "Stopping all workers");
        let timeout = self.inner.config.stop_timeout;
        join_all(workers.iter().map(|w| w.stop_or_force(timeout))).await;
        let mut state = self.inner.state.lock().await;
        for worker in &workers {
            state.remove_if_same(worker);
        }
    }

    /// error / failed / idle 对外都报告为 stopped
    pub async fn get_worker_status(&self, thread_id: RecordId) -> WorkerStatus {
        let state = self.inner.state.lock().await;
        if let Some(worker) = state.workers.get(&thread_id) {
            return worker.state().into();
        }
        if state.starting.contains_key(&thread_id) {
            return WorkerStatus::Running;
        }
        WorkerStatus::NotFound
    }

    /// 有 Worker（含正在启动）的线程 id，升序
    pub async fn get_active_threads(&self) -> Vec<RecordId> {
        let state = self.inner.state.lock().await;
        let mut ids: Vec<RecordId> = state
            .workers
            .keys()
            .chain(state.starting.keys())
            .copied()
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
