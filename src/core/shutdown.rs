//! 进程退出：Ctrl+C / SIGTERM 到达时停掉所有 Worker 再返回

use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::core::worker_manager::WorkerManager;

/// 触发退出的系统信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => f.write_str("ctrl_c"),
            ShutdownSignal::Terminate => f.write_str("sigterm"),
        }
    }
}

/// 主循环如何结束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// 所有线程都已处理完
    Drained,
    /// 被信号打断，活跃 Worker 已停止
    Interrupted(ShutdownSignal),
}

/// 等待 Ctrl+C 或（unix 上的）SIGTERM；信号处理器装不上时该分支永不返回
pub async fn wait_for_signal() -> ShutdownSignal {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownSignal::Interrupt,
            Err(e) => {
                tracing::warn!(error = %e, "Ctrl+C handler unavailable");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                ShutdownSignal::Terminate
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending().await
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<ShutdownSignal>();

    tokio::select! {
        signal = ctrl_c => signal,
        signal = terminate => signal,
    }
}

/// 运行 app 直到它结束或 signal 先到；信号到达时在 drain_timeout 内停掉所有 Worker
pub async fn run_until_shutdown<A, S>(
    manager: &WorkerManager,
    app: A,
    signal: S,
    drain_timeout: Duration,
) -> ShutdownOutcome
where
    A: Future<Output = ()>,
    S: Future<Output = ShutdownSignal>,
{
    let signal = tokio::select! {
        _ = app => return ShutdownOutcome::Drained,
        signal = signal => signal,
    };

    let active = manager.get_active_threads().await;
    tracing::info!(signal = %signal, threads = ?active, "Shutdown requested, stopping workers");
    if tokio::time::timeout(drain_timeout, manager.stop_all_workers())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_ms = drain_timeout.as_millis() as u64,
            "Workers did not stop before the drain timeout"
        );
    }
    ShutdownOutcome::Interrupted(signal)
}
