//! 核心层：错误与恢复、退避、Worker 生命周期与管理、优雅关闭

pub mod backoff;
pub mod error;
pub mod lifecycle;
pub mod recovery;
pub mod shutdown;
pub mod worker;
pub mod worker_manager;

pub use backoff::{compute_backoff_ms, Backoff};
pub use error::{AgentError, RecoveryAction, WorkerError};
pub use lifecycle::{StopReason, WorkerEvent, WorkerState, WorkerStatus};
pub use recovery::RecoveryEngine;
pub use shutdown::{run_until_shutdown, wait_for_signal, ShutdownOutcome, ShutdownSignal};
pub use worker::{ThreadRunner, Worker, WorkerConfig};
pub use worker_manager::WorkerManager;
