//! 运行与生命周期错误类型、恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 Retry / RetryWithPrompt / Abort。
//! 工具级失败不在这里：它们是 ToolOutput { success: false } 值。

use std::time::Duration;

use thiserror::Error;

use crate::llm::LlmError;
use crate::store::{RecordId, StoreError};

/// 单次推理循环运行失败的原因
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Thread {0} has no emails")]
    EmptyThread(RecordId),

    #[error("Exceeded {0} turns without writing a draft")]
    MaxTurnsExceeded(usize),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    /// 重启 Worker 也无法恢复的失败
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            AgentError::Llm(LlmError::Auth(_))
                | AgentError::EmptyThread(_)
                | AgentError::MaxTurnsExceeded(_)
                | AgentError::ConfigError(_)
        )
    }
}

/// Worker 生命周期错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("Worker for thread {0} did not start within {1:?}")]
    StartTimeout(RecordId, Duration),

    #[error("Worker for thread {0} failed to start: {1}")]
    StartFailed(RecordId, String),

    #[error("Worker for thread {thread_id} cannot go from {from} to {to}")]
    InvalidTransition {
        thread_id: RecordId,
        from: &'static str,
        to: &'static str,
    },

    #[error("No worker for thread {0}")]
    NotFound(RecordId),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 等待后重试同一次模型调用（瞬时故障）
    Retry { delay: Duration },
    /// 将提示注入下一轮，让 LLM 重试（如 JSON 格式错误）
    RetryWithPrompt(String),
    /// 终止当前运行
    Abort,
}
