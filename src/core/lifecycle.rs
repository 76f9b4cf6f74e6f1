//! Worker 生命周期：状态、合法转换、对外事件与状态投影
//!
//! ```text
//! idle ──> starting ──> running ──> stopped
//!            │  ▲         │  │
//!            │  │         │  └──> stopping ──> stopped
//!            │  └─ error <┘
//!            └──> failed <── error / running
//! ```
//! stopped 与 failed 为终态。

use serde::Serialize;

use crate::store::RecordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
    Failed,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
            WorkerState::Error => "error",
            WorkerState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Failed)
    }

    /// 合法转换表；终态不可离开
    pub fn can_transition_to(&self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Idle, Stopped)
                | (Starting, Running)
                | (Starting, Stopping)
                | (Starting, Stopped)
                | (Starting, Failed)
                | (Running, Stopping)
                | (Running, Stopped)
                | (Running, Error)
                | (Running, Failed)
                | (Stopping, Stopped)
                | (Error, Starting)
                | (Error, Stopped)
                | (Error, Failed)
        )
    }
}

/// 进入 stopped 的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// 运行写出草稿后正常结束
    Completed,
    /// 协作式 stop
    Requested,
    /// forceStop，放弃进行中的一轮
    Forced,
}

/// 生命周期事件（manager 级广播，带线程 id）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    Running {
        thread_id: RecordId,
    },
    Stopped {
        thread_id: RecordId,
        reason: StopReason,
    },
    Error {
        thread_id: RecordId,
        attempt: u32,
        error: String,
    },
    Failed {
        thread_id: RecordId,
        error: String,
    },
}

impl WorkerEvent {
    pub fn thread_id(&self) -> RecordId {
        match self {
            WorkerEvent::Running { thread_id }
            | WorkerEvent::Stopped { thread_id, .. }
            | WorkerEvent::Error { thread_id, .. }
            | WorkerEvent::Failed { thread_id, .. } => *thread_id,
        }
    }
}

/// 对外状态查询的投影：error 报告为 stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Running,
    Stopped,
    NotFound,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Running => "running",
            WorkerStatus::Stopped => "stopped",
            WorkerStatus::NotFound => "not_found",
        }
    }
}

impl From<WorkerState> for WorkerStatus {
    fn from(state: WorkerState) -> Self {
        match state {
            WorkerState::Starting | WorkerState::Running | WorkerState::Stopping => {
                WorkerStatus::Running
            }
            WorkerState::Idle | WorkerState::Stopped | WorkerState::Error | WorkerState::Failed => {
                WorkerStatus::Stopped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [WorkerState; 7] = [
        WorkerState::Idle,
        WorkerState::Starting,
        WorkerState::Running,
        WorkerState::Stopping,
        WorkerState::Stopped,
        WorkerState::Error,
        WorkerState::Failed,
    ];

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in [WorkerState::Stopped, WorkerState::Failed] {
            assert!(ALL.iter().all(|&to| !from.can_transition_to(to)));
        }
    }

    #[test]
    fn test_every_live_state_can_be_stopped() {
        for from in ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(from.can_transition_to(WorkerState::Stopped), "{from:?}");
        }
    }

    #[test]
    fn test_restart_path() {
        assert!(WorkerState::Running.can_transition_to(WorkerState::Error));
        assert!(WorkerState::Error.can_transition_to(WorkerState::Starting));
        assert!(WorkerState::Error.can_transition_to(WorkerState::Failed));
        assert!(!WorkerState::Error.can_transition_to(WorkerState::Running));
        assert!(!WorkerState::Idle.can_transition_to(WorkerState::Running));
    }

    #[test]
    fn test_status_projection_hides_error() {
        assert_eq!(WorkerStatus::from(WorkerState::Error), WorkerStatus::Stopped);
        assert_eq!(WorkerStatus::from(WorkerState::Stopping), WorkerStatus::Running);
        assert_eq!(WorkerStatus::NotFound.as_str(), "not_found");
    }

    #[test]
    fn test_event_serialization() {
        let ev = WorkerEvent::Stopped {
            thread_id: 3,
            reason: StopReason::Forced,
        };
        assert_eq!(
            serde_json::to_value(&ev).unwrap(),
            serde_json::json!({"event": "stopped", "thread_id": 3, "reason": "forced"})
        );
        assert_eq!(ev.thread_id(), 3);
    }
}
