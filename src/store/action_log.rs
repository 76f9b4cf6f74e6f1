//! Agent 动作审计日志
//!
//! 对 SupportStore::log_agent_action 的薄封装：统一工具条目与非工具条目（model_response /
//! model_retry / run_failed）的 metadata 形状，并按顺序收集本次运行写入的条目。

use std::sync::Arc;

use serde_json::{json, Value};

use crate::store::{ActionStatus, AgentAction, NewAgentAction, RecordId, StoreError, SupportStore};

pub const MODEL_RESPONSE: &str = "model_response";
pub const MODEL_RETRY: &str = "model_retry";
pub const RUN_FAILED: &str = "run_failed";

/// 原始模型输出写入 metadata 时的截断长度（字符）
const MAX_RAW_OUTPUT_CHARS: usize = 4000;

/// 单次运行的审计日志句柄
pub struct ActionLog {
    store: Arc<dyn SupportStore>,
    thread_id: RecordId,
    entries: Vec<AgentAction>,
}

impl ActionLog {
    pub fn new(store: Arc<dyn SupportStore>, thread_id: RecordId) -> Self {
        Self {
            store,
            thread_id,
            entries: Vec::new(),
        }
    }

    pub fn thread_id(&self) -> RecordId {
        self.thread_id
    }

    /// 工具调用条目：metadata = {status, parameters, result | error}
    pub async fn record_tool(
        &mut self,
        tool: &str,
        description: String,
        parameters: &Value,
        status: ActionStatus,
        payload: Value,
    ) -> Result<&AgentAction, StoreError> {
        let mut metadata = json!({
            "status": status.as_str(),
            "parameters": parameters,
        });
        let key = match status {
            ActionStatus::Success => "result",
            ActionStatus::Error => "error",
        };
        metadata[key] = payload;
        self.append(tool, description, metadata).await
    }

    /// 每轮模型原始输出
    pub async fn record_model_output(
        &mut self,
        turn: usize,
        raw: &str,
    ) -> Result<&AgentAction, StoreError> {
        let truncated: String = raw.chars().take(MAX_RAW_OUTPUT_CHARS).collect();
        self.append(
            MODEL_RESPONSE,
            format!("Model responded on turn {turn}"),
            json!({ "turn": turn, "output": truncated }),
        )
        .await
    }

    pub async fn record_retry(
        &mut self,
        attempt: u32,
        delay_ms: u64,
        reason: &str,
    ) -> Result<&AgentAction, StoreError> {
        self.append(
            MODEL_RETRY,
            format!("Retrying model call (attempt {attempt}) after {delay_ms} ms"),
            json!({ "attempt": attempt, "delay_ms": delay_ms, "reason": reason }),
        )
        .await
    }

    pub async fn record_run_failed(&mut self, error: &str) -> Result<&AgentAction, StoreError> {
        self.append(
            RUN_FAILED,
            format!("Run failed: {error}"),
            json!({ "error": error }),
        )
        .await
    }

    async fn append(
        &mut self,
        action: &str,
        description: String,
        metadata: Value,
    ) -> Result<&AgentAction, StoreError> {
        let entry = self
            .store
            .log_agent_action(NewAgentAction {
                thread_id: self.thread_id,
                action: action.to_string(),
                description,
                metadata,
            })
            .await?;
        self.entries.push(entry);
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// 本次运行写入的条目（按写入顺序）
    pub fn entries(&self) -> &[AgentAction] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<AgentAction> {
        self.entries
    }
}
