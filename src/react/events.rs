//! 推理循环过程事件：用于流式展示每轮的模型输出、工具调用与结果

use serde::Serialize;

use crate::store::RecordId;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// 新一轮开始
    TurnStarted {
        thread_id: RecordId,
        turn: usize,
        max_turns: usize,
    },
    /// 模型输出（预览，避免过长）
    ModelOutput { preview: String },
    /// 模型调用失败，退避后重试
    ModelRetry {
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    /// 错误恢复动作（RetryWithPrompt / Reminder / Abort）
    Recovery { action: String, detail: String },
    /// 调用工具
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览）
    ToolResult {
        tool: String,
        success: bool,
        preview: String,
    },
    /// 草稿已保存，运行即将成功结束
    DraftWritten {
        draft_id: RecordId,
        has_citation: bool,
    },
    /// Token 使用统计（本次运行增量）
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
    },
    /// 运行失败
    Error { text: String },
}
