//! 工具层：封闭的八个客服工具、显式运行上下文、注册表与带审计的执行器
//!
//! 工具失败不是错误：一律返回 `ToolOutput { success: false, error }`，由执行器写入审计日志，
//! 再作为 Observation 回给模型。

pub mod args;
pub mod context;
pub mod email_search;
pub mod executor;
pub mod explain;
pub mod knowledge;
pub mod read_thread;
pub mod registry;
pub mod schema;
pub mod tag_email;
pub mod write_draft;

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use context::RunContext;
pub use email_search::{GetCustomerHistoryTool, SearchCustomerEmailsTool, SearchEmailsTool};
pub use executor::ToolExecutor;
pub use explain::ExplainNextToolCallTool;
pub use knowledge::SearchKnowledgeBaseTool;
pub use read_thread::ReadThreadTool;
pub use registry::{Tool, ToolRegistry};
pub use schema::tool_call_schema_json;
pub use tag_email::TagEmailTool;
pub use write_draft::WriteDraftTool;

/// 工具名（封闭集合，模型输出中的 "tool" 字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    SearchEmails,
    GetCustomerHistory,
    SearchCustomerEmails,
    TagEmail,
    SearchKnowledgeBase,
    ReadThread,
    WriteDraft,
    ExplainNextToolCall,
}

impl ToolName {
    pub const ALL: [ToolName; 8] = [
        ToolName::SearchEmails,
        ToolName::GetCustomerHistory,
        ToolName::SearchCustomerEmails,
        ToolName::TagEmail,
        ToolName::SearchKnowledgeBase,
        ToolName::ReadThread,
        ToolName::WriteDraft,
        ToolName::ExplainNextToolCall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::SearchEmails => "search_emails",
            ToolName::GetCustomerHistory => "get_customer_history",
            ToolName::SearchCustomerEmails => "search_customer_emails",
            ToolName::TagEmail => "tag_email",
            ToolName::SearchKnowledgeBase => "search_knowledge_base",
            ToolName::ReadThread => "read_thread",
            ToolName::WriteDraft => "write_draft",
            ToolName::ExplainNextToolCall => "explain_next_tool_call",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| format!("Unknown tool: {s}"))
    }
}

/// 工具执行结果：success 与 data / error 二选一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// 序列化为回给模型的 Observation 文本
    pub fn to_observation(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"success":false,"error":"unserializable output: {e}"}}"#))
    }
}
