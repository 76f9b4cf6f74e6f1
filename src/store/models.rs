//! 数据模型：Thread / Email / Tag / DraftResponse / AgentAction
//!
//! 与后端存储表一一对应；Agent 只读 Thread / Email，只通过工具写 Tag / DraftResponse，
//! AgentAction 为只追加的审计日志。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 线程 / 邮件 / 草稿 / 动作的主键类型
pub type RecordId = i64;

/// 置信度统一夹到 [0,1] 并保留 3 位小数（与存储层 decimal 列精度一致）；非有限值记为 0
pub fn round_confidence(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value.clamp(0.0, 1.0) * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Closed,
    NeedsAttention,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Active => "active",
            ThreadStatus::Closed => "closed",
            ThreadStatus::NeedsAttention => "needs_attention",
        }
    }
}

impl FromStr for ThreadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ThreadStatus::Active),
            "closed" => Ok(ThreadStatus::Closed),
            "needs_attention" => Ok(ThreadStatus::NeedsAttention),
            other => Err(format!("unknown thread status: {other}")),
        }
    }
}

/// 会话线程：客户与客服之间的一组往来邮件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: RecordId,
    pub subject: String,
    pub status: ThreadStatus,
    pub participants: Vec<String>,
    pub last_activity_at: DateTime<Utc>,
}

/// 新建线程参数
#[derive(Debug, Clone)]
pub struct NewThread {
    pub subject: String,
    pub participants: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            other => Err(format!("unknown email direction: {other}")),
        }
    }
}

/// 线程中的单封邮件；创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub id: RecordId,
    pub thread_id: RecordId,
    pub sender: String,
    pub recipients: Vec<String>,
    pub body: String,
    pub direction: Direction,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEmail {
    pub thread_id: RecordId,
    pub sender: String,
    pub recipients: Vec<String>,
    pub body: String,
    pub direction: Direction,
    pub sent_at: DateTime<Utc>,
}

/// 邮件分类标签（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TagName {
    Spam,
    Legal,
    Sales,
    Support,
    Billing,
    Technical,
    General,
}

impl TagName {
    pub const ALL: [TagName; 7] = [
        TagName::Spam,
        TagName::Legal,
        TagName::Sales,
        TagName::Support,
        TagName::Billing,
        TagName::Technical,
        TagName::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TagName::Spam => "spam",
            TagName::Legal => "legal",
            TagName::Sales => "sales",
            TagName::Support => "support",
            TagName::Billing => "billing",
            TagName::Technical => "technical",
            TagName::General => "general",
        }
    }
}

impl fmt::Display for TagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        TagName::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| format!("unknown tag: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: RecordId,
    pub email_id: RecordId,
    pub tag: TagName,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct NewTag {
    pub email_id: RecordId,
    pub tag: TagName,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Pending,
    Approved,
    Rejected,
    Sent,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Pending => "pending",
            DraftStatus::Approved => "approved",
            DraftStatus::Rejected => "rejected",
            DraftStatus::Sent => "sent",
        }
    }
}

impl FromStr for DraftStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DraftStatus::Pending),
            "approved" => Ok(DraftStatus::Approved),
            "rejected" => Ok(DraftStatus::Rejected),
            "sent" => Ok(DraftStatus::Sent),
            other => Err(format!("unknown draft status: {other}")),
        }
    }
}

/// 草稿引用的知识库片段（每份草稿至多一条）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub filename: String,
    pub score: f64,
    pub text: String,
}

impl Citation {
    /// 仅当 filename / score / text 三者都存在时才构造引用，缺任一项视为无引用
    pub fn from_parts(
        filename: Option<String>,
        score: Option<f64>,
        text: Option<String>,
    ) -> Option<Self> {
        match (filename, score, text) {
            (Some(filename), Some(score), Some(text)) => Some(Self {
                filename,
                score,
                text,
            }),
            _ => None,
        }
    }
}

/// Agent 生成、等待人工审核的回复草稿
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftResponse {
    pub id: RecordId,
    pub email_id: RecordId,
    pub thread_id: RecordId,
    pub body: String,
    pub status: DraftStatus,
    pub version: u32,
    pub parent_draft_id: Option<RecordId>,
    pub confidence: f64,
    pub citation: Option<Citation>,
    pub created_at: DateTime<Utc>,
}

/// 保存草稿参数；version / parent 由存储层按已有草稿推算
#[derive(Debug, Clone)]
pub struct NewDraft {
    pub email_id: RecordId,
    pub thread_id: RecordId,
    pub body: String,
    pub confidence: f64,
    pub citation: Option<Citation>,
}

/// 工具调用在审计日志中的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    Error,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Success => "success",
            ActionStatus::Error => "error",
        }
    }
}

/// 审计日志条目：只追加，除批量清理测试数据外不更新不删除
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    pub id: RecordId,
    pub thread_id: RecordId,
    pub action: String,
    pub description: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AgentAction {
    /// 工具条目的 status（metadata.status）；非工具条目返回 None
    pub fn status(&self) -> Option<ActionStatus> {
        match self.metadata.get("status").and_then(|v| v.as_str()) {
            Some("success") => Some(ActionStatus::Success),
            Some("error") => Some(ActionStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAgentAction {
    pub thread_id: RecordId,
    pub action: String,
    pub description: String,
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_confidence_clamps_and_rounds() {
        assert_eq!(round_confidence(0.87654), 0.877);
        assert_eq!(round_confidence(1.7), 1.0);
        assert_eq!(round_confidence(-0.2), 0.0);
        assert_eq!(round_confidence(f64::NAN), 0.0);
    }

    #[test]
    fn test_tag_name_parse() {
        assert_eq!("Billing".parse::<TagName>().unwrap(), TagName::Billing);
        assert!("refunds".parse::<TagName>().is_err());
    }

    #[test]
    fn test_citation_requires_all_parts() {
        assert!(Citation::from_parts(Some("a.md".into()), Some(0.5), Some("x".into())).is_some());
        assert!(Citation::from_parts(Some("a.md".into()), None, Some("x".into())).is_none());
        assert!(Citation::from_parts(None, Some(0.5), Some("x".into())).is_none());
    }

    #[test]
    fn test_action_status_from_metadata() {
        let action = AgentAction {
            id: 1,
            thread_id: 1,
            action: "tag_email".into(),
            description: "Tagged".into(),
            metadata: serde_json::json!({"status": "error"}),
            created_at: Utc::now(),
        };
        assert_eq!(action.status(), Some(ActionStatus::Error));
    }
}
