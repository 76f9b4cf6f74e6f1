//! 持久化层：数据模型、存储接口（内存 / SQLite）、Agent 动作审计日志

pub mod action_log;
pub mod memory;
pub mod models;
pub mod search;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

pub use action_log::ActionLog;
pub use memory::InMemoryStore;
pub use models::{
    round_confidence, ActionStatus, AgentAction, Citation, Direction, DraftResponse, DraftStatus,
    Email, NewAgentAction, NewDraft, NewEmail, NewTag, NewThread, RecordId, Tag, TagName, Thread,
    ThreadStatus,
};
pub use sqlite::SqliteStore;

/// 存储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Storage task failed: {0}")]
    Task(String),
}

/// 后端存储接口：Agent 工具与审计日志通过它读写线程、邮件、标签、草稿与动作
///
/// 每次调用是独立的原子单元，不跨工具调用开启事务。
#[async_trait]
pub trait SupportStore: Send + Sync {
    /// 按发件人检索邮件；query 为空表示该发件人全部邮件
    async fn search_emails(
        &self,
        sender: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Email>, StoreError>;

    async fn get_email_by_id(&self, id: RecordId) -> Result<Option<Email>, StoreError>;

    /// 批量写入标签，返回写入后的行
    async fn insert_email_tags(&self, rows: Vec<NewTag>) -> Result<Vec<Tag>, StoreError>;

    /// 保存草稿：状态恒为 pending，version / parent 按同一邮件已有草稿递增
    async fn save_draft_response(&self, params: NewDraft) -> Result<DraftResponse, StoreError>;

    /// 追加一条审计日志
    async fn log_agent_action(&self, params: NewAgentAction) -> Result<AgentAction, StoreError>;

    /// 线程内全部邮件，按发送时间升序
    async fn get_sorted_emails_by_thread(
        &self,
        thread_id: RecordId,
    ) -> Result<Vec<Email>, StoreError>;

    async fn insert_thread(&self, params: NewThread) -> Result<Thread, StoreError>;

    async fn get_thread(&self, id: RecordId) -> Result<Option<Thread>, StoreError>;

    /// 新邮件到达：写入邮件并刷新线程最后活跃时间
    async fn insert_email(&self, params: NewEmail) -> Result<Email, StoreError>;

    async fn list_tags_for_email(&self, email_id: RecordId) -> Result<Vec<Tag>, StoreError>;

    async fn list_drafts_for_thread(
        &self,
        thread_id: RecordId,
    ) -> Result<Vec<DraftResponse>, StoreError>;

    /// 线程的审计日志，按写入顺序
    async fn list_actions_for_thread(
        &self,
        thread_id: RecordId,
    ) -> Result<Vec<AgentAction>, StoreError>;

    /// 批量清理测试数据用；返回删除条数
    async fn clear_actions_for_thread(&self, thread_id: RecordId) -> Result<usize, StoreError>;
}
