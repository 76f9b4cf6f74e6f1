//! 内存存储：测试与演示用，语义与 SqliteStore 一致

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::store::search::{rank_emails, sender_matches};
use crate::store::{
    round_confidence, AgentAction, DraftResponse, DraftStatus, Email, NewAgentAction, NewDraft,
    NewEmail, NewTag, NewThread, RecordId, StoreError, SupportStore, Tag, Thread, ThreadStatus,
};

#[derive(Default)]
struct Tables {
    next_id: RecordId,
    threads: Vec<Thread>,
    emails: Vec<Email>,
    tags: Vec<Tag>,
    drafts: Vec<DraftResponse>,
    actions: Vec<AgentAction>,
}

impl Tables {
    fn next_id(&mut self) -> RecordId {
        self.next_id += 1;
        self.next_id
    }
}

/// 进程内存储（所有表共用一个自增 id 序列）
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SupportStore for InMemoryStore {
    async fn search_emails(
        &self,
        sender: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Email>, StoreError> {
        let tables = self.tables.read().await;
        let candidates: Vec<Email> = tables
            .emails
            .iter()
            .filter(|e| sender_matches(e, sender))
            .cloned()
            .collect();
        Ok(rank_emails(candidates, query, limit))
    }

    async fn get_email_by_id(&self, id: RecordId) -> Result<Option<Email>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.emails.iter().find(|e| e.id == id).cloned())
    }

    async fn insert_email_tags(&self, rows: Vec<NewTag>) -> Result<Vec<Tag>, StoreError> {
        let mut tables = self.tables.write().await;
        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            let tag = Tag {
                id: tables.next_id(),
                email_id: row.email_id,
                tag: row.tag,
                confidence: round_confidence(row.confidence),
            };
            tables.tags.push(tag.clone());
            inserted.push(tag);
        }
        Ok(inserted)
    }

    async fn save_draft_response(&self, params: NewDraft) -> Result<DraftResponse, StoreError> {
        let mut tables = self.tables.write().await;
        let previous = tables
            .drafts
            .iter()
            .filter(|d| d.email_id == params.email_id)
            .max_by_key(|d| d.version)
            .map(|d| (d.id, d.version));
        let draft = DraftResponse {
            id: tables.next_id(),
            email_id: params.email_id,
            thread_id: params.thread_id,
            body: params.body,
            status: DraftStatus::Pending,
            version: previous.map(|(_, v)| v + 1).unwrap_or(1),
            parent_draft_id: previous.map(|(id, _)| id),
            confidence: round_confidence(params.confidence),
            citation: params.citation,
            created_at: Utc::now(),
        };
        tables.drafts.push(draft.clone());
        Ok(draft)
    }

    async fn log_agent_action(&self, params: NewAgentAction) -> Result<AgentAction, StoreError> {
        let mut tables = self.tables.write().await;
        let action = AgentAction {
            id: tables.next_id(),
            thread_id: params.thread_id,
            action: params.action,
            description: params.description,
            metadata: params.metadata,
            created_at: Utc::now(),
        };
        tables.actions.push(action.clone());
        Ok(action)
    }

    async fn get_sorted_emails_by_thread(
        &self,
        thread_id: RecordId,
    ) -> Result<Vec<Email>, StoreError> {
        let tables = self.tables.read().await;
        let mut emails: Vec<Email> = tables
            .emails
            .iter()
            .filter(|e| e.thread_id == thread_id)
            .cloned()
            .collect();
        emails.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then_with(|| a.id.cmp(&b.id)));
        Ok(emails)
    }

    async fn insert_thread(&self, params: NewThread) -> Result<Thread, StoreError> {
        let mut tables = self.tables.write().await;
        let thread = Thread {
            id: tables.next_id(),
            subject: params.subject,
            status: ThreadStatus::Active,
            participants: params.participants,
            last_activity_at: Utc::now(),
        };
        tables.threads.push(thread.clone());
        Ok(thread)
    }

    async fn get_thread(&self, id: RecordId) -> Result<Option<Thread>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.threads.iter().find(|t| t.id == id).cloned())
    }

    async fn insert_email(&self, params: NewEmail) -> Result<Email, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.threads.iter().any(|t| t.id == params.thread_id) {
            return Err(StoreError::NotFound(format!("thread {}", params.thread_id)));
        }
        let email = Email {
            id: tables.next_id(),
            thread_id: params.thread_id,
            sender: params.sender,
            recipients: params.recipients,
            body: params.body,
            direction: params.direction,
            sent_at: params.sent_at,
        };
        if let Some(thread) = tables.threads.iter_mut().find(|t| t.id == email.thread_id) {
            thread.last_activity_at = thread.last_activity_at.max(email.sent_at);
        }
        tables.emails.push(email.clone());
        Ok(email)
    }

    async fn list_tags_for_email(&self, email_id: RecordId) -> Result<Vec<Tag>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.tags.iter().filter(|t| t.email_id == email_id).cloned().collect())
    }

    async fn list_drafts_for_thread(
        &self,
        thread_id: RecordId,
    ) -> Result<Vec<DraftResponse>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .drafts
            .iter()
            .filter(|d| d.thread_id == thread_id)
            .cloned()
            .collect())
    }

    async fn list_actions_for_thread(
        &self,
        thread_id: RecordId,
    ) -> Result<Vec<AgentAction>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .actions
            .iter()
            .filter(|a| a.thread_id == thread_id)
            .cloned()
            .collect())
    }

    async fn clear_actions_for_thread(&self, thread_id: RecordId) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.actions.len();
        tables.actions.retain(|a| a.thread_id != thread_id);
        Ok(before - tables.actions.len())
    }
}
