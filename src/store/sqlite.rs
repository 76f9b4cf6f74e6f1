//! SQLite 存储（rusqlite，bundled）
//!
//! 单连接 + Mutex；每次调用放到 spawn_blocking 中执行，避免阻塞 tokio worker。
//! 置信度列写入前统一保留 3 位小数。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::store::search::rank_emails;
use crate::store::{
    round_confidence, AgentAction, Citation, Direction, DraftResponse, DraftStatus, Email,
    NewAgentAction, NewDraft, NewEmail, NewTag, NewThread, RecordId, StoreError, SupportStore,
    Tag, TagName, Thread, ThreadStatus,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS threads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subject TEXT NOT NULL,
    status TEXT NOT NULL,
    participants TEXT NOT NULL,
    last_activity_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS emails (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id INTEGER NOT NULL,
    sender TEXT NOT NULL,
    recipients TEXT NOT NULL,
    body TEXT NOT NULL,
    direction TEXT NOT NULL,
    sent_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_emails_thread ON emails(thread_id);
CREATE INDEX IF NOT EXISTS idx_emails_sender ON emails(sender COLLATE NOCASE);
CREATE TABLE IF NOT EXISTS email_tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email_id INTEGER NOT NULL,
    tag TEXT NOT NULL,
    confidence REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_email_tags_email ON email_tags(email_id);
CREATE TABLE IF NOT EXISTS draft_responses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email_id INTEGER NOT NULL,
    thread_id INTEGER NOT NULL,
    body TEXT NOT NULL,
    status TEXT NOT NULL,
    version INTEGER NOT NULL,
    parent_draft_id INTEGER,
    confidence REAL NOT NULL,
    citation_filename TEXT,
    citation_score REAL,
    citation_text TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_drafts_thread ON draft_responses(thread_id);
CREATE TABLE IF NOT EXISTS agent_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id INTEGER NOT NULL,
    action TEXT NOT NULL,
    description TEXT NOT NULL,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_actions_thread ON agent_actions(thread_id);
";

const EMAIL_COLUMNS: &str = "id, thread_id, sender, recipients, body, direction, sent_at";
const DRAFT_COLUMNS: &str = "id, email_id, thread_id, body, status, version, parent_draft_id, \
     confidence, citation_filename, citation_score, citation_text, created_at";

/// SQLite 存储
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// 打开（或创建）数据库文件并建表
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Task(format!("create {}: {e}", parent.display())))?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Task("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

type EmailRow = (i64, i64, String, String, String, String, DateTime<Utc>);

fn read_email_row(row: &Row<'_>) -> rusqlite::Result<EmailRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn email_from_row(raw: EmailRow) -> Result<Email, StoreError> {
    let (id, thread_id, sender, recipients, body, direction, sent_at) = raw;
    Ok(Email {
        id,
        thread_id,
        sender,
        recipients: serde_json::from_str(&recipients)?,
        body,
        direction: direction.parse::<Direction>().map_err(StoreError::Corrupt)?,
        sent_at,
    })
}

struct DraftRow {
    id: i64,
    email_id: i64,
    thread_id: i64,
    body: String,
    status: String,
    version: i64,
    parent_draft_id: Option<i64>,
    confidence: f64,
    citation_filename: Option<String>,
    citation_score: Option<f64>,
    citation_text: Option<String>,
    created_at: DateTime<Utc>,
}

fn read_draft_row(row: &Row<'_>) -> rusqlite::Result<DraftRow> {
    Ok(DraftRow {
        id: row.get(0)?,
        email_id: row.get(1)?,
        thread_id: row.get(2)?,
        body: row.get(3)?,
        status: row.get(4)?,
        version: row.get(5)?,
        parent_draft_id: row.get(6)?,
        confidence: row.get(7)?,
        citation_filename: row.get(8)?,
        citation_score: row.get(9)?,
        citation_text: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn draft_from_row(raw: DraftRow) -> Result<DraftResponse, StoreError> {
    Ok(DraftResponse {
        id: raw.id,
        email_id: raw.email_id,
        thread_id: raw.thread_id,
        body: raw.body,
        status: raw.status.parse::<DraftStatus>().map_err(StoreError::Corrupt)?,
        version: u32::try_from(raw.version)
            .map_err(|_| StoreError::Corrupt(format!("draft version {}", raw.version)))?,
        parent_draft_id: raw.parent_draft_id,
        confidence: raw.confidence,
        citation: Citation::from_parts(raw.citation_filename, raw.citation_score, raw.citation_text),
        created_at: raw.created_at,
    })
}

type ActionRow = (i64, i64, String, String, String, DateTime<Utc>);

fn action_from_row(raw: ActionRow) -> Result<AgentAction, StoreError> {
    let (id, thread_id, action, description, metadata, created_at) = raw;
    Ok(AgentAction {
        id,
        thread_id,
        action,
        description,
        metadata: serde_json::from_str(&metadata)?,
        created_at,
    })
}

fn tag_from_row(raw: (i64, i64, String, f64)) -> Result<Tag, StoreError> {
    let (id, email_id, tag, confidence) = raw;
    Ok(Tag {
        id,
        email_id,
        tag: tag.parse::<TagName>().map_err(StoreError::Corrupt)?,
        confidence,
    })
}

#[async_trait]
impl SupportStore for SqliteStore {
    async fn search_emails(
        &self,
        sender: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Email>, StoreError> {
        let sender = sender.trim().to_string();
        let query = query.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EMAIL_COLUMNS} FROM emails WHERE lower(trim(sender)) = lower(?1)"
            ))?;
            let rows = stmt
                .query_map(params![sender], read_email_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let candidates = rows
                .into_iter()
                .map(email_from_row)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rank_emails(candidates, &query, limit))
        })
        .await
    }

    async fn get_email_by_id(&self, id: RecordId) -> Result<Option<Email>, StoreError> {
        self.call(move |conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?1"),
                    params![id],
                    read_email_row,
                )
                .optional()?;
            raw.map(email_from_row).transpose()
        })
        .await
    }

    async fn insert_email_tags(&self, rows: Vec<NewTag>) -> Result<Vec<Tag>, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let mut inserted = Vec::with_capacity(rows.len());
            for row in rows {
                let confidence = round_confidence(row.confidence);
                tx.execute(
                    "INSERT INTO email_tags (email_id, tag, confidence) VALUES (?1, ?2, ?3)",
                    params![row.email_id, row.tag.as_str(), confidence],
                )?;
                inserted.push(Tag {
                    id: tx.last_insert_rowid(),
                    email_id: row.email_id,
                    tag: row.tag,
                    confidence,
                });
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    async fn save_draft_response(&self, params: NewDraft) -> Result<DraftResponse, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let previous: Option<(i64, i64)> = tx
                .query_row(
                    "SELECT id, version FROM draft_responses WHERE email_id = ?1 \
                     ORDER BY version DESC LIMIT 1",
                    params![params.email_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let version = previous.map(|(_, v)| v + 1).unwrap_or(1);
            let parent = previous.map(|(id, _)| id);
            let confidence = round_confidence(params.confidence);
            let citation = params.citation;
            let created_at = Utc::now();
            tx.execute(
                "INSERT INTO draft_responses (email_id, thread_id, body, status, version, \
                 parent_draft_id, confidence, citation_filename, citation_score, citation_text, \
                 created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    params.email_id,
                    params.thread_id,
                    params.body,
                    DraftStatus::Pending.as_str(),
                    version,
                    parent,
                    confidence,
                    citation.as_ref().map(|c| c.filename.clone()),
                    citation.as_ref().map(|c| c.score),
                    citation.as_ref().map(|c| c.text.clone()),
                    created_at,
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(DraftResponse {
                id,
                email_id: params.email_id,
                thread_id: params.thread_id,
                body: params.body,
                status: DraftStatus::Pending,
                version: u32::try_from(version)
                    .map_err(|_| StoreError::Corrupt(format!("draft version {version}")))?,
                parent_draft_id: parent,
                confidence,
                citation,
                created_at,
            })
        })
        .await
    }

    async fn log_agent_action(&self, params: NewAgentAction) -> Result<AgentAction, StoreError> {
        self.call(move |conn| {
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO agent_actions (thread_id, action, description, metadata, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    params.thread_id,
                    params.action,
                    params.description,
                    params.metadata.to_string(),
                    created_at,
                ],
            )?;
            Ok(AgentAction {
                id: conn.last_insert_rowid(),
                thread_id: params.thread_id,
                action: params.action,
                description: params.description,
                metadata: params.metadata,
                created_at,
            })
        })
        .await
    }

    async fn get_sorted_emails_by_thread(
        &self,
        thread_id: RecordId,
    ) -> Result<Vec<Email>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EMAIL_COLUMNS} FROM emails WHERE thread_id = ?1 ORDER BY sent_at ASC, id ASC"
            ))?;
            let rows = stmt
                .query_map(params![thread_id], read_email_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(email_from_row).collect()
        })
        .await
    }

    async fn insert_thread(&self, params: NewThread) -> Result<Thread, StoreError> {
        self.call(move |conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO threads (subject, status, participants, last_activity_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    params.subject,
                    ThreadStatus::Active.as_str(),
                    serde_json::to_string(&params.participants)?,
                    now,
                ],
            )?;
            Ok(Thread {
                id: conn.last_insert_rowid(),
                subject: params.subject,
                status: ThreadStatus::Active,
                participants: params.participants,
                last_activity_at: now,
            })
        })
        .await
    }

    async fn get_thread(&self, id: RecordId) -> Result<Option<Thread>, StoreError> {
        self.call(move |conn| {
            let raw: Option<(i64, String, String, String, DateTime<Utc>)> = conn
                .query_row(
                    "SELECT id, subject, status, participants, last_activity_at \
                     FROM threads WHERE id = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                )
                .optional()?;
            raw.map(|(id, subject, status, participants, last_activity_at)| {
                Ok(Thread {
                    id,
                    subject,
                    status: status.parse::<ThreadStatus>().map_err(StoreError::Corrupt)?,
                    participants: serde_json::from_str(&participants)?,
                    last_activity_at,
                })
            })
            .transpose()
        })
        .await
    }

    async fn insert_email(&self, params: NewEmail) -> Result<Email, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE threads SET last_activity_at = max(last_activity_at, ?2) WHERE id = ?1",
                params![params.thread_id, params.sent_at],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("thread {}", params.thread_id)));
            }
            tx.execute(
                "INSERT INTO emails (thread_id, sender, recipients, body, direction, sent_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    params.thread_id,
                    params.sender,
                    serde_json::to_string(&params.recipients)?,
                    params.body,
                    params.direction.as_str(),
                    params.sent_at,
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(Email {
                id,
                thread_id: params.thread_id,
                sender: params.sender,
                recipients: params.recipients,
                body: params.body,
                direction: params.direction,
                sent_at: params.sent_at,
            })
        })
        .await
    }

    async fn list_tags_for_email(&self, email_id: RecordId) -> Result<Vec<Tag>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, email_id, tag, confidence FROM email_tags WHERE email_id = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![email_id], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<rusqlite::Result<Vec<(i64, i64, String, f64)>>>()?;
            rows.into_iter().map(tag_from_row).collect()
        })
        .await
    }

    async fn list_drafts_for_thread(
        &self,
        thread_id: RecordId,
    ) -> Result<Vec<DraftResponse>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DRAFT_COLUMNS} FROM draft_responses WHERE thread_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map(params![thread_id], read_draft_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(draft_from_row).collect()
        })
        .await
    }

    async fn list_actions_for_thread(
        &self,
        thread_id: RecordId,
    ) -> Result<Vec<AgentAction>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, thread_id, action, description, metadata, created_at \
                 FROM agent_actions WHERE thread_id = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![thread_id], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<ActionRow>>>()?;
            rows.into_iter().map(action_from_row).collect()
        })
        .await
    }

    async fn clear_actions_for_thread(&self, thread_id: RecordId) -> Result<usize, StoreError> {
        self.call(move |conn| {
            Ok(conn.execute(
                "DELETE FROM agent_actions WHERE thread_id = ?1",
                params![thread_id],
            )?)
        })
        .await
    }
}
