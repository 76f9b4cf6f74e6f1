//! 线程上下文消息：推理循环的第一条 user 消息
//!
//! 纯文本 `key: value` 行，末尾 `body:` 之后为最新来信正文；MockLlmClient 也按此格式解析。

use crate::store::{Direction, Email, RecordId, Thread};

const HEADER: &str = "Thread context";

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadContext {
    pub thread_id: RecordId,
    pub subject: String,
    pub email_count: usize,
    pub latest_email_id: Option<RecordId>,
    pub latest_sender: Option<String>,
    pub latest_body: Option<String>,
}

impl ThreadContext {
    /// 以最新来信（无来信时取最新一封）为回复对象；emails 按时间升序
    pub fn from_thread(thread_id: RecordId, thread: Option<&Thread>, emails: &[Email]) -> Self {
        let latest = emails
            .iter()
            .rev()
            .find(|e| e.direction == Direction::Inbound)
            .or_else(|| emails.last());
        Self {
            thread_id,
            subject: thread.map(|t| t.subject.clone()).unwrap_or_default(),
            email_count: emails.len(),
            latest_email_id: latest.map(|e| e.id),
            latest_sender: latest.map(|e| e.sender.clone()),
            latest_body: latest.map(|e| e.body.clone()),
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "{HEADER}\nthread_id: {}\nsubject: {}\nemail_count: {}\n",
            self.thread_id,
            self.subject.replace('\n', " "),
            self.email_count
        );
        if let Some(id) = self.latest_email_id {
            out.push_str(&format!("latest_email_id: {id}\n"));
        }
        if let Some(sender) = &self.latest_sender {
            out.push_str(&format!("from: {sender}\n"));
        }
        if let Some(body) = &self.latest_body {
            out.push_str("body:\n");
            out.push_str(body);
        }
        out
    }

    /// 解析 render 的输出；不是线程上下文消息时返回 None
    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines();
        if lines.next()?.trim() != HEADER {
            return None;
        }
        let mut thread_id = None;
        let mut subject = String::new();
        let mut email_count = 0;
        let mut latest_email_id = None;
        let mut latest_sender = None;
        let mut latest_body = None;
        while let Some(line) = lines.next() {
            if line.trim() == "body:" {
                latest_body = Some(lines.by_ref().collect::<Vec<_>>().join("\n"));
                break;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "thread_id" => thread_id = value.parse().ok(),
                "subject" => subject = value.to_string(),
                "email_count" => email_count = value.parse().unwrap_or(0),
                "latest_email_id" => latest_email_id = value.parse().ok(),
                "from" => latest_sender = Some(value.to_string()),
                _ => {}
            }
        }
        Some(Self {
            thread_id: thread_id?,
            subject,
            email_count,
            latest_email_id,
            latest_sender,
            latest_body,
        })
    }
}
