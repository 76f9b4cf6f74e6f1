//! 离线 LLM 客户端（无需 API）
//!
//! - MockLlmClient：确定性的分诊策略。先用最新来信检索知识库，再以最高分命中作为引用写草稿，
//!   便于本地跑通整条工具调用链路。
//! - ScriptedLlmClient：按顺序回放预设的输出 / 错误，供测试精确控制每一轮。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};
use crate::react::ThreadContext;

/// 确定性分诊策略：search_knowledge_base → write_draft
#[derive(Debug, Default)]
pub struct MockLlmClient;

impl MockLlmClient {
    pub fn new() -> Self {
        Self
    }
}

/// 最近一次某工具的观察结果（解析为 JSON）
fn last_observation(messages: &[Message], tool: &str) -> Option<Value> {
    messages.iter().rev().find_map(|m| {
        let (name, body) = m.as_observation()?;
        (name == tool).then(|| serde_json::from_str(body).unwrap_or(Value::Null))
    })
}

fn draft_body(sender: Option<&str>, excerpt: Option<&str>) -> String {
    let greeting = sender
        .and_then(|s| s.split('@').next())
        .filter(|s| !s.is_empty())
        .map(|name| format!("Hello {name},"))
        .unwrap_or_else(|| "Hello,".to_string());
    let answer = match excerpt {
        Some(text) => format!("Thank you for reaching out. {text}"),
        None => "Thank you for reaching out. A member of our team will follow up with the details shortly."
            .to_string(),
    };
    format!("{greeting}\n\n{answer}\n\nBest regards,\nCustomer Support")
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let ctx = messages
            .iter()
            .filter(|m| m.role == Role::User)
            .find_map(|m| ThreadContext::parse(&m.content))
            .ok_or_else(|| LlmError::Api("mock: no thread context in conversation".into()))?;

        if let Some(result) = last_observation(messages, "write_draft") {
            if result.get("success").and_then(Value::as_bool) == Some(true) {
                return Ok("Draft submitted for human review.".to_string());
            }
        }

        let Some(email_id) = ctx.latest_email_id else {
            return Ok("The thread has no email to answer.".to_string());
        };

        let Some(search) = last_observation(messages, "search_knowledge_base") else {
            let query = ctx
                .latest_body
                .as_deref()
                .filter(|b| !b.trim().is_empty())
                .unwrap_or(ctx.subject.as_str());
            return Ok(json!({
                "tool": "search_knowledge_base",
                "args": { "query": query }
            })
            .to_string());
        };

        let top_hit = search
            .get("data")
            .and_then(Value::as_array)
            .and_then(|hits| hits.first())
            .cloned();

        let mut args = json!({
            "emailId": email_id,
            "threadId": ctx.thread_id,
        });
        match top_hit {
            Some(hit) => {
                let excerpt = hit.get("text").and_then(Value::as_str);
                args["messageBody"] = json!(draft_body(ctx.latest_sender.as_deref(), excerpt));
                args["citation"] = json!({
                    "filename": hit.get("filename"),
                    "score": hit.get("score"),
                    "text": hit.get("text"),
                });
                args["confidence"] = json!(0.85);
            }
            None => {
                args["messageBody"] = json!(draft_body(ctx.latest_sender.as_deref(), None));
                args["confidence"] = json!(0.5);
            }
        }
        Ok(json!({ "tool": "write_draft", "args": args }).to_string())
    }
}

/// 回放客户端：按顺序返回预设结果；用尽后返回 fallback（未设置则报错）
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: Option<String>,
    delay: Option<Duration>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(outputs.into_iter().map(|s| Ok(s.into())))
    }

    pub fn from_results(results: impl IntoIterator<Item = Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            fallback: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 脚本用尽后每轮都返回该输出
    pub fn with_fallback(mut self, output: impl Into<String>) -> Self {
        self.fallback = Some(output.into());
        self
    }

    /// 每次调用前等待，模拟慢模型
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 已收到的调用次数
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// 第 n 次调用收到的消息
    pub fn request(&self, n: usize) -> Option<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(n)
            .cloned()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        match next {
            Some(result) => result,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| LlmError::Api("scripted responses exhausted".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Message {
        Message::user(
            ThreadContext {
                thread_id: 4,
                subject: "Returns".into(),
                email_count: 1,
                latest_email_id: Some(9),
                latest_sender: Some("alice@example.com".into()),
                latest_body: Some("what is your return policy?".into()),
            }
            .render(),
        )
    }

    #[tokio::test]
    async fn test_mock_searches_then_drafts_with_top_hit() {
        let llm = MockLlmClient::new();
        let mut messages = vec![Message::system("sys"), context()];

        let first: Value = serde_json::from_str(&llm.complete(&messages).await.unwrap()).unwrap();
        assert_eq!(first["tool"], "search_knowledge_base");
        assert_eq!(first["args"]["query"], "what is your return policy?");

        messages.push(Message::observation(
            "search_knowledge_base",
            r#"{"success":true,"data":[{"filename":"returns.md","score":0.9,"text":"Returns accepted within 30 days."},{"filename":"b.md","score":0.2,"text":"x"}]}"#,
        ));
        let second: Value = serde_json::from_str(&llm.complete(&messages).await.unwrap()).unwrap();
        assert_eq!(second["tool"], "write_draft");
        assert_eq!(second["args"]["emailId"], 9);
        assert_eq!(second["args"]["threadId"], 4);
        assert_eq!(second["args"]["citation"]["filename"], "returns.md");
        assert!(second["args"]["messageBody"]
            .as_str()
            .unwrap()
            .contains("Returns accepted within 30 days."));
    }

    #[tokio::test]
    async fn test_scripted_replays_then_falls_back() {
        let llm = ScriptedLlmClient::from_results(vec![
            Err(LlmError::Timeout),
            Ok("first".to_string()),
        ])
        .with_fallback("again");
        assert_eq!(llm.complete(&[]).await, Err(LlmError::Timeout));
        assert_eq!(llm.complete(&[]).await.unwrap(), "first");
        assert_eq!(llm.complete(&[]).await.unwrap(), "again");
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_scripted_without_fallback_errors_when_exhausted() {
        let llm = ScriptedLlmClient::new(Vec::<String>::new());
        assert!(matches!(llm.complete(&[]).await, Err(LlmError::Api(_))));
    }
}
