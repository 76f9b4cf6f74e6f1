//! tag_email：为邮件打分类标签
//!
//! 校验顺序：emailId 可解析为整数 → tags 非空且都在封闭集合内 → 邮件存在；任一不满足都不写入。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::store::{round_confidence, NewTag, SupportStore, TagName};
use crate::tools::args::{display_field, parse_args, IdArg};
use crate::tools::schema::args_schema;
use crate::tools::{RunContext, Tool, ToolName, ToolOutput};

const DEFAULT_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TagEmailArgs {
    pub email_id: IdArg,
    /// spam / legal / sales / support / billing / technical / general
    #[serde(default)]
    pub tags: Vec<String>,
    /// 0..1，默认 0.8
    #[serde(default)]
    pub confidence: Option<f64>,
}

pub struct TagEmailTool {
    store: Arc<dyn SupportStore>,
}

impl TagEmailTool {
    pub fn new(store: Arc<dyn SupportStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for TagEmailTool {
    fn name(&self) -> ToolName {
        ToolName::TagEmail
    }

    fn description(&self) -> &str {
        "Attach category tags to an email. Allowed tags: spam, legal, sales, support, billing, \
         technical, general. Confidence defaults to 0.8."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<TagEmailArgs>()
    }

    fn describe_call(&self, args: &Value) -> String {
        let tags = args
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .map(|t| t.as_str().map(str::to_string).unwrap_or_else(|| t.to_string()))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "?".to_string());
        format!("Tagged email {} as {tags}", display_field(args, "emailId"))
    }

    async fn execute(&self, _ctx: &mut RunContext, args: Value) -> ToolOutput {
        let args: TagEmailArgs = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return ToolOutput::fail(e),
        };
        let email_id = match args.email_id.resolve("emailId") {
            Ok(id) => id,
            Err(e) => return ToolOutput::fail(e),
        };
        if args.tags.is_empty() {
            return ToolOutput::fail("tags must contain at least one tag");
        }
        let mut tags: Vec<TagName> = Vec::with_capacity(args.tags.len());
        for raw in &args.tags {
            match raw.parse::<TagName>() {
                Ok(tag) if !tags.contains(&tag) => tags.push(tag),
                Ok(_) => {}
                Err(e) => {
                    let allowed: Vec<&str> = TagName::ALL.iter().map(|t| t.as_str()).collect();
                    return ToolOutput::fail(format!("{e}. Allowed tags: {}", allowed.join(", ")));
                }
            }
        }

        match self.store.get_email_by_id(email_id).await {
            Ok(Some(_)) => {}
            Ok(None) => return ToolOutput::fail(format!("Email {email_id} not found")),
            Err(e) => return ToolOutput::fail(format!("Failed to load email {email_id}: {e}")),
        }

        let confidence = round_confidence(args.confidence.unwrap_or(DEFAULT_CONFIDENCE));
        let rows = tags
            .iter()
            .map(|&tag| NewTag {
                email_id,
                tag,
                confidence,
            })
            .collect();
        match self.store.insert_email_tags(rows).await {
            Ok(inserted) => ToolOutput::ok(json!({
                "emailId": email_id,
                "tags": inserted.iter().map(|t| t.tag.as_str()).collect::<Vec<_>>(),
                "confidence": confidence,
            })),
            Err(e) => ToolOutput::fail(format!("Failed to save tags: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Direction, InMemoryStore, NewEmail, NewThread};
    use chrono::Utc;

    async fn store_with_email() -> (Arc<InMemoryStore>, i64) {
        let store = Arc::new(InMemoryStore::new());
        let thread = store
            .insert_thread(NewThread {
                subject: "Invoice".into(),
                participants: vec!["carol@example.com".into()],
            })
            .await
            .unwrap();
        let email = store
            .insert_email(NewEmail {
                thread_id: thread.id,
                sender: "carol@example.com".into(),
                recipients: vec![],
                body: "I was charged twice".into(),
                direction: Direction::Inbound,
                sent_at: Utc::now(),
            })
            .await
            .unwrap();
        (store, email.id)
    }

    #[tokio::test]
    async fn test_tags_are_inserted_with_clamped_confidence() {
        let (store, email_id) = store_with_email().await;
        let tool = TagEmailTool::new(store.clone());
        let out = tool
            .execute(
                &mut RunContext::new(),
                json!({"emailId": email_id.to_string(), "tags": ["billing", "Support", "billing"], "confidence": 1.4}),
            )
            .await;
        assert!(out.success, "{out:?}");
        assert_eq!(out.data.unwrap()["tags"], json!(["billing", "support"]));
        let tags = store.list_tags_for_email(email_id).await.unwrap();
        assert_eq!(tags.len(), 2);
        assert!(tags.iter().all(|t| t.confidence == 1.0));
    }

    #[tokio::test]
    async fn test_non_numeric_id_inserts_nothing() {
        let (store, email_id) = store_with_email().await;
        let tool = TagEmailTool::new(store.clone());
        let out = tool
            .execute(&mut RunContext::new(), json!({"emailId": "abc", "tags": ["spam"]}))
            .await;
        assert!(!out.success);
        assert!(out.error.unwrap().contains("emailId"));
        assert!(store.list_tags_for_email(email_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tag_and_missing_email_fail() {
        let (store, email_id) = store_with_email().await;
        let tool = TagEmailTool::new(store.clone());
        let unknown = tool
            .execute(&mut RunContext::new(), json!({"emailId": email_id, "tags": ["refunds"]}))
            .await;
        assert!(!unknown.success);
        let missing = tool
            .execute(&mut RunContext::new(), json!({"emailId": 9999, "tags": ["spam"]}))
            .await;
        assert_eq!(missing.error.as_deref(), Some("Email 9999 not found"));
        let empty = tool
            .execute(&mut RunContext::new(), json!({"emailId": email_id, "tags": []}))
            .await;
        assert!(!empty.success);
        assert!(store.list_tags_for_email(email_id).await.unwrap().is_empty());
    }
}
