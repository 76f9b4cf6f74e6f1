//! write_draft：保存一份待审核的回复草稿（成功运行的终止动作）
//!
//! 引用只在 filename / score / text 三者齐全时重建；齐全但不来自本次运行的检索结果时丢弃，
//! 并在输出中附 citation_dropped 说明。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::store::{round_confidence, Citation, NewDraft, SupportStore};
use crate::tools::args::{display_field, parse_args, IdArg};
use crate::tools::schema::args_schema;
use crate::tools::{RunContext, Tool, ToolName, ToolOutput};

const DEFAULT_CONFIDENCE: f64 = 0.85;

/// 引用字段，允许部分缺失
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct CitationArgs {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WriteDraftArgs {
    pub email_id: IdArg,
    pub thread_id: IdArg,
    #[serde(default)]
    pub message_body: String,
    /// 从 search_knowledge_base 结果中选出的最佳片段
    #[serde(default)]
    pub citation: Option<CitationArgs>,
    /// 0..1，默认 0.85
    #[serde(default)]
    pub confidence: Option<f64>,
}

pub struct WriteDraftTool {
    store: Arc<dyn SupportStore>,
}

impl WriteDraftTool {
    pub fn new(store: Arc<dyn SupportStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for WriteDraftTool {
    fn name(&self) -> ToolName {
        ToolName::WriteDraft
    }

    fn description(&self) -> &str {
        "Save a reply draft for human review. Cite the single best knowledge-base snippet \
         (filename, score, text) returned by search_knowledge_base. This ends the run."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<WriteDraftArgs>()
    }

    fn describe_call(&self, args: &Value) -> String {
        format!(
            "Wrote draft reply to email {} in thread {}",
            display_field(args, "emailId"),
            display_field(args, "threadId")
        )
    }

    async fn execute(&self, ctx: &mut RunContext, args: Value) -> ToolOutput {
        let args: WriteDraftArgs = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return ToolOutput::fail(e),
        };
        let (email_id, thread_id) = match (
            args.email_id.resolve("emailId"),
            args.thread_id.resolve("threadId"),
        ) {
            (Ok(e), Ok(t)) => (e, t),
            (Err(e), _) | (_, Err(e)) => return ToolOutput::fail(e),
        };
        let body = args.message_body.trim();
        if body.is_empty() {
            return ToolOutput::fail("messageBody must not be empty");
        }
        if let Some(bound) = ctx.thread_id() {
            if bound != thread_id {
                return ToolOutput::fail(format!(
                    "threadId {thread_id} does not match the current thread {bound}"
                ));
            }
        }
        match self.store.get_email_by_id(email_id).await {
            Ok(Some(email)) if email.thread_id == thread_id => {}
            Ok(Some(email)) => {
                return ToolOutput::fail(format!(
                    "Email {email_id} belongs to thread {}, not {thread_id}",
                    email.thread_id
                ))
            }
            Ok(None) => return ToolOutput::fail(format!("Email {email_id} not found")),
            Err(e) => return ToolOutput::fail(format!("Failed to load email {email_id}: {e}")),
        }

        let citation_args = args.citation.unwrap_or_default();
        let mut note = None;
        let citation = Citation::from_parts(
            citation_args.filename,
            citation_args.score,
            citation_args.text,
        )
        .filter(|c| {
            let consulted = ctx.consulted(c);
            if !consulted {
                note = Some(format!(
                    "citation_dropped: {} does not match a knowledge search result from this run",
                    c.filename
                ));
            }
            consulted
        });

        let params = NewDraft {
            email_id,
            thread_id,
            body: body.to_string(),
            confidence: round_confidence(args.confidence.unwrap_or(DEFAULT_CONFIDENCE)),
            citation,
        };
        match self.store.save_draft_response(params).await {
            Ok(draft) => {
                let mut data = json!({
                    "draftId": draft.id,
                    "status": draft.status.as_str(),
                    "version": draft.version,
                    "confidence": draft.confidence,
                    "citation": draft.citation,
                });
                if let Some(note) = note {
                    data["note"] = json!(note);
                }
                ctx.record_draft(draft);
                ToolOutput::ok(data)
            }
            Err(e) => ToolOutput::fail(format!("Failed to save draft: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::KnowledgeHit;
    use crate::store::{Direction, DraftStatus, InMemoryStore, NewEmail, NewThread};
    use chrono::Utc;

    async fn setup() -> (Arc<InMemoryStore>, i64, i64) {
        let store = Arc::new(InMemoryStore::new());
        let thread = store
            .insert_thread(NewThread {
                subject: "Return".into(),
                participants: vec!["dan@example.com".into()],
            })
            .await
            .unwrap();
        let email = store
            .insert_email(NewEmail {
                thread_id: thread.id,
                sender: "dan@example.com".into(),
                recipients: vec![],
                body: "Can I return my shoes?".into(),
                direction: Direction::Inbound,
                sent_at: Utc::now(),
            })
            .await
            .unwrap();
        (store, thread.id, email.id)
    }

    fn consulted_ctx(thread_id: i64) -> RunContext {
        let mut ctx = RunContext::for_thread(thread_id);
        ctx.record_hits(&[KnowledgeHit {
            filename: "returns.md".into(),
            score: 0.92,
            text: "Shoes can be returned within 30 days.".into(),
        }]);
        ctx
    }

    #[tokio::test]
    async fn test_complete_citation_is_stored() {
        let (store, thread_id, email_id) = setup().await;
        let tool = WriteDraftTool::new(store.clone());
        let mut ctx = consulted_ctx(thread_id);
        let out = tool
            .execute(
                &mut ctx,
                json!({
                    "emailId": email_id,
                    "threadId": thread_id,
                    "messageBody": "Yes, within 30 days.",
                    "citation": {"filename": "returns.md", "score": 0.92, "text": "Shoes can be returned within 30 days."}
                }),
            )
            .await;
        assert!(out.success, "{out:?}");
        let draft = ctx.last_draft().unwrap();
        assert_eq!(draft.status, DraftStatus::Pending);
        assert_eq!(draft.confidence, 0.85);
        assert_eq!(
            draft.citation,
            Some(Citation {
                filename: "returns.md".into(),
                score: 0.92,
                text: "Shoes can be returned within 30 days.".into(),
            })
        );
    }

    #[tokio::test]
    async fn test_partial_citation_is_absent() {
        let (store, thread_id, email_id) = setup().await;
        let tool = WriteDraftTool::new(store);
        let mut ctx = consulted_ctx(thread_id);
        let out = tool
            .execute(
                &mut ctx,
                json!({
                    "emailId": email_id,
                    "threadId": thread_id,
                    "messageBody": "Yes.",
                    "citation": {"filename": "returns.md", "text": "Shoes can be returned within 30 days."}
                }),
            )
            .await;
        assert!(out.success);
        assert!(ctx.last_draft().unwrap().citation.is_none());
    }

    #[tokio::test]
    async fn test_unconsulted_citation_is_dropped_with_note() {
        let (store, thread_id, email_id) = setup().await;
        let tool = WriteDraftTool::new(store);
        let mut ctx = RunContext::for_thread(thread_id);
        let out = tool
            .execute(
                &mut ctx,
                json!({
                    "emailId": email_id,
                    "threadId": thread_id,
                    "messageBody": "Yes.",
                    "citation": {"filename": "made_up.md", "score": 0.99, "text": "anything"}
                }),
            )
            .await;
        assert!(out.success);
        let data = out.data.unwrap();
        assert!(data["note"].as_str().unwrap().starts_with("citation_dropped"));
        assert!(data["citation"].is_null());
    }

    #[tokio::test]
    async fn test_citation_with_inflated_score_is_dropped() {
        let (store, thread_id, email_id) = setup().await;
        let tool = WriteDraftTool::new(store);
        let mut ctx = consulted_ctx(thread_id);
        let out = tool
            .execute(
                &mut ctx,
                json!({
                    "emailId": email_id,
                    "threadId": thread_id,
                    "messageBody": "Yes.",
                    "citation": {"filename": "returns.md", "score": 1.0, "text": "Shoes can be returned within 30 days."}
                }),
            )
            .await;
        assert!(out.success);
        assert!(out.data.unwrap()["note"]
            .as_str()
            .unwrap()
            .starts_with("citation_dropped"));
        assert!(ctx.last_draft().unwrap().citation.is_none());
    }

    #[tokio::test]
    async fn test_rejects_mismatched_thread_and_empty_body() {
        let (store, thread_id, email_id) = setup().await;
        let tool = WriteDraftTool::new(store.clone());
        let mut ctx = RunContext::for_thread(thread_id);
        let wrong_thread = tool
            .execute(
                &mut ctx,
                json!({"emailId": email_id, "threadId": thread_id + 100, "messageBody": "hi"}),
            )
            .await;
        assert!(!wrong_thread.success);
        let empty = tool
            .execute(
                &mut ctx,
                json!({"emailId": email_id, "threadId": thread_id, "messageBody": "  "}),
            )
            .await;
        assert!(!empty.success);
        assert!(store.list_drafts_for_thread(thread_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_draft_is_a_revision() {
        let (store, thread_id, email_id) = setup().await;
        let tool = WriteDraftTool::new(store);
        let mut ctx = RunContext::for_thread(thread_id);
        for body in ["first", "second"] {
            let out = tool
                .execute(
                    &mut ctx,
                    json!({"emailId": email_id, "threadId": thread_id.to_string(), "messageBody": body}),
                )
                .await;
            assert!(out.success);
        }
        let drafts = ctx.drafts();
        assert_eq!(drafts[1].version, 2);
        assert_eq!(drafts[1].parent_draft_id, Some(drafts[0].id));
    }
}
