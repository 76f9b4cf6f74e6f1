//! 往来邮件检索工具：search_emails / get_customer_history / search_customer_emails
//!
//! 三者共用 SupportStore::search_emails，区别只在默认 limit 与对 query 的要求。
//! 存储错误以 ToolOutput::fail 软失败返回。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::store::SupportStore;
use crate::tools::args::{clamp_limit, display_field, parse_args};
use crate::tools::schema::args_schema;
use crate::tools::{RunContext, Tool, ToolName, ToolOutput};

const MAX_LIMIT: usize = 100;
const SEARCH_EMAILS_DEFAULT_LIMIT: usize = 10;
const HISTORY_DEFAULT_LIMIT: usize = 20;
const CUSTOMER_SEARCH_DEFAULT_LIMIT: usize = 10;

async fn run_search(
    store: &dyn SupportStore,
    sender: &str,
    query: &str,
    limit: usize,
) -> ToolOutput {
    let sender = sender.trim();
    if sender.is_empty() {
        return ToolOutput::fail("senderAddress must not be empty");
    }
    match store.search_emails(sender, query.trim(), limit).await {
        Ok(emails) => match serde_json::to_value(&emails) {
            Ok(data) => ToolOutput::ok(data),
            Err(e) => ToolOutput::fail(format!("Failed to encode emails: {e}")),
        },
        Err(e) => ToolOutput::fail(format!("Email search failed: {e}")),
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchEmailsArgs {
    /// 发件人地址
    pub sender_address: String,
    /// 正文关键词；为空表示该发件人全部邮件
    #[serde(default)]
    pub query_text: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// 按发件人 + 关键词检索邮件
pub struct SearchEmailsTool {
    store: Arc<dyn SupportStore>,
}

impl SearchEmailsTool {
    pub fn new(store: Arc<dyn SupportStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SearchEmailsTool {
    fn name(&self) -> ToolName {
        ToolName::SearchEmails
    }

    fn description(&self) -> &str {
        "Search emails from a sender, ranked by how many query words appear in the body. \
         An empty queryText returns all emails from the sender, newest first."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<SearchEmailsArgs>()
    }

    fn describe_call(&self, args: &Value) -> String {
        let sender = display_field(args, "senderAddress");
        match args.get("queryText").and_then(Value::as_str).map(str::trim) {
            Some(q) if !q.is_empty() => format!("Searched emails from {sender} for \"{q}\""),
            _ => format!("Listed emails from {sender}"),
        }
    }

    async fn execute(&self, _ctx: &mut RunContext, args: Value) -> ToolOutput {
        let args: SearchEmailsArgs = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return ToolOutput::fail(e),
        };
        let limit = clamp_limit(args.limit, SEARCH_EMAILS_DEFAULT_LIMIT, MAX_LIMIT);
        run_search(self.store.as_ref(), &args.sender_address, &args.query_text, limit).await
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomerHistoryArgs {
    pub sender_address: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// 某客户的全部历史邮件（宽泛上下文）
pub struct GetCustomerHistoryTool {
    store: Arc<dyn SupportStore>,
}

impl GetCustomerHistoryTool {
    pub fn new(store: Arc<dyn SupportStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetCustomerHistoryTool {
    fn name(&self) -> ToolName {
        ToolName::GetCustomerHistory
    }

    fn description(&self) -> &str {
        "Get the most recent emails from a customer (default 20). Use this first for broad context."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<CustomerHistoryArgs>()
    }

    fn describe_call(&self, args: &Value) -> String {
        format!(
            "Fetched email history for {}",
            display_field(args, "senderAddress")
        )
    }

    async fn execute(&self, _ctx: &mut RunContext, args: Value) -> ToolOutput {
        let args: CustomerHistoryArgs = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return ToolOutput::fail(e),
        };
        let limit = clamp_limit(args.limit, HISTORY_DEFAULT_LIMIT, MAX_LIMIT);
        run_search(self.store.as_ref(), &args.sender_address, "", limit).await
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomerSearchArgs {
    pub sender_address: String,
    /// 必填的关键词
    #[serde(default)]
    pub search_query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// 在某客户的邮件中做定向检索；query 不能为空
pub struct SearchCustomerEmailsTool {
    store: Arc<dyn SupportStore>,
}

impl SearchCustomerEmailsTool {
    pub fn new(store: Arc<dyn SupportStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SearchCustomerEmailsTool {
    fn name(&self) -> ToolName {
        ToolName::SearchCustomerEmails
    }

    fn description(&self) -> &str {
        "Search a customer's emails for specific words (default 10 results). \
         searchQuery is required; use get_customer_history to list everything."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<CustomerSearchArgs>()
    }

    fn describe_call(&self, args: &Value) -> String {
        format!(
            "Searched emails from {} for \"{}\"",
            display_field(args, "senderAddress"),
            display_field(args, "searchQuery")
        )
    }

    async fn execute(&self, _ctx: &mut RunContext, args: Value) -> ToolOutput {
        let args: CustomerSearchArgs = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return ToolOutput::fail(e),
        };
        if args.search_query.trim().is_empty() {
            return ToolOutput::fail(
                "searchQuery must not be empty. To see all emails from this customer, \
                 call get_customer_history instead.",
            );
        }
        let limit = clamp_limit(args.limit, CUSTOMER_SEARCH_DEFAULT_LIMIT, MAX_LIMIT);
        run_search(
            self.store.as_ref(),
            &args.sender_address,
            &args.search_query,
            limit,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Direction, InMemoryStore, NewEmail, NewThread};
    use chrono::{Duration, Utc};
    use serde_json::json;

    async fn seeded() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        let thread = store
            .insert_thread(NewThread {
                subject: "Order".into(),
                participants: vec!["bob@example.com".into()],
            })
            .await
            .unwrap();
        let now = Utc::now();
        for (i, body) in ["my invoice is wrong", "where is my order", "invoice again"]
            .iter()
            .enumerate()
        {
            store
                .insert_email(NewEmail {
                    thread_id: thread.id,
                    sender: "bob@example.com".into(),
                    recipients: vec!["support@example.com".into()],
                    body: body.to_string(),
                    direction: Direction::Inbound,
                    sent_at: now + Duration::minutes(i as i64),
                })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_history_returns_all_sender_emails() {
        let store = seeded().await;
        let tool = GetCustomerHistoryTool::new(store);
        let out = tool
            .execute(&mut RunContext::new(), json!({"senderAddress": "BOB@example.com"}))
            .await;
        assert!(out.success);
        assert_eq!(out.data.unwrap().as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_search_emails_filters_by_query() {
        let store = seeded().await;
        let tool = SearchEmailsTool::new(store);
        let out = tool
            .execute(
                &mut RunContext::new(),
                json!({"senderAddress": "bob@example.com", "queryText": "invoice", "limit": 1}),
            )
            .await;
        let data = out.data.unwrap();
        assert_eq!(data.as_array().unwrap().len(), 1);
        assert_eq!(data[0]["body"], "invoice again");
    }

    #[tokio::test]
    async fn test_customer_search_rejects_blank_query() {
        let store = seeded().await;
        let tool = SearchCustomerEmailsTool::new(store);
        let out = tool
            .execute(
                &mut RunContext::new(),
                json!({"senderAddress": "bob@example.com", "searchQuery": "   "}),
            )
            .await;
        assert!(!out.success);
        assert!(out.error.unwrap().contains("get_customer_history"));
    }

    #[tokio::test]
    async fn test_customer_search_with_termless_query_finds_nothing() {
        let store = seeded().await;
        let tool = SearchCustomerEmailsTool::new(store);
        for query in ["?", "x"] {
            let out = tool
                .execute(
                    &mut RunContext::new(),
                    json!({"senderAddress": "bob@example.com", "searchQuery": query}),
                )
                .await;
            assert!(out.success);
            assert!(out.data.unwrap().as_array().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_missing_sender_fails_softly() {
        let tool = SearchEmailsTool::new(seeded().await);
        let out = tool.execute(&mut RunContext::new(), json!({})).await;
        assert!(!out.success);
        assert!(out.error.unwrap().starts_with("Invalid arguments"));
        assert_eq!(tool.describe_call(&json!({})), "Listed emails from ?");
    }
}
