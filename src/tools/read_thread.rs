//! read_thread：读取运行上下文绑定线程的全部邮件（时间升序）

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::store::SupportStore;
use crate::tools::{RunContext, Tool, ToolName, ToolOutput};

pub struct ReadThreadTool {
    store: Arc<dyn SupportStore>,
}

impl ReadThreadTool {
    pub fn new(store: Arc<dyn SupportStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReadThreadTool {
    fn name(&self) -> ToolName {
        ToolName::ReadThread
    }

    fn description(&self) -> &str {
        "Read every email in the current thread, oldest first. Takes no arguments."
    }

    fn describe_call(&self, _args: &Value) -> String {
        "Read the current thread".to_string()
    }

    async fn execute(&self, ctx: &mut RunContext, _args: Value) -> ToolOutput {
        let Some(thread_id) = ctx.thread_id() else {
            return ToolOutput::fail("No thread is bound to this run");
        };
        match self.store.get_sorted_emails_by_thread(thread_id).await {
            Ok(emails) => ToolOutput::ok(json!({
                "threadId": thread_id,
                "emails": emails,
            })),
            Err(e) => ToolOutput::fail(format!("Failed to read thread {thread_id}: {e}")),
        }
    }
}
