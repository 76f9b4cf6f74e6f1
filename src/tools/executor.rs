//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时。每次调用：按名查找 → 超时内执行 → 输出结构化审计日志（JSON）→
//! 追加恰好一条 AgentAction。未知工具与超时都记为失败调用，回给模型而不是中止运行。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::store::{ActionLog, ActionStatus, StoreError};
use crate::tools::{RunContext, Tool, ToolName, ToolOutput, ToolRegistry};

/// 工具执行器：对每次调用施加超时，并写入审计日志
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// 执行指定工具并记录审计条目；只有审计日志写入失败才返回 Err
    pub async fn execute(
        &self,
        ctx: &mut RunContext,
        log: &mut ActionLog,
        tool_name: &str,
        args: Value,
    ) -> Result<ToolOutput, StoreError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);

        let (description, output, outcome) = match self.registry.get_by_name(tool_name) {
            Some(tool) => {
                let description = tool.describe_call(&args);
                match timeout(self.timeout, tool.execute(ctx, args.clone())).await {
                    Ok(output) => {
                        let outcome = if output.success { "ok" } else { "error" };
                        (description, output, outcome)
                    }
                    Err(_) => (
                        description,
                        ToolOutput::fail(format!(
                            "Tool {tool_name} timed out after {} ms",
                            self.timeout.as_millis()
                        )),
                        "timeout",
                    ),
                }
            }
            None => (
                format!("Attempted unknown tool {tool_name}"),
                ToolOutput::fail(format!(
                    "Unknown tool: {tool_name}. Available tools: {}",
                    self.tool_names()
                        .iter()
                        .map(ToolName::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                )),
                "unknown_tool",
            ),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "thread_id": log.thread_id(),
            "tool": tool_name,
            "ok": output.success,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        let (status, payload) = if output.success {
            (
                ActionStatus::Success,
                output.data.clone().unwrap_or(Value::Null),
            )
        } else {
            (
                ActionStatus::Error,
                Value::String(output.error.clone().unwrap_or_default()),
            )
        };
        log.record_tool(tool_name, description, &args, status, payload)
            .await?;
        Ok(output)
    }

    pub fn get_tool(&self, name: ToolName) -> Option<std::sync::Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<ToolName> {
        self.registry.tool_names()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    use crate::store::{InMemoryStore, SupportStore};
    use crate::tools::ExplainNextToolCallTool;

    /// 永不返回的工具，用于验证超时
    struct HangingTool;

    #[async_trait]
    impl Tool for HangingTool {
        fn name(&self) -> ToolName {
            ToolName::ReadThread
        }

        fn description(&self) -> &str {
            "hangs"
        }

        fn describe_call(&self, _args: &Value) -> String {
            "Read the current thread".into()
        }

        async fn execute(&self, _ctx: &mut RunContext, _args: Value) -> ToolOutput {
            std::future::pending::<()>().await;
            ToolOutput::ok(Value::Null)
        }
    }

    fn log_for(store: &Arc<InMemoryStore>) -> ActionLog {
        ActionLog::new(store.clone(), 1)
    }

    #[tokio::test]
    async fn test_unknown_tool_is_logged_as_error() {
        let store = Arc::new(InMemoryStore::new());
        let executor = ToolExecutor::new(ToolRegistry::new(), 5);
        let mut log = log_for(&store);
        let out = executor
            .execute(&mut RunContext::for_thread(1), &mut log, "shell", json!({"cmd": "ls"}))
            .await
            .unwrap();
        assert!(!out.success);
        let actions = store.list_actions_for_thread(1).await.unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action, "shell");
        assert_eq!(actions[0].status(), Some(ActionStatus::Error));
        assert_eq!(actions[0].metadata["parameters"], json!({"cmd": "ls"}));
    }

    #[tokio::test]
    async fn test_timeout_becomes_failed_call() {
        let store = Arc::new(InMemoryStore::new());
        let mut registry = ToolRegistry::new();
        registry.register(HangingTool);
        let executor = ToolExecutor::with_timeout(registry, Duration::from_millis(20));
        let mut log = log_for(&store);
        let out = executor
            .execute(&mut RunContext::for_thread(1), &mut log, "read_thread", Value::Null)
            .await
            .unwrap();
        assert!(out.error.unwrap().contains("timed out"));
        assert_eq!(log.entries()[0].status(), Some(ActionStatus::Error));
    }

    #[tokio::test]
    async fn test_success_records_result() {
        let store = Arc::new(InMemoryStore::new());
        let mut registry = ToolRegistry::new();
        registry.register(ExplainNextToolCallTool);
        let executor = ToolExecutor::new(registry, 5);
        let mut log = log_for(&store);
        executor
            .execute(
                &mut RunContext::for_thread(1),
                &mut log,
                "explain_next_tool_call",
                json!({"explanation": "check policy", "nextToolName": "search_knowledge_base"}),
            )
            .await
            .unwrap();
        let entry = &log.entries()[0];
        assert_eq!(entry.status(), Some(ActionStatus::Success));
        assert!(!entry.description.is_empty());
        assert_eq!(entry.metadata["result"]["explanation"], "check policy");
    }
}
