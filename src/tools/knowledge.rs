//! search_knowledge_base：委托外部知识检索服务，结果记入运行上下文供引用校验

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::knowledge::KnowledgeSearch;
use crate::tools::args::{display_field, parse_args};
use crate::tools::schema::args_schema;
use crate::tools::{RunContext, Tool, ToolName, ToolOutput};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct KnowledgeArgs {
    #[serde(default)]
    pub query: String,
}

pub struct SearchKnowledgeBaseTool {
    knowledge: Arc<dyn KnowledgeSearch>,
}

impl SearchKnowledgeBaseTool {
    pub fn new(knowledge: Arc<dyn KnowledgeSearch>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl Tool for SearchKnowledgeBaseTool {
    fn name(&self) -> ToolName {
        ToolName::SearchKnowledgeBase
    }

    fn description(&self) -> &str {
        "Search the support knowledge base. Returns snippets {filename, score, text}, best first. \
         Cite one of these snippets in write_draft."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<KnowledgeArgs>()
    }

    fn describe_call(&self, args: &Value) -> String {
        format!(
            "Searched knowledge base for \"{}\"",
            display_field(args, "query")
        )
    }

    async fn execute(&self, ctx: &mut RunContext, args: Value) -> ToolOutput {
        let args: KnowledgeArgs = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return ToolOutput::fail(e),
        };
        let query = args.query.trim();
        if query.is_empty() {
            return ToolOutput::fail("query must not be empty");
        }
        match self.knowledge.search(query).await {
            Ok(hits) => {
                ctx.record_hits(&hits);
                match serde_json::to_value(&hits) {
                    Ok(data) => ToolOutput::ok(data),
                    Err(e) => ToolOutput::fail(format!("Failed to encode results: {e}")),
                }
            }
            Err(e) => ToolOutput::fail(format!("Knowledge search failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::InMemoryKnowledgeBase;
    use serde_json::json;

    #[tokio::test]
    async fn test_hits_are_recorded_in_context() {
        let kb = InMemoryKnowledgeBase::new(3)
            .with_document("returns.md", "Returns are accepted within 30 days.");
        let tool = SearchKnowledgeBaseTool::new(Arc::new(kb));
        let mut ctx = RunContext::for_thread(1);
        let out = tool.execute(&mut ctx, json!({"query": "returns policy"})).await;
        assert!(out.success);
        assert_eq!(out.data.unwrap()[0]["filename"], "returns.md");
        assert_eq!(ctx.knowledge_hits().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_query_fails() {
        let tool = SearchKnowledgeBaseTool::new(Arc::new(InMemoryKnowledgeBase::new(3)));
        let out = tool.execute(&mut RunContext::new(), json!({"query": " "})).await;
        assert!(!out.success);
    }
}
