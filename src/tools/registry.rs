//! 工具注册表
//!
//! 所有工具实现 Tool trait，由 ToolRegistry 按 ToolName 注册与查找；启动时一次性构建，
//! 运行期只读。ToolExecutor 在调用时加超时并写审计日志。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::knowledge::KnowledgeSearch;
use crate::store::SupportStore;
use crate::tools::{
    ExplainNextToolCallTool, GetCustomerHistoryTool, ReadThreadTool, RunContext,
    SearchCustomerEmailsTool, SearchEmailsTool, SearchKnowledgeBaseTool, TagEmailTool, ToolName,
    ToolOutput, WriteDraftTool,
};

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、调用描述、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> ToolName;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema（供 LLM 生成正确的参数格式）
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 由调用参数合成的一句话描述，写入审计日志；不得为空
    fn describe_call(&self, args: &Value) -> String;

    /// 执行工具；失败以 ToolOutput::fail 返回，不抛错
    async fn execute(&self, ctx: &mut RunContext, args: Value) -> ToolOutput;
}

/// 工具注册表：ToolName → Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<ToolName, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 客服分诊的完整工具集
    pub fn support_tools(
        store: Arc<dyn SupportStore>,
        knowledge: Arc<dyn KnowledgeSearch>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(SearchEmailsTool::new(store.clone()));
        registry.register(GetCustomerHistoryTool::new(store.clone()));
        registry.register(SearchCustomerEmailsTool::new(store.clone()));
        registry.register(TagEmailTool::new(store.clone()));
        registry.register(SearchKnowledgeBaseTool::new(knowledge));
        registry.register(ReadThreadTool::new(store.clone()));
        registry.register(WriteDraftTool::new(store));
        registry.register(ExplainNextToolCallTool);
        registry
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Arc::new(tool));
    }

    pub fn get(&self, name: ToolName) -> Option<Arc<dyn Tool>> {
        self.tools.get(&name).cloned()
    }

    /// 按模型给出的字符串查找；未知名称返回 None
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Tool>> {
        name.parse::<ToolName>().ok().and_then(|n| self.get(n))
    }

    /// 已注册工具，按 ToolName::ALL 顺序
    pub fn tool_names(&self) -> Vec<ToolName> {
        ToolName::ALL
            .into_iter()
            .filter(|n| self.tools.contains_key(n))
            .collect()
    }

    /// 工具目录 JSON（name / description / parameters），拼入 system prompt
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tool_names()
            .into_iter()
            .filter_map(|name| self.tools.get(&name))
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name().as_str(),
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
