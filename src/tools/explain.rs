//! explain_next_tool_call：透明度工具，只写审计日志，总是成功

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::schema::args_schema;
use crate::tools::{RunContext, Tool, ToolName, ToolOutput};

const DESCRIPTION_PREVIEW_CHARS: usize = 120;

#[allow(dead_code)]
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ExplainArgs {
    /// 下一步要做什么、为什么
    explanation: String,
    next_tool_name: ToolName,
}

fn text_field(args: &Value, key: &str) -> String {
    match args.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

pub struct ExplainNextToolCallTool;

#[async_trait]
impl Tool for ExplainNextToolCallTool {
    fn name(&self) -> ToolName {
        ToolName::ExplainNextToolCall
    }

    fn description(&self) -> &str {
        "Explain, in one or two sentences, which tool you will call next and why."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<ExplainArgs>()
    }

    fn describe_call(&self, args: &Value) -> String {
        let next = text_field(args, "nextToolName");
        let explanation: String = text_field(args, "explanation")
            .chars()
            .take(DESCRIPTION_PREVIEW_CHARS)
            .collect();
        match (next.is_empty(), explanation.is_empty()) {
            (true, true) => "Explained next step".to_string(),
            (false, true) => format!("Next: {next}"),
            (true, false) => format!("Explained next step: {explanation}"),
            (false, false) => format!("Next: {next} ({explanation})"),
        }
    }

    async fn execute(&self, _ctx: &mut RunContext, args: Value) -> ToolOutput {
        ToolOutput::ok(json!({
            "explanation": text_field(&args, "explanation"),
            "nextToolName": text_field(&args, "nextToolName"),
        }))
    }
}
