//! Planner：调用 LLM 与 Tool Call 解析
//!
//! parse_llm_output 从模型文本中提取 JSON 并解析为一组 ToolCall，否则视为文本回复；空输出为 Empty。
//! 接受三种形状：`{"tool","args"}`、其数组、`{"tool_calls": [...]}`，可包在 ```json 代码块里。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;

/// LLM 返回的 Tool Call（{"tool": "tag_email", "args": {...}}）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// Planner 输出
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerOutput {
    /// 文本回复（没有调用工具）
    Response(String),
    /// 按模型给出的顺序执行的工具调用
    ToolCalls(Vec<ToolCall>),
    /// 没有可执行内容
    Empty,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawToolCalls {
    Batch { tool_calls: Vec<ToolCall> },
    One(ToolCall),
    Many(Vec<ToolCall>),
}

/// 提取 JSON 片段；不像工具调用的文本返回 None
fn extract_json(trimmed: &str) -> Option<&str> {
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    if trimmed.starts_with('[') {
        return Some(trimmed);
    }
    if trimmed.starts_with('{') || trimmed.contains("\"tool\"") {
        let start = trimmed.find('{')?;
        return Some(match trimmed.rfind('}') {
            Some(end) if end > start => &trimmed[start..=end],
            _ => &trimmed[start..],
        });
    }
    None
}

/// 解析 LLM 输出
pub fn parse_llm_output(output: &str) -> Result<PlannerOutput, AgentError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(PlannerOutput::Empty);
    }
    let Some(json_str) = extract_json(trimmed) else {
        return Ok(PlannerOutput::Response(trimmed.to_string()));
    };

    let value: Value = serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{e}: {json_str}")))?;
    let raw: RawToolCalls = serde_json::from_value(value).map_err(|_| {
        AgentError::JsonParseError(format!(
            "expected {{\"tool\": ..., \"args\": {{...}}}} or a list of them: {json_str}"
        ))
    })?;
    let calls = match raw {
        RawToolCalls::Batch { tool_calls } => tool_calls,
        RawToolCalls::One(call) => vec![call],
        RawToolCalls::Many(calls) => calls,
    };
    if calls.iter().any(|c| c.tool.trim().is_empty()) {
        return Err(AgentError::JsonParseError(format!(
            "tool name must not be empty: {json_str}"
        )));
    }
    if calls.is_empty() {
        return Ok(PlannerOutput::Empty);
    }
    Ok(PlannerOutput::ToolCalls(calls))
}

/// Planner：持有 LLM 与 system prompt，plan 时拼 system + 历史后调用 LLM
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn base_system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub async fn plan(&self, messages: &[Message]) -> Result<String, AgentError> {
        let mut full_messages = Vec::with_capacity(messages.len() + 1);
        full_messages.push(Message::system(self.system_prompt.clone()));
        full_messages.extend_from_slice(messages);
        Ok(self.llm.complete(&full_messages).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_call() {
        let out = parse_llm_output(r#"{"tool": "read_thread", "args": {}}"#).unwrap();
        assert_eq!(
            out,
            PlannerOutput::ToolCalls(vec![ToolCall {
                tool: "read_thread".into(),
                args: json!({})
            }])
        );
    }

    #[test]
    fn test_fenced_batch_keeps_order() {
        let text = "I'll tag and then search.\n```json\n{\"tool_calls\": [\
            {\"tool\": \"tag_email\", \"args\": {\"emailId\": 1, \"tags\": [\"billing\"]}},\
            {\"tool\": \"search_knowledge_base\", \"args\": {\"query\": \"refund\"}}]}\n```";
        match parse_llm_output(text).unwrap() {
            PlannerOutput::ToolCalls(calls) => {
                let names: Vec<&str> = calls.iter().map(|c| c.tool.as_str()).collect();
                assert_eq!(names, vec!["tag_email", "search_knowledge_base"]);
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn test_array_form_and_missing_args() {
        match parse_llm_output(r#"[{"tool": "read_thread"}, {"tool": "explain_next_tool_call", "args": {}}]"#)
            .unwrap()
        {
            PlannerOutput::ToolCalls(calls) => {
                assert_eq!(calls.len(), 2);
                assert!(calls[0].args.is_null());
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_text_and_blank() {
        assert_eq!(
            parse_llm_output("  Our return window is 30 days.  ").unwrap(),
            PlannerOutput::Response("Our return window is 30 days.".into())
        );
        assert_eq!(parse_llm_output(" \n ").unwrap(), PlannerOutput::Empty);
        assert_eq!(parse_llm_output(r#"{"tool_calls": []}"#).unwrap(), PlannerOutput::Empty);
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        assert!(matches!(
            parse_llm_output(r#"{"tool": "tag_email", "args": {"emailId": 1,}"#),
            Err(AgentError::JsonParseError(_))
        ));
        assert!(matches!(
            parse_llm_output(r#"{"action": "write"}"#),
            Err(AgentError::JsonParseError(_))
        ));
        assert!(matches!(
            parse_llm_output(r#"{"tool": " ", "args": {}}"#),
            Err(AgentError::JsonParseError(_))
        ));
    }
}
