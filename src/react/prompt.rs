//! System prompt 组装：基础分诊说明 + 工具目录 + 工具调用格式

use std::path::Path;

use crate::tools::{tool_call_schema_json, ToolRegistry};

/// 内置的分诊说明（未配置 prompt 文件时使用）
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a customer-support triage agent. \
For the thread described in the first message you must:
1. Understand the customer's request (read_thread, get_customer_history, search_customer_emails).
2. Tag the latest inbound email with one or more categories (tag_email).
3. Look up the answer in the knowledge base (search_knowledge_base).
4. Write exactly one reply draft for human review (write_draft), citing the single most relevant \
knowledge-base snippet you were given. Never invent a citation.
Call tools by replying with JSON only. The run ends as soon as write_draft succeeds.";

/// 依次尝试：显式路径 → config/prompts/triage.txt → ../config/prompts/triage.txt → 内置默认
pub fn load_base_prompt(explicit: Option<&Path>) -> String {
    if let Some(path) = explicit {
        match std::fs::read_to_string(path) {
            Ok(text) if !text.trim().is_empty() => return text,
            Ok(_) => tracing::warn!(path = %path.display(), "System prompt file is empty, using default"),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read system prompt, using default")
            }
        }
    }
    ["config/prompts/triage.txt", "../config/prompts/triage.txt"]
        .into_iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
}

pub fn build_system_prompt(base: &str, registry: &ToolRegistry) -> String {
    format!(
        "{}\n\n## Available tools\n{}\n\n## Tool call format\n\
         Reply with {{\"tool\": \"<name>\", \"args\": {{...}}}}, a JSON array of such objects \
         (executed in order), or {{\"tool_calls\": [...]}}.\n{}",
        base.trim_end(),
        registry.to_schema_json(),
        tool_call_schema_json()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::knowledge::InMemoryKnowledgeBase;
    use crate::store::InMemoryStore;

    #[test]
    fn test_prompt_lists_every_tool() {
        let registry = ToolRegistry::support_tools(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryKnowledgeBase::new(3)),
        );
        let prompt = build_system_prompt(DEFAULT_SYSTEM_PROMPT, &registry);
        for name in crate::tools::ToolName::ALL {
            assert!(prompt.contains(name.as_str()), "missing {name}");
        }
    }

    #[test]
    fn test_explicit_prompt_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.txt");
        std::fs::write(&path, "Be brief.").unwrap();
        assert_eq!(load_base_prompt(Some(&path)), "Be brief.");
    }
}
