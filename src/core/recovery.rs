//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供推理循环决定是退避重试、注入提示重试还是终止。

use std::time::Duration;

use crate::core::backoff::Backoff;
use crate::core::{AgentError, RecoveryAction};
use crate::llm::LlmError;

/// JSON 格式错误时注入的纠正提示
const JSON_RETRY_PROMPT: &str = "Your previous reply looked like a tool call but was not valid JSON. \
When calling a tool, reply with only a JSON object of the form \
{\"tool\": \"<tool name>\", \"args\": {...}}, or a JSON array of such objects, with no other text.";

/// 语义化错误恢复：瞬时模型故障按指数退避重试，格式错误注入提示，其余终止
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    backoff: Backoff,
    max_retries: u32,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(Backoff::new(500, 8000), 3)
    }
}

impl RecoveryEngine {
    pub fn new(backoff: Backoff, max_retries: u32) -> Self {
        Self {
            backoff,
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// attempt 为本次连续失败的序号（从 1 开始）
    pub fn handle(&self, err: &AgentError, attempt: u32) -> RecoveryAction {
        match err {
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "{JSON_RETRY_PROMPT}\nParser error: {raw}"
            )),
            AgentError::Llm(llm) if llm.is_retryable() && attempt <= self.max_retries => {
                RecoveryAction::Retry {
                    delay: self.retry_delay(llm, attempt),
                }
            }
            _ => RecoveryAction::Abort,
        }
    }

    /// 退避时间与服务端建议的等待时间取较大者，结果不超过 cap
    fn retry_delay(&self, err: &LlmError, attempt: u32) -> Duration {
        let backoff = self.backoff.delay(attempt);
        let cap = Duration::from_millis(self.backoff.cap_ms);
        err.retry_after()
            .map_or(backoff, |hint| hint.max(backoff).min(cap))
    }
}
