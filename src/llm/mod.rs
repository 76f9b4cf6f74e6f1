//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock / Scripted）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError};

use crate::config::LlmSection;

/// 按 [llm].provider 创建客户端；未知 provider 回落到 mock 并告警
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    match cfg.provider.to_lowercase().as_str() {
        "openai" => {
            let api_key = std::env::var(&cfg.api_key_env).ok();
            if api_key.is_none() {
                tracing::warn!(env = %cfg.api_key_env, "API key env var not set; requests will fail authentication");
            }
            tracing::info!(model = %cfg.model, base_url = ?cfg.base_url, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(
                cfg.base_url.as_deref(),
                &cfg.model,
                api_key.as_deref(),
                cfg.request_timeout_secs,
            ))
        }
        "mock" => Arc::new(MockLlmClient::new()),
        other => {
            tracing::warn!(provider = %other, "Unknown LLM provider, falling back to mock");
            Arc::new(MockLlmClient::new())
        }
    }
}
