//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TRIAGE__*` 覆盖（双下划线表示嵌套，如 `TRIAGE__LLM__PROVIDER=openai`）。
//! 每个字段都有默认值，空配置也是合法配置。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{Backoff, RecoveryEngine, WorkerConfig};
use crate::react::LoopConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub worker: WorkerSection,
    pub store: StoreSection,
    pub knowledge: KnowledgeSection,
}

/// [app] 段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择、超时与模型调用重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 存放 API Key 的环境变量名
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 60,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 8000,
        }
    }
}

impl LlmSection {
    pub fn recovery_engine(&self) -> RecoveryEngine {
        RecoveryEngine::new(
            Backoff::new(self.backoff_base_ms, self.backoff_cap_ms),
            self.max_retries,
        )
    }
}

/// [agent] 段：推理循环参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_turns: usize,
    /// 对话历史上限（线程上下文消息不参与剪枝）
    pub max_history_messages: usize,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 覆盖内置分诊说明的 prompt 文件
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_turns: 12,
            max_history_messages: 40,
            tool_timeout_secs: 30,
            system_prompt_path: None,
        }
    }
}

impl AgentSection {
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            max_turns: self.max_turns.max(1),
            max_history_messages: self.max_history_messages,
        }
    }
}

/// [worker] 段：重启预算与启停超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub max_restarts: u32,
    pub restart_backoff_base_ms: u64,
    pub restart_backoff_cap_ms: u64,
    pub start_timeout_secs: u64,
    pub stop_timeout_secs: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            max_restarts: 2,
            restart_backoff_base_ms: 1_000,
            restart_backoff_cap_ms: 30_000,
            start_timeout_secs: 10,
            stop_timeout_secs: 30,
        }
    }
}

impl WorkerSection {
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            max_restarts: self.max_restarts,
            restart_backoff: Backoff::new(self.restart_backoff_base_ms, self.restart_backoff_cap_ms),
            start_timeout: Duration::from_secs(self.start_timeout_secs),
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
        }
    }
}

/// [store] 段：未设置 sqlite_path 时使用内存存储
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub sqlite_path: Option<PathBuf>,
}

/// [knowledge] 段：HTTP 检索服务优先，其次本地 Markdown 目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KnowledgeSection {
    pub endpoint: Option<String>,
    pub docs_dir: Option<PathBuf>,
    pub timeout_secs: u64,
    pub max_results: usize,
}

impl Default for KnowledgeSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            docs_dir: None,
            timeout_secs: 15,
            max_results: 5,
        }
    }
}

/// 从 config 目录加载配置，环境变量 TRIAGE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TRIAGE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TRIAGE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
