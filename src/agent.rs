//! Headless Agent 运行时
//!
//! build_components 按配置构建存储、知识库、Planner、ToolExecutor 与 Recovery；
//! process_email 对一个线程跑一次推理循环并返回 RunReport；
//! AgentRunner 把同一套组件接到 Worker 上。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{AgentError, RecoveryEngine, ThreadRunner};
use crate::knowledge::{HttpKnowledgeSearch, InMemoryKnowledgeBase, KnowledgeSearch};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::react::{
    build_system_prompt, load_base_prompt, run_thread, LoopConfig, Planner, RunEvent, RunFailure,
    RunReport, RunSession, RunSuccess,
};
use crate::store::{InMemoryStore, RecordId, SqliteStore, StoreError, SupportStore};
use crate::tools::{ToolExecutor, ToolRegistry};

/// 预构建的 Agent 组件，可被多个 Worker 共享
pub struct AgentComponents {
    pub store: Arc<dyn SupportStore>,
    pub knowledge: Arc<dyn KnowledgeSearch>,
    pub planner: Planner,
    pub executor: ToolExecutor,
    pub recovery: RecoveryEngine,
    pub loop_config: LoopConfig,
}

impl AgentComponents {
    /// 用给定的存储、知识库与模型组装；其余参数取自配置
    pub fn new(
        store: Arc<dyn SupportStore>,
        knowledge: Arc<dyn KnowledgeSearch>,
        llm: Arc<dyn LlmClient>,
        cfg: &AppConfig,
    ) -> Self {
        let registry = ToolRegistry::support_tools(store.clone(), knowledge.clone());
        let base_prompt = load_base_prompt(cfg.agent.system_prompt_path.as_deref());
        let system_prompt = build_system_prompt(&base_prompt, &registry);
        Self {
            store,
            knowledge,
            planner: Planner::new(llm, system_prompt),
            executor: ToolExecutor::new(registry, cfg.agent.tool_timeout_secs),
            recovery: cfg.llm.recovery_engine(),
            loop_config: cfg.agent.loop_config(),
        }
    }

    pub fn with_loop_config(mut self, loop_config: LoopConfig) -> Self {
        self.loop_config = loop_config;
        self
    }

    pub fn with_recovery(mut self, recovery: RecoveryEngine) -> Self {
        self.recovery = recovery;
        self
    }

    fn session(&self, cancel_token: CancellationToken) -> RunSession<'_> {
        RunSession::new(
            &self.planner,
            &self.executor,
            &self.recovery,
            self.store.clone(),
            cancel_token,
        )
        .with_config(self.loop_config)
    }
}

/// [store]：有 sqlite_path 用 SQLite，否则内存存储
pub fn build_store(cfg: &AppConfig) -> Result<Arc<dyn SupportStore>, StoreError> {
    match &cfg.store.sqlite_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Task(format!("create {}: {e}", parent.display())))?;
            }
            tracing::info!(path = %path.display(), "Using SQLite store");
            Ok(Arc::new(SqliteStore::open(path)?))
        }
        None => {
            tracing::info!("Using in-memory store");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

/// [knowledge]：HTTP 检索服务 → 本地 Markdown 目录 → 空索引
pub fn build_knowledge(cfg: &AppConfig) -> Result<Arc<dyn KnowledgeSearch>, AgentError> {
    let k = &cfg.knowledge;
    if let Some(endpoint) = &k.endpoint {
        tracing::info!(endpoint = %endpoint, "Using HTTP knowledge search");
        let search = HttpKnowledgeSearch::new(endpoint.clone(), k.timeout_secs, k.max_results)
            .map_err(|e| AgentError::ConfigError(e.to_string()))?;
        return Ok(Arc::new(search));
    }
    if let Some(dir) = &k.docs_dir {
        let kb = InMemoryKnowledgeBase::from_markdown_dir(dir, k.max_results)
            .map_err(|e| AgentError::ConfigError(format!("{}: {e}", dir.display())))?;
        return Ok(Arc::new(kb));
    }
    tracing::warn!("No knowledge source configured, knowledge search will return nothing");
    Ok(Arc::new(InMemoryKnowledgeBase::new(k.max_results)))
}

/// 按配置构建全部组件
pub fn build_components(cfg: &AppConfig) -> Result<AgentComponents, AgentError> {
    let store = build_store(cfg)?;
    let knowledge = build_knowledge(cfg)?;
    let llm = create_llm_from_config(&cfg.llm);
    Ok(AgentComponents::new(store, knowledge, llm, cfg))
}

/// 处理一个线程：跑一次推理循环（无事件流）
pub async fn process_email(components: &AgentComponents, thread_id: RecordId) -> RunReport {
    let session = components.session(CancellationToken::new());
    run_thread(&session, thread_id).await.into()
}

/// 流式处理：通过 event_tx 推送 TurnStarted / ToolCall / ToolResult / DraftWritten 等事件
pub async fn process_email_stream(
    components: &AgentComponents,
    thread_id: RecordId,
    event_tx: mpsc::UnboundedSender<RunEvent>,
) -> RunReport {
    let session = components
        .session(CancellationToken::new())
        .with_event_tx(&event_tx);
    run_thread(&session, thread_id).await.into()
}

/// Worker 的生产实现：共享 AgentComponents，每次 run 一个新的推理循环
#[derive(Clone)]
pub struct AgentRunner {
    components: Arc<AgentComponents>,
}

impl AgentRunner {
    pub fn new(components: Arc<AgentComponents>) -> Self {
        Self { components }
    }
}

#[async_trait]
impl ThreadRunner for AgentRunner {
    /// 线程必须存在
    async fn prepare(&self, thread_id: RecordId) -> Result<(), AgentError> {
        match self.components.store.get_thread(thread_id).await? {
            Some(_) => Ok(()),
            None => Err(AgentError::Store(StoreError::NotFound(format!(
                "thread {thread_id}"
            )))),
        }
    }

    async fn run(
        &self,
        thread_id: RecordId,
        stop: CancellationToken,
    ) -> Result<RunSuccess, RunFailure> {
        let session = self.components.session(stop);
        run_thread(&session, thread_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::store::NewThread;

    #[tokio::test]
    async fn test_build_components_from_defaults() {
        let components = build_components(&AppConfig::default()).unwrap();
        assert_eq!(components.loop_config.max_turns, 12);
        assert_eq!(components.executor.tool_names().len(), 8);
        assert!(components
            .planner
            .base_system_prompt()
            .contains("write_draft"));
    }

    #[tokio::test]
    async fn test_runner_prepare_requires_thread() {
        let store = Arc::new(InMemoryStore::new());
        let thread = store
            .insert_thread(NewThread {
                subject: "Hi".into(),
                participants: vec![],
            })
            .await
            .unwrap();
        let components = AgentComponents::new(
            store,
            Arc::new(InMemoryKnowledgeBase::new(3)),
            Arc::new(ScriptedLlmClient::new(vec!["unused"])),
            &AppConfig::default(),
        );
        let runner = AgentRunner::new(Arc::new(components));
        assert!(runner.prepare(thread.id).await.is_ok());
        assert!(matches!(
            runner.prepare(thread.id + 100).await,
            Err(AgentError::Store(StoreError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_process_email_reports_empty_thread() {
        let store = Arc::new(InMemoryStore::new());
        let thread = store
            .insert_thread(NewThread {
                subject: "Empty".into(),
                participants: vec![],
            })
            .await
            .unwrap();
        let components = AgentComponents::new(
            store,
            Arc::new(InMemoryKnowledgeBase::new(3)),
            Arc::new(ScriptedLlmClient::new(vec!["unused"])),
            &AppConfig::default(),
        );
        let report = process_email(&components, thread.id).await;
        assert!(!report.is_success());
        assert!(report.error.unwrap().contains("has no emails"));
        assert_eq!(report.actions.len(), 1);
        assert_eq!(report.actions[0].action, "run_failed");
    }
}
