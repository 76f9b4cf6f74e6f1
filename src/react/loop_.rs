//! 推理循环（单次 Agent 运行）
//!
//! 线程上下文 → 调模型 → 解析 → 按序执行工具并写审计日志 → Observation 回写 → 下一轮，
//! 直到 write_draft 成功（成功）或超出最大轮数 / 模型不可恢复失败 / 被停止（失败）。
//! 可选 event_tx：向调用方推送 TurnStarted / ToolCall / ToolResult / DraftWritten 等事件。

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::memory::{ConversationMemory, Message};
use crate::react::{parse_llm_output, Planner, PlannerOutput, RunEvent, ThreadContext};
use crate::store::{ActionLog, AgentAction, DraftResponse, RecordId, SupportStore};
use crate::tools::{RunContext, ToolExecutor};

/// 模型输出 / 工具结果预览最大字符数
const PREVIEW_CHARS: usize = 200;

/// 文本回复后注入的提醒
const DRAFT_REMINDER: &str =
    "A plain-text answer does not reach the customer. Call write_draft with your reply so a human can review it.";
/// 空输出后注入的提醒
const EMPTY_REMINDER: &str =
    "Your reply was empty. Call one of the available tools using the JSON format.";

/// 循环参数
#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    pub max_turns: usize,
    /// 对话历史上限（线程上下文不计入剪枝）
    pub max_history_messages: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_turns: 12,
            max_history_messages: 40,
        }
    }
}

/// 成功运行：草稿与本次写入的全部审计条目
#[derive(Debug, Clone)]
pub struct RunSuccess {
    pub draft: DraftResponse,
    pub actions: Vec<AgentAction>,
}

/// 失败运行：原因与失败前已写入的审计条目
#[derive(Error, Debug)]
#[error("run failed: {error}")]
pub struct RunFailure {
    #[source]
    pub error: AgentError,
    pub actions: Vec<AgentAction>,
}

/// 对外报告：成功带草稿，失败带错误文本；两种情况都带审计条目
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub draft: Option<DraftResponse>,
    pub actions: Vec<AgentAction>,
    pub error: Option<String>,
}

impl RunReport {
    pub fn from_result(result: &Result<RunSuccess, RunFailure>) -> Self {
        match result {
            Ok(success) => Self {
                draft: Some(success.draft.clone()),
                actions: success.actions.clone(),
                error: None,
            },
            Err(failure) => Self {
                draft: None,
                actions: failure.actions.clone(),
                error: Some(failure.error.to_string()),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.draft.is_some()
    }
}

impl From<Result<RunSuccess, RunFailure>> for RunReport {
    fn from(result: Result<RunSuccess, RunFailure>) -> Self {
        match result {
            Ok(success) => Self {
                draft: Some(success.draft),
                actions: success.actions,
                error: None,
            },
            Err(failure) => Self {
                draft: None,
                error: Some(failure.error.to_string()),
                actions: failure.actions,
            },
        }
    }
}

/// 单次运行的依赖与参数
pub struct RunSession<'a> {
    pub planner: &'a Planner,
    pub executor: &'a ToolExecutor,
    pub recovery: &'a RecoveryEngine,
    pub store: Arc<dyn SupportStore>,
    /// 协作式停止：每轮开始前检查
    pub cancel_token: CancellationToken,
    pub event_tx: Option<&'a mpsc::UnboundedSender<RunEvent>>,
    pub config: LoopConfig,
}

impl<'a> RunSession<'a> {
    pub fn new(
        planner: &'a Planner,
        executor: &'a ToolExecutor,
        recovery: &'a RecoveryEngine,
        store: Arc<dyn SupportStore>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            planner,
            executor,
            recovery,
            store,
            cancel_token,
            event_tx: None,
            config: LoopConfig::default(),
        }
    }

    pub fn with_event_tx(mut self, tx: &'a mpsc::UnboundedSender<RunEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    fn send_event(&self, ev: RunEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }
}

fn preview(s: &str) -> String {
    if s.chars().count() > PREVIEW_CHARS {
        format!("{}...", s.chars().take(PREVIEW_CHARS).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 对一个线程跑一次完整的推理循环
pub async fn run_thread(
    session: &RunSession<'_>,
    thread_id: RecordId,
) -> Result<RunSuccess, RunFailure> {
    let mut log = ActionLog::new(session.store.clone(), thread_id);
    match drive(session, thread_id, &mut log).await {
        Ok(draft) => Ok(RunSuccess {
            draft,
            actions: log.into_entries(),
        }),
        Err(error) => {
            session.send_event(RunEvent::Error {
                text: error.to_string(),
            });
            if let Err(e) = log.record_run_failed(&error.to_string()).await {
                tracing::warn!(thread_id, error = %e, "Failed to record run failure");
            }
            Err(RunFailure {
                error,
                actions: log.into_entries(),
            })
        }
    }
}

async fn drive(
    session: &RunSession<'_>,
    thread_id: RecordId,
    log: &mut ActionLog,
) -> Result<DraftResponse, AgentError> {
    let emails = session.store.get_sorted_emails_by_thread(thread_id).await?;
    if emails.is_empty() {
        return Err(AgentError::EmptyThread(thread_id));
    }
    let thread = session.store.get_thread(thread_id).await?;
    let context = ThreadContext::from_thread(thread_id, thread.as_ref(), &emails);

    let mut memory = ConversationMemory::new(session.config.max_history_messages);
    memory.pin(Message::user(context.render()));
    let mut run_ctx = RunContext::for_thread(thread_id);
    let max_turns = session.config.max_turns;
    let (init_prompt, init_completion, _) = session.planner.token_usage();

    for turn in 1..=max_turns {
        if session.cancel_token.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        session.send_event(RunEvent::TurnStarted {
            thread_id,
            turn,
            max_turns,
        });

        let output = call_model(session, &memory, log).await?;
        log.record_model_output(turn, &output).await?;
        session.send_event(RunEvent::ModelOutput {
            preview: preview(&output),
        });
        memory.push(Message::assistant(output.clone()));

        match parse_llm_output(&output) {
            Ok(PlannerOutput::ToolCalls(calls)) => {
                for call in calls {
                    session.send_event(RunEvent::ToolCall {
                        tool: call.tool.clone(),
                        args: call.args.clone(),
                    });
                    let result = session
                        .executor
                        .execute(&mut run_ctx, log, &call.tool, call.args)
                        .await?;
                    let observation = result.to_observation();
                    session.send_event(RunEvent::ToolResult {
                        tool: call.tool.clone(),
                        success: result.success,
                        preview: preview(&observation),
                    });
                    memory.push(Message::observation(&call.tool, &observation));
                }
                if let Some(draft) = run_ctx.last_draft() {
                    session.send_event(RunEvent::DraftWritten {
                        draft_id: draft.id,
                        has_citation: draft.citation.is_some(),
                    });
                    let (cur_prompt, cur_completion, _) = session.planner.token_usage();
                    let prompt_tokens = cur_prompt.saturating_sub(init_prompt);
                    let completion_tokens = cur_completion.saturating_sub(init_completion);
                    session.send_event(RunEvent::TokenUsage {
                        prompt_tokens,
                        completion_tokens,
                        total_tokens: prompt_tokens + completion_tokens,
                    });
                    tracing::info!(thread_id, turn, draft_id = draft.id, "Draft written");
                    return Ok(draft.clone());
                }
            }
            Ok(PlannerOutput::Response(_)) => {
                session.send_event(RunEvent::Recovery {
                    action: "Reminder".to_string(),
                    detail: DRAFT_REMINDER.to_string(),
                });
                memory.push(Message::user(DRAFT_REMINDER));
            }
            Ok(PlannerOutput::Empty) => {
                session.send_event(RunEvent::Recovery {
                    action: "Reminder".to_string(),
                    detail: EMPTY_REMINDER.to_string(),
                });
                memory.push(Message::user(EMPTY_REMINDER));
            }
            Err(e) => match session.recovery.handle(&e, 1) {
                RecoveryAction::RetryWithPrompt(prompt) => {
                    tracing::debug!(thread_id, turn, error = %e, "Malformed tool call, asking model to retry");
                    session.send_event(RunEvent::Recovery {
                        action: "RetryWithPrompt".to_string(),
                        detail: prompt.clone(),
                    });
                    memory.push(Message::user(prompt));
                }
                _ => return Err(e),
            },
        }
    }

    tracing::warn!(thread_id, max_turns, "Run ended without a draft");
    Err(AgentError::MaxTurnsExceeded(max_turns))
}

/// 调用模型；瞬时故障按 RecoveryEngine 退避重试，每次重试写一条 model_retry
async fn call_model(
    session: &RunSession<'_>,
    memory: &ConversationMemory,
    log: &mut ActionLog,
) -> Result<String, AgentError> {
    let mut attempt = 0;
    loop {
        let err = match session.planner.plan(memory.messages()).await {
            Ok(output) => return Ok(output),
            Err(e) => e,
        };
        attempt += 1;
        match session.recovery.handle(&err, attempt) {
            RecoveryAction::Retry { delay } => {
                let delay_ms = delay.as_millis() as u64;
                let reason = err.to_string();
                tracing::warn!(
                    thread_id = log.thread_id(),
                    attempt,
                    delay_ms,
                    error = %reason,
                    "Model call failed, retrying"
                );
                log.record_retry(attempt, delay_ms, &reason).await?;
                session.send_event(RunEvent::ModelRetry {
                    attempt,
                    delay_ms,
                    reason,
                });
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = session.cancel_token.cancelled() => return Err(AgentError::Cancelled),
                }
            }
            _ => return Err(err),
        }
    }
}
