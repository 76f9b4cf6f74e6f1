//! triage - 客服邮件分拣智能体
//!
//! 用法：`triage [--config <file>] [--demo] <thread_id>...`
//! 入口：初始化日志、加载配置、为每个线程启动一个 Worker，收到 Ctrl+C / SIGTERM 时停止所有 Worker。

mod cli;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;

use triage::agent::{build_knowledge, build_store, AgentComponents, AgentRunner};
use triage::config::{load_config, AppConfig};
use triage::core::{run_until_shutdown, wait_for_signal, Worker, WorkerEvent, WorkerManager};
use triage::knowledge::{InMemoryKnowledgeBase, KnowledgeSearch};
use triage::llm::create_llm_from_config;
use triage::observability;
use triage::store::{Direction, NewEmail, NewThread, RecordId, SupportStore};

const DEMO_POLICY: &str = "Items can be returned within 30 days of delivery for a full refund. \
Return shipping is free for exchanges. Refunds reach the original payment method within 5 business days.";

/// 演示数据：一个询问退货政策的线程
async fn seed_demo_thread(store: &dyn SupportStore) -> anyhow::Result<RecordId> {
    let customer = "jamie@example.com";
    let thread = store
        .insert_thread(NewThread {
            subject: "Return policy question".into(),
            participants: vec![customer.into(), "support@example.com".into()],
        })
        .await?;
    store
        .insert_email(NewEmail {
            thread_id: thread.id,
            sender: customer.into(),
            recipients: vec!["support@example.com".into()],
            body: "Hi, what is your return policy? I bought running shoes two weeks ago and they do not fit.".into(),
            direction: Direction::Inbound,
            sent_at: Utc::now(),
        })
        .await?;
    tracing::info!(thread_id = thread.id, "Seeded demo thread");
    Ok(thread.id)
}

fn knowledge_for(cfg: &AppConfig, demo: bool) -> anyhow::Result<Arc<dyn KnowledgeSearch>> {
    if demo && cfg.knowledge.endpoint.is_none() && cfg.knowledge.docs_dir.is_none() {
        return Ok(Arc::new(
            InMemoryKnowledgeBase::new(cfg.knowledge.max_results)
                .with_document("policies/returns.md", DEMO_POLICY),
        ));
    }
    Ok(build_knowledge(cfg)?)
}

fn log_event(event: &WorkerEvent) {
    match event {
        WorkerEvent::Running { thread_id } => tracing::info!(thread_id, "Worker running"),
        WorkerEvent::Stopped { thread_id, reason } => {
            tracing::info!(thread_id, reason = ?reason, "Worker stopped")
        }
        WorkerEvent::Error {
            thread_id,
            attempt,
            error,
        } => tracing::warn!(thread_id, attempt, error = %error, "Worker error"),
        WorkerEvent::Failed { thread_id, error } => {
            tracing::error!(thread_id, error = %error, "Worker failed")
        }
    }
}

fn print_outcome(worker: &Worker) {
    match worker.outcome() {
        Some(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::warn!(thread_id = worker.thread_id(), error = %e, "Failed to render report"),
        },
        None => tracing::warn!(thread_id = worker.thread_id(), "Worker ended without a run report"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let args = cli::Cli::parse();
    let cfg = load_config(args.config.clone()).context("Failed to load config")?;

    let store = build_store(&cfg).context("Failed to open store")?;
    let knowledge = knowledge_for(&cfg, args.demo).context("Failed to set up knowledge search")?;
    let llm = create_llm_from_config(&cfg.llm);
    let components = Arc::new(AgentComponents::new(store.clone(), knowledge, llm, &cfg));

    let mut thread_ids = args.thread_ids;
    if args.demo {
        thread_ids.push(seed_demo_thread(store.as_ref()).await?);
    }
    let manager = WorkerManager::new(
        Arc::new(AgentRunner::new(components)),
        cfg.worker.worker_config(),
    );
    let mut events = manager.subscribe();

    let mut workers: HashMap<RecordId, Arc<Worker>> = HashMap::new();
    for id in thread_ids {
        match manager.start_worker_for_thread_if_not_active(id).await {
            Ok(worker) => {
                workers.insert(id, worker);
            }
            Err(e) => tracing::error!(thread_id = id, error = %e, "Could not start worker"),
        }
    }

    let mut pending: HashSet<RecordId> = workers
        .iter()
        .filter(|(_, w)| !w.state().is_terminal())
        .map(|(id, _)| *id)
        .collect();
    for worker in workers.values().filter(|w| w.state().is_terminal()) {
        print_outcome(worker);
    }

    let app = async {
        while !pending.is_empty() {
            match events.recv().await {
                Ok(event) => {
                    log_event(&event);
                    let id = event.thread_id();
                    if matches!(event, WorkerEvent::Stopped { .. } | WorkerEvent::Failed { .. })
                        && pending.remove(&id)
                    {
                        if let Some(worker) = workers.get(&id) {
                            print_outcome(worker);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Lifecycle events dropped");
                    pending.retain(|id| workers.get(id).is_some_and(|w| !w.state().is_terminal()));
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    let drain_timeout = Duration::from_secs(cfg.worker.stop_timeout_secs.saturating_add(5));
    let outcome = run_until_shutdown(&manager, app, wait_for_signal(), drain_timeout).await;
    tracing::info!(outcome = ?outcome, "Triage finished");
    Ok(())
}
