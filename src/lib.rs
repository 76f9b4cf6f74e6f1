//! triage - 客服邮件分拣智能体
//!
//! 模块划分：
//! - **agent**: 无头 Agent 运行时（组件构建、process_email、Worker 的 ThreadRunner 实现）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、退避、Worker 生命周期、WorkerManager、优雅关闭
//! - **knowledge**: 知识库检索（进程内 Markdown 索引 / HTTP 检索服务）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock / Scripted）
//! - **memory**: 单次运行的对话记忆
//! - **react**: 线程上下文、Planner、推理主循环
//! - **store**: 数据模型、存储接口（内存 / SQLite）、Agent 动作审计日志
//! - **tools**: 八个客服工具、注册表与执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod knowledge;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod store;
pub mod tools;
