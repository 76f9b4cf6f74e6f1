//! 认知层：线程上下文、Planner、推理主循环、过程事件、system prompt

pub mod context;
pub mod events;
pub mod loop_;
pub mod planner;
pub mod prompt;

pub use context::ThreadContext;
pub use events::RunEvent;
pub use loop_::{run_thread, LoopConfig, RunFailure, RunReport, RunSession, RunSuccess};
pub use planner::{parse_llm_output, Planner, PlannerOutput, ToolCall};
pub use prompt::{build_system_prompt, load_base_prompt, DEFAULT_SYSTEM_PROMPT};
