//! 记忆层：单次 Agent 运行的对话历史

pub mod conversation;

pub use conversation::{ConversationMemory, Message, Role, OBSERVATION_PREFIX};
