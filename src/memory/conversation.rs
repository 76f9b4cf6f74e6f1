//! 单次运行的对话历史
//!
//! 开头的 system prompt 与线程上下文被「钉住」，其余消息超出上限时从最旧的开始丢弃，
//! 保证每一轮 LLM 调用都能看到线程本身。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// 工具结果回写到对话时使用的前缀，MockLlmClient 也按它识别观察结果
pub const OBSERVATION_PREFIX: &str = "Observation from ";

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// 工具执行结果：`Observation from <tool>: <json>`
    pub fn observation(tool: &str, result: &str) -> Self {
        Self::user(format!("{OBSERVATION_PREFIX}{tool}: {result}"))
    }

    /// 若是工具观察消息，返回 (工具名, 结果文本)
    pub fn as_observation(&self) -> Option<(&str, &str)> {
        if self.role != Role::User {
            return None;
        }
        let rest = self.content.strip_prefix(OBSERVATION_PREFIX)?;
        rest.split_once(": ")
    }
}

/// 运行期对话历史：前 pinned 条不参与剪枝
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    messages: Vec<Message>,
    pinned: usize,
    max_messages: usize,
}

impl ConversationMemory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            pinned: 0,
            max_messages,
        }
    }

    /// 追加一条不会被剪枝的消息（system prompt、线程上下文）
    pub fn pin(&mut self, msg: Message) {
        self.messages.insert(self.pinned, msg);
        self.pinned += 1;
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
        self.prune();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 超出 max_messages 时丢弃钉住区之后最旧的消息
    fn prune(&mut self) {
        let limit = self.max_messages.max(self.pinned + 1);
        if self.messages.len() > limit {
            let excess = self.messages.len() - limit;
            self.messages.drain(self.pinned..self.pinned + excess);
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pinned_messages_survive_pruning() {
        let mut memory = ConversationMemory::new(4);
        memory.pin(Message::system("sys"));
        memory.pin(Message::user("thread"));
        for i in 0..5 {
            memory.push(Message::assistant(format!("turn {i}")));
        }
        let contents: Vec<&str> = memory.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["sys", "thread", "turn 3", "turn 4"]);
    }

    #[test]
    fn test_observation_round_trip() {
        let msg = Message::observation("read_thread", "{\"success\":true}");
        assert_eq!(msg.as_observation(), Some(("read_thread", "{\"success\":true}")));
        assert_eq!(Message::user("hello").as_observation(), None);
    }
}
