//! 工具参数解析辅助

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::RecordId;

/// 记录 id：模型可能给数字，也可能给字符串
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum IdArg {
    Int(i64),
    Text(String),
}

impl IdArg {
    /// 解析为整数 id；field 用于错误提示
    pub fn resolve(&self, field: &str) -> Result<RecordId, String> {
        match self {
            IdArg::Int(id) => Ok(*id),
            IdArg::Text(raw) => raw
                .trim()
                .parse::<RecordId>()
                .map_err(|_| format!("{field} must be an integer, got \"{raw}\"")),
        }
    }
}

/// 把 JSON 参数解析为工具的参数结构；null 视为空对象
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {e}"))
}

/// 描述文本里展示参数值（缺失时为 "?"）
pub fn display_field(args: &Value, key: &str) -> String {
    match args.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "?".to_string(),
        Some(other) => other.to_string(),
    }
}

/// 限制 limit 到 [1, max]
pub fn clamp_limit(limit: Option<usize>, default: usize, max: usize) -> usize {
    limit.unwrap_or(default).clamp(1, max)
}
