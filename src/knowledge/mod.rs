//! 知识库检索：外部向量检索服务的抽象
//!
//! Agent 只消费 `{filename, score, text}` 形状的结果；实现可以是进程内 Markdown 索引
//! （InMemoryKnowledgeBase）或远端 HTTP 检索服务（HttpKnowledgeSearch）。

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpKnowledgeSearch;
pub use memory::InMemoryKnowledgeBase;

/// 单条检索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeHit {
    pub filename: String,
    pub score: f64,
    pub text: String,
}

#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("Knowledge search request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Knowledge index IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Knowledge index walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// 知识库检索接口：结果按 score 降序
#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<KnowledgeHit>, KnowledgeError>;
}

/// 按 score 降序排序（NaN 视为最低）
pub(crate) fn sort_hits(hits: &mut [KnowledgeHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or_else(|| a.score.is_nan().cmp(&b.score.is_nan()))
    });
}
