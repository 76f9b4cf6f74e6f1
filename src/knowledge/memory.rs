//! 进程内知识库：按段落切分文档，查询词重叠打分
//!
//! 无真实向量，score = 命中查询词数 / 查询词总数，落在 [0,1]。
//! from_markdown_dir 把目录下所有 *.md 按空行切段后索引。

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::knowledge::{sort_hits, KnowledgeError, KnowledgeHit, KnowledgeSearch};
use crate::store::search::tokenize_lower;

struct Chunk {
    filename: String,
    text: String,
    tokens: HashSet<String>,
}

pub struct InMemoryKnowledgeBase {
    chunks: Vec<Chunk>,
    max_results: usize,
}

impl InMemoryKnowledgeBase {
    pub fn new(max_results: usize) -> Self {
        Self {
            chunks: Vec::new(),
            max_results: max_results.max(1),
        }
    }

    /// 添加一份文档；按空行切分为段落，每段单独打分
    pub fn add_document(&mut self, filename: impl Into<String>, text: &str) {
        let filename = filename.into();
        for paragraph in text.split("\n\n") {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }
            self.chunks.push(Chunk {
                filename: filename.clone(),
                text: paragraph.to_string(),
                tokens: tokenize_lower(paragraph),
            });
        }
    }

    pub fn with_document(mut self, filename: impl Into<String>, text: &str) -> Self {
        self.add_document(filename, text);
        self
    }

    /// 递归索引目录下的 Markdown 文件；filename 记为相对目录的路径
    pub fn from_markdown_dir(
        dir: impl AsRef<Path>,
        max_results: usize,
    ) -> Result<Self, KnowledgeError> {
        let dir = dir.as_ref();
        let mut kb = Self::new(max_results);
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("md")
            {
                continue;
            }
            let text = std::fs::read_to_string(path)?;
            let name = path
                .strip_prefix(dir)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");
            kb.add_document(name, &text);
        }
        tracing::info!(chunks = kb.len(), dir = %dir.display(), "Indexed markdown knowledge base");
        Ok(kb)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[async_trait]
impl KnowledgeSearch for InMemoryKnowledgeBase {
    async fn search(&self, query: &str) -> Result<Vec<KnowledgeHit>, KnowledgeError> {
        let query_tokens = tokenize_lower(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }
        let total = query_tokens.len() as f64;
        let mut hits: Vec<KnowledgeHit> = self
            .chunks
            .iter()
            .filter_map(|chunk| {
                let overlap = query_tokens.intersection(&chunk.tokens).count();
                (overlap > 0).then(|| KnowledgeHit {
                    filename: chunk.filename.clone(),
                    score: overlap as f64 / total,
                    text: chunk.text.clone(),
                })
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(self.max_results);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_ranks_by_overlap() {
        let kb = InMemoryKnowledgeBase::new(5)
            .with_document("returns.md", "Our return policy allows returns within 30 days.")
            .with_document("shipping.md", "Shipping takes 5 business days.");
        let hits = kb.search("what is your return policy?").await.unwrap();
        assert_eq!(hits[0].filename, "returns.md");
        assert!(hits[0].score > 0.0 && hits[0].score <= 1.0);
        assert!(hits.iter().all(|h| h.filename != "shipping.md"));
    }

    #[tokio::test]
    async fn test_empty_query_has_no_hits() {
        let kb = InMemoryKnowledgeBase::new(5).with_document("a.md", "anything");
        assert!(kb.search("   ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_markdown_dir_is_indexed_by_paragraph() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("billing")).unwrap();
        std::fs::write(
            dir.path().join("billing/refunds.md"),
            "# Refunds\n\nRefunds are issued to the original card.\n\nInvoices are emailed monthly.",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "refunds ignored").unwrap();

        let kb = InMemoryKnowledgeBase::from_markdown_dir(dir.path(), 3).unwrap();
        assert_eq!(kb.len(), 3);
        let hits = kb.search("refunds card").await.unwrap();
        assert_eq!(hits[0].filename, "billing/refunds.md");
        assert_eq!(hits[0].text, "Refunds are issued to the original card.");
    }
}
