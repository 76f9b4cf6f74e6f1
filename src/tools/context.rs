//! 显式运行上下文：每次 Agent 运行一份，随每次工具调用传入

use crate::knowledge::KnowledgeHit;
use crate::store::{Citation, DraftResponse, RecordId};

/// 单次运行的上下文：绑定线程、本次检索到的知识片段、本次写入的草稿
#[derive(Debug, Default, Clone)]
pub struct RunContext {
    thread_id: Option<RecordId>,
    knowledge_hits: Vec<KnowledgeHit>,
    drafts: Vec<DraftResponse>,
}

impl RunContext {
    /// 未绑定线程的上下文（read_thread 会失败）
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_thread(thread_id: RecordId) -> Self {
        Self {
            thread_id: Some(thread_id),
            ..Self::default()
        }
    }

    pub fn thread_id(&self) -> Option<RecordId> {
        self.thread_id
    }

    pub fn record_hits(&mut self, hits: &[KnowledgeHit]) {
        self.knowledge_hits.extend_from_slice(hits);
    }

    pub fn knowledge_hits(&self) -> &[KnowledgeHit] {
        &self.knowledge_hits
    }

    /// 引用是否来自本次运行实际返回过的检索结果：文件名相同、摘录包含在片段中、分数与该片段一致
    pub fn consulted(&self, citation: &Citation) -> bool {
        let excerpt = citation.text.trim();
        !excerpt.is_empty()
            && self.knowledge_hits.iter().any(|hit| {
                hit.filename == citation.filename
                    && hit.text.contains(excerpt)
                    && score_matches(hit.score, citation.score)
            })
    }

    pub fn record_draft(&mut self, draft: DraftResponse) {
        self.drafts.push(draft);
    }

    pub fn drafts(&self) -> &[DraftResponse] {
        &self.drafts
    }

    pub fn last_draft(&self) -> Option<&DraftResponse> {
        self.drafts.last()
    }
}

/// 模型转述分数时允许千分之一的相对误差（如 0.6666… 写成 0.667）
fn score_matches(hit: f64, cited: f64) -> bool {
    (hit - cited).abs() <= SCORE_TOLERANCE * hit.abs().max(1.0)
}

const SCORE_TOLERANCE: f64 = 1e-3;
