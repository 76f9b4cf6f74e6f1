//! 邮件检索排序（内存 / SQLite 共用）
//!
//! 发件人大小写不敏感匹配；空查询返回该发件人全部邮件（新到旧）；
//! 否则按命中的查询词个数降序、同分按时间新到旧，零命中剔除（查询非空但切不出词时无结果）。

use std::collections::HashSet;

use crate::store::Email;

/// 将文本切分为小写词集合
pub fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 1)
        .collect()
}

pub fn sender_matches(email: &Email, sender: &str) -> bool {
    email.sender.trim().eq_ignore_ascii_case(sender.trim())
}

/// 对同一发件人的候选邮件打分排序并截断
pub fn rank_emails(candidates: Vec<Email>, query: &str, limit: usize) -> Vec<Email> {
    let mut scored: Vec<(usize, Email)> = if query.trim().is_empty() {
        candidates.into_iter().map(|e| (0, e)).collect()
    } else {
        let query_tokens = tokenize_lower(query);
        candidates
            .into_iter()
            .map(|e| {
                let body_tokens = tokenize_lower(&e.body);
                (query_tokens.intersection(&body_tokens).count(), e)
            })
            .filter(|(s, _)| *s > 0)
            .collect()
    };
    scored.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| b.1.sent_at.cmp(&a.1.sent_at))
            .then_with(|| b.1.id.cmp(&a.1.id))
    });
    scored.into_iter().take(limit).map(|(_, e)| e).collect()
}
