//! 远端知识库检索：POST {query, limit} 到向量检索服务
//!
//! 响应可以是结果数组，也可以是 `{"results": [...]}`。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::knowledge::{sort_hits, KnowledgeError, KnowledgeHit, KnowledgeSearch};

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    limit: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Hits(Vec<KnowledgeHit>),
    Wrapped { results: Vec<KnowledgeHit> },
}

pub struct HttpKnowledgeSearch {
    client: reqwest::Client,
    endpoint: String,
    limit: usize,
}

impl HttpKnowledgeSearch {
    pub fn new(
        endpoint: impl Into<String>,
        timeout_secs: u64,
        limit: usize,
    ) -> Result<Self, KnowledgeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            limit: limit.max(1),
        })
    }
}

#[async_trait]
impl KnowledgeSearch for HttpKnowledgeSearch {
    async fn search(&self, query: &str) -> Result<Vec<KnowledgeHit>, KnowledgeError> {
        let response: SearchResponse = self
            .client
            .post(&self.endpoint)
            .json(&SearchRequest {
                query,
                limit: self.limit,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let mut hits = match response {
            SearchResponse::Hits(hits) => hits,
            SearchResponse::Wrapped { results } => results,
        };
        sort_hits(&mut hits);
        hits.truncate(self.limit);
        Ok(hits)
    }
}
