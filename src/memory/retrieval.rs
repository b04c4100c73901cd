//! 记忆检索（RAG 基线）
//!
//! 基线：按时间倒序取最近 N 条，相关度随排名递减（1/(rank+1)），不依赖任何外部服务。
//! 配置了嵌入提供方时，先按余弦相似度排序；嵌入失败或候选均无向量时退回基线。
//! 所有存储访问都经过 memory 熔断器。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::llm::{cosine_similarity, EmbeddingProvider};
use crate::resilience::{BreakerError, CircuitBreaker};

use super::record::{MemoryRecord, NewMemory};
use super::store::{MemoryError, MemoryQuery, MemoryStore};

/// 片段最大字符数
const SNIPPET_CHARS: usize = 200;

/// 语义检索时的候选池倍数
const CANDIDATE_FACTOR: usize = 4;

/// 带相关度的检索结果
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    pub relevance: f32,
    pub snippet: String,
}

/// 检索范围
#[derive(Debug, Clone)]
pub struct RetrievalScope {
    pub user_id: String,
    pub session_id: Option<String>,
}

/// 截断为片段（按字符，不会切断 UTF-8）
pub fn snippet(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= SNIPPET_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(SNIPPET_CHARS).collect();
        format!("{}…", cut)
    }
}

pub struct MemoryRetriever {
    store: Arc<dyn MemoryStore>,
    breaker: Arc<CircuitBreaker>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    exclusion_window: Duration,
}

impl MemoryRetriever {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        breaker: Arc<CircuitBreaker>,
        exclusion_window: Duration,
    ) -> Self {
        Self {
            store,
            breaker,
            embedder: None,
            exclusion_window,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    /// 写入一条记录；有嵌入提供方时先计算向量（失败不影响写入）
    pub async fn save(&self, mut memory: NewMemory) -> Result<String, BreakerError<MemoryError>> {
        if memory.embedding.is_none() {
            if let Some(embedder) = &self.embedder {
                match embedder.embed(&memory.content).await {
                    Ok(v) if !v.is_empty() => memory.embedding = Some(v),
                    Ok(_) => {}
                    Err(e) => tracing::debug!(error = %e, "embedding at save time failed"),
                }
            }
        }
        let store = Arc::clone(&self.store);
        self.breaker.call(|| async move { store.save(memory).await }).await
    }

    /// 检索与 query 相关的记录，最多 limit 条，按相关度降序
    pub async fn search(
        &self,
        query: &str,
        scope: &RetrievalScope,
        limit: usize,
    ) -> Result<Vec<ScoredMemory>, BreakerError<MemoryError>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let pool = if self.embedder.is_some() {
            limit * CANDIDATE_FACTOR
        } else {
            limit
        };
        let mut q = MemoryQuery::new(scope.user_id.clone(), pool).excluding_last(self.exclusion_window);
        if let Some(session) = &scope.session_id {
            q = q.in_session(session.clone());
        }

        let store = Arc::clone(&self.store);
        let candidates = self.breaker.call(|| async move { store.query(&q).await }).await?;

        if let Some(ranked) = self.rank_semantic(query, &candidates, limit).await {
            return Ok(ranked);
        }
        Ok(rank_by_recency(candidates, limit))
    }

    async fn rank_semantic(
        &self,
        query: &str,
        candidates: &[MemoryRecord],
        limit: usize,
    ) -> Option<Vec<ScoredMemory>> {
        let embedder = self.embedder.as_ref()?;
        if !candidates.iter().any(|r| r.embedding.is_some()) {
            return None;
        }
        let query_vec = match embedder.embed(query).await {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, falling back to recency ranking");
                return None;
            }
        };

        let mut scored: Vec<ScoredMemory> = candidates
            .iter()
            .map(|r| {
                let relevance = r
                    .embedding
                    .as_deref()
                    .map(|e| cosine_similarity(&query_vec, e))
                    .unwrap_or(0.0);
                ScoredMemory {
                    snippet: snippet(&r.content),
                    record: r.clone(),
                    relevance,
                }
            })
            .collect();
        // 稳定排序：相似度相同时保持时间倒序
        scored.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Some(scored)
    }
}

/// 基线排序：输入已是时间倒序，相关度 1/(rank+1)
pub fn rank_by_recency(records: Vec<MemoryRecord>, limit: usize) -> Vec<ScoredMemory> {
    records
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(rank, record)| ScoredMemory {
            snippet: snippet(&record.content),
            relevance: 1.0 / (rank as f32 + 1.0),
            record,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::memory::store::InMemoryMemoryStore;
    use crate::resilience::BreakerConfig;
    use async_trait::async_trait;

    struct KeywordEmbedder;

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
            let t = text.to_lowercase();
            Ok(vec![
                if t.contains("turin") { 1.0 } else { 0.0 },
                if t.contains("rome") { 1.0 } else { 0.0 },
                0.1,
            ])
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            Err(LlmError::Request("offline".into()))
        }
    }

    fn scope() -> RetrievalScope {
        RetrievalScope {
            user_id: "u1".into(),
            session_id: Some("s1".into()),
        }
    }

    fn retriever() -> MemoryRetriever {
        MemoryRetriever::new(
            Arc::new(InMemoryMemoryStore::default()),
            Arc::new(CircuitBreaker::new("memory", BreakerConfig::storage())),
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn test_recency_ranking_scores_decrease() {
        let r = retriever();
        for text in ["a", "b", "c"] {
            r.save(NewMemory::turn("u1", "s1", text)).await.unwrap();
        }
        let out = r.search("anything", &scope(), 2).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].record.content, "c");
        assert!(out[0].relevance > out[1].relevance);
    }

    #[tokio::test]
    async fn test_semantic_ranking_when_embedder_present() {
        let r = retriever().with_embedder(Arc::new(KeywordEmbedder));
        r.save(NewMemory::turn("u1", "s1", "feasibility in Turin")).await.unwrap();
        r.save(NewMemory::turn("u1", "s1", "feasibility in Rome")).await.unwrap();
        let out = r.search("what about turin?", &scope(), 1).await.unwrap();
        assert_eq!(out[0].record.content, "feasibility in Turin");
    }

    #[tokio::test]
    async fn test_embedding_failure_falls_back_to_recency() {
        let r = retriever().with_embedder(Arc::new(FailingEmbedder));
        r.save(NewMemory::turn("u1", "s1", "older")).await.unwrap();
        r.save(NewMemory::turn("u1", "s1", "newer")).await.unwrap();
        let out = r.search("q", &scope(), 5).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].record.content, "newer");
    }

    #[test]
    fn test_snippet_truncates_on_char_boundary() {
        let long = "è".repeat(300);
        let s = snippet(&long);
        assert_eq!(s.chars().count(), SNIPPET_CHARS + 1);
    }
}
