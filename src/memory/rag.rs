//! 文档检索（RAG 的检索一侧）
//!
//! 只使用预先构建好的索引：JSON 数组 `[{"text": "...", "embedding": [...], "source": "..."}]`。
//! 查询时对 query 做嵌入，按余弦相似度取前 k 条。索引的构建不在本 crate 内完成。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::llm::EmbeddingProvider;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Index unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index malformed: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Index is empty")]
    Empty,

    #[error("Embedding failed: {0}")]
    Embedding(String),
}

/// 检索结果
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub text: String,
    pub source: Option<String>,
    pub score: f32,
}

/// 稳定的检索契约：按相关度降序返回最多 k 条
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalResult>, RetrievalError>;
}

/// 索引文件中的一条记录
#[derive(Debug, Clone, Deserialize)]
pub struct IndexEntry {
    pub text: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub source: Option<String>,
}

/// 预构建向量索引（只读）
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl VectorIndex {
    pub fn new(entries: Vec<IndexEntry>, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self, RetrievalError> {
        let entries: Vec<IndexEntry> = entries
            .into_iter()
            .filter(|e| !e.text.trim().is_empty() && !e.embedding.is_empty())
            .collect();
        if entries.is_empty() {
            return Err(RetrievalError::Empty);
        }
        Ok(Self { entries, embedder })
    }

    /// 从 JSON 文件加载索引
    pub fn load(path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self, RetrievalError> {
        let raw = std::fs::read_to_string(path)?;
        let entries: Vec<IndexEntry> = serde_json::from_str(&raw)?;
        let index = Self::new(entries, embedder)?;
        tracing::info!(path = %path.display(), entries = index.len(), "vector index loaded");
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Retriever for VectorIndex {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        if query_embedding.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, &IndexEntry)> = self
            .entries
            .iter()
            .map(|e| (cosine_similarity(&query_embedding, &e.embedding), e))
            .filter(|(score, _)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, e)| RetrievalResult {
                text: e.text.clone(),
                source: e.source.clone(),
                score,
            })
            .collect())
    }
}

/// 余弦相似度
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
