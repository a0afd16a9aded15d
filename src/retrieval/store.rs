//! 内存证据库
//!
//! 关键词打分：查询实义词被块覆盖的比例；启用嵌入时再按余弦相似度排一次，两路结果以 RRF 融合。
//! 低于阈值的块不会返回，所以查询可以合法地得到空结果（即研究缺口）。

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::Citation;
use crate::llm::embedding::cosine_similarity;
use crate::llm::EmbeddingProvider;
use crate::retrieval::index::StoredChunk;
use crate::retrieval::tokenizer;
use crate::retrieval::{Chunk, Chunker, EvidenceStore, RetrievalError, SearchHit};

/// RRF 常数
const RRF_K: f32 = 60.0;

/// 检索阈值
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// 关键词覆盖率下限（0-1）
    pub min_keyword_score: f32,
    /// 余弦相似度下限
    pub min_similarity: f32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            min_keyword_score: 0.2,
            min_similarity: 0.3,
        }
    }
}

struct Entry {
    chunk: Chunk,
    tokens: HashSet<String>,
    embedding: Option<Vec<f32>>,
}

pub struct InMemoryEvidenceStore {
    entries: Vec<Entry>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    options: StoreOptions,
}

impl Default for InMemoryEvidenceStore {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

impl InMemoryEvidenceStore {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            entries: Vec::new(),
            embedder: None,
            options,
        }
    }

    /// 由索引中读出的块构建
    pub fn from_chunks(chunks: Vec<StoredChunk>, options: StoreOptions) -> Self {
        let mut store = Self::new(options);
        for (chunk, embedding) in chunks {
            store.add_chunk(chunk, embedding);
        }
        store
    }

    /// 查询时用于向量打分的嵌入提供方（块必须已有嵌入）
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn add_chunk(&mut self, chunk: Chunk, embedding: Option<Vec<f32>>) {
        let tokens = tokenizer::content_set(&chunk.text);
        self.entries.retain(|e| {
            !(e.chunk.document_id == chunk.document_id && e.chunk.chunk_index == chunk.chunk_index)
        });
        self.entries.push(Entry {
            chunk,
            tokens,
            embedding,
        });
    }

    /// 分块并加入一个文档（替换同 ID 文档的旧块），返回块数
    pub fn add_document(&mut self, document_id: &str, text: &str, chunker: &Chunker) -> usize {
        self.entries.retain(|e| e.chunk.document_id != document_id);
        let chunks = chunker.chunk(document_id, text);
        let n = chunks.len();
        for chunk in chunks {
            self.add_chunk(chunk, None);
        }
        n
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (entry 下标, 覆盖率)，按分数降序
    fn keyword_ranking(&self, query: &str) -> Vec<(usize, f32)> {
        let query_tokens = tokenizer::content_set(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, tokenizer::coverage(&query_tokens, &e.tokens)))
            .filter(|(_, score)| *score >= self.options.min_keyword_score && *score > 0.0)
            .collect();
        self.sort_ranking(&mut scored);
        scored
    }

    async fn vector_ranking(&self, query: &str) -> Result<Vec<(usize, f32)>, RetrievalError> {
        let Some(embedder) = &self.embedder else {
            return Ok(Vec::new());
        };
        if !self.entries.iter().any(|e| e.embedding.is_some()) {
            return Ok(Vec::new());
        }
        let query_embedding = match embedder.embed(query).await {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => return Ok(Vec::new()),
            Err(e) if e.is_fatal() => return Err(RetrievalError::Embedding(e)),
            Err(e) => {
                tracing::warn!("query embedding failed, using keyword ranking only: {}", e);
                return Ok(Vec::new());
            }
        };
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| {
                e.embedding
                    .as_ref()
                    .map(|emb| (i, cosine_similarity(&query_embedding, emb)))
            })
            .filter(|(_, score)| *score >= self.options.min_similarity)
            .collect();
        self.sort_ranking(&mut scored);
        Ok(scored)
    }

    /// 分数降序；同分按 (文档, 块序号) 升序，保证结果确定
    fn sort_ranking(&self, scored: &mut [(usize, f32)]) {
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then_with(|| {
                let ca = &self.entries[a.0].chunk;
                let cb = &self.entries[b.0].chunk;
                (ca.document_id.as_str(), ca.chunk_index)
                    .cmp(&(cb.document_id.as_str(), cb.chunk_index))
            })
        });
    }

    fn hit(&self, idx: usize, score: f32) -> SearchHit {
        let chunk = &self.entries[idx].chunk;
        SearchHit {
            text: chunk.text.clone(),
            document_id: chunk.document_id.clone(),
            chunk_index: chunk.chunk_index,
            score,
        }
    }
}

#[async_trait]
impl EvidenceStore for InMemoryEvidenceStore {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, RetrievalError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let keyword = self.keyword_ranking(query);
        let vector = self.vector_ranking(query).await?;

        let mut ranked = if vector.is_empty() {
            keyword
        } else {
            // 合并结果（RRF - Reciprocal Rank Fusion）
            let mut scores: HashMap<usize, f32> = HashMap::new();
            for (rank, (idx, _)) in vector.iter().take(k * 2).enumerate() {
                *scores.entry(*idx).or_insert(0.0) += 1.0 / (RRF_K + rank as f32);
            }
            for (rank, (idx, _)) in keyword.iter().take(k * 2).enumerate() {
                *scores.entry(*idx).or_insert(0.0) += 1.0 / (RRF_K + rank as f32);
            }
            let mut fused: Vec<(usize, f32)> = scores.into_iter().collect();
            self.sort_ranking(&mut fused);
            fused
        };

        ranked.truncate(k);
        Ok(ranked
            .into_iter()
            .map(|(idx, score)| self.hit(idx, score))
            .collect())
    }

    async fn contains(&self, citation: &Citation) -> bool {
        self.entries.iter().any(|e| {
            e.chunk.document_id == citation.document_id
                && e.chunk.chunk_index == citation.chunk_index
        })
    }

    fn chunk_count(&self) -> usize {
        self.entries.len()
    }
}
