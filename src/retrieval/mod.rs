//! 证据检索层：分块、分词、SQLite 索引、内存检索与懒加载的共享句柄
//!
//! 对上只暴露 EvidenceStore::search(query, k)，返回带 `{documentId, chunkIndex}` 的命中；
//! 打分算法（关键词覆盖率 + 可选向量 RRF 融合）不属于编排契约的一部分。

pub mod chunker;
pub mod index;
pub mod loader;
pub mod provider;
pub mod store;
pub mod tokenizer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::Citation;
use crate::llm::LlmError;

pub use chunker::{Chunk, Chunker, ChunkingConfig};
pub use index::{EvidenceIndex, IndexStats};
pub use loader::{ingest_directory, load_documents, Document, IngestReport};
pub use provider::{IndexStoreProvider, StaticStoreProvider, StoreProvider};
pub use store::{InMemoryEvidenceStore, StoreOptions};

/// 检索命中
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    pub document_id: String,
    pub chunk_index: u32,
    /// 越高越相关
    pub score: f32,
}

impl SearchHit {
    pub fn citation(&self) -> Citation {
        Citation::new(self.document_id.clone(), self.chunk_index)
    }
}

/// 检索层错误
#[derive(Error, Debug, Clone)]
pub enum RetrievalError {
    /// 索引文件不存在或为空（需先运行 copilot-ingest）
    #[error("evidence index not found at {0} (run copilot-ingest first)")]
    IndexMissing(String),

    #[error("index storage error: {0}")]
    Storage(String),

    #[error("document loading error: {0}")]
    Io(String),

    #[error("embedding error: {0}")]
    Embedding(LlmError),

    /// 暂时不可用，可降级为缺口
    #[error("evidence store unavailable: {0}")]
    Unavailable(String),
}

impl RetrievalError {
    /// 索引缺失、存储损坏或嵌入凭据问题：终止运行
    pub fn is_fatal(&self) -> bool {
        match self {
            RetrievalError::IndexMissing(_)
            | RetrievalError::Storage(_)
            | RetrievalError::Io(_) => true,
            RetrievalError::Embedding(e) => e.is_fatal(),
            RetrievalError::Unavailable(_) => false,
        }
    }
}

impl From<rusqlite::Error> for RetrievalError {
    fn from(err: rusqlite::Error) -> Self {
        RetrievalError::Storage(err.to_string())
    }
}

/// 证据库客户端：多次运行并发共享
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// 按相关度降序返回至多 k 条命中；没有足够相关的内容时返回空列表
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, RetrievalError>;

    /// 引用是否指向库中真实存在的块
    async fn contains(&self, citation: &Citation) -> bool;

    /// 块总数
    fn chunk_count(&self) -> usize;
}
