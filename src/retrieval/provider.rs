//! 证据库句柄提供方
//!
//! IndexStoreProvider 在第一次需要时才从 SQLite 索引加载证据库（tokio OnceCell，整个进程只初始化一次），
//! 之后所有运行共享同一个只读句柄；StaticStoreProvider 直接持有现成的库（测试、评测）。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::llm::EmbeddingProvider;
use crate::retrieval::{EvidenceIndex, EvidenceStore, InMemoryEvidenceStore, RetrievalError, StoreOptions};

#[async_trait]
pub trait StoreProvider: Send + Sync {
    /// 获取共享证据库；初始化失败（索引缺失等）为致命错误
    async fn store(&self) -> Result<Arc<dyn EvidenceStore>, RetrievalError>;
}

/// 直接持有证据库
pub struct StaticStoreProvider {
    store: Arc<dyn EvidenceStore>,
}

impl StaticStoreProvider {
    pub fn new(store: Arc<dyn EvidenceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StoreProvider for StaticStoreProvider {
    async fn store(&self) -> Result<Arc<dyn EvidenceStore>, RetrievalError> {
        Ok(self.store.clone())
    }
}

/// 懒加载 SQLite 索引
pub struct IndexStoreProvider {
    index_path: PathBuf,
    options: StoreOptions,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    cell: OnceCell<Arc<dyn EvidenceStore>>,
}

impl IndexStoreProvider {
    pub fn new(index_path: impl Into<PathBuf>, options: StoreOptions) -> Self {
        Self {
            index_path: index_path.into(),
            options,
            embedder: None,
            cell: OnceCell::new(),
        }
    }

    pub fn with_embedder(mut self, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        self.embedder = embedder;
        self
    }

    /// 是否已完成初始化
    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    async fn load(&self) -> Result<Arc<dyn EvidenceStore>, RetrievalError> {
        let path = self.index_path.clone();
        let chunks = tokio::task::spawn_blocking(move || {
            let index = EvidenceIndex::open_existing(&path)?;
            index.load_all()
        })
        .await
        .map_err(|e| RetrievalError::Storage(format!("index load task failed: {e}")))??;

        if chunks.is_empty() {
            return Err(RetrievalError::IndexMissing(format!(
                "{} (index is empty)",
                self.index_path.display()
            )));
        }

        let mut store = InMemoryEvidenceStore::from_chunks(chunks, self.options);
        if let Some(embedder) = &self.embedder {
            store = store.with_embedder(embedder.clone());
        }
        tracing::info!(
            path = %self.index_path.display(),
            chunks = store.len(),
            "evidence store loaded"
        );
        Ok(Arc::new(store))
    }
}

#[async_trait]
impl StoreProvider for IndexStoreProvider {
    async fn store(&self) -> Result<Arc<dyn EvidenceStore>, RetrievalError> {
        self.cell
            .get_or_try_init(|| self.load())
            .await
            .map(Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::Chunk;

    #[tokio::test]
    async fn test_missing_index_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let provider = IndexStoreProvider::new(dir.path().join("missing.db"), StoreOptions::default());
        let err = provider.store().await.err().unwrap();
        assert!(err.is_fatal());
        assert!(!provider.is_initialized());
    }

    #[tokio::test]
    async fn test_index_loaded_once_and_shared() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evidence.db");
        let mut index = EvidenceIndex::open(&path).unwrap();
        index
            .upsert_document(
                "a.txt",
                "a.txt",
                &[Chunk {
                    document_id: "a.txt".into(),
                    chunk_index: 1,
                    text: "Oncology approvals grew.".into(),
                }],
                &[],
            )
            .unwrap();
        drop(index);

        let provider = IndexStoreProvider::new(&path, StoreOptions::default());
        let first = provider.store().await.unwrap();
        let second = provider.store().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.chunk_count(), 1);
    }
}
