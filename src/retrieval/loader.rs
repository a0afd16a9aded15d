//! 文档导入：发现数据目录下的 *.txt，分块、（可选）嵌入后写入 SQLite 索引
//!
//! 文档 ID 即文件名；按文件名排序处理，保证块序号与导入顺序无关。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::llm::EmbeddingProvider;
use crate::retrieval::{Chunker, EvidenceIndex, RetrievalError};

/// 待导入的原始文档
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub path: PathBuf,
    pub text: String,
}

/// 导入结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub embedded_chunks: usize,
}

/// 读取数据目录下全部 .txt 文件；目录中没有文档时报错
pub fn load_documents(data_dir: &Path) -> Result<Vec<Document>, RetrievalError> {
    let pattern = data_dir.join("*.txt");
    let pattern = pattern.to_string_lossy();
    let paths = glob::glob(&pattern).map_err(|e| RetrievalError::Io(e.to_string()))?;

    let mut files: Vec<PathBuf> = paths.filter_map(Result::ok).filter(|p| p.is_file()).collect();
    files.sort();

    let mut docs = Vec::with_capacity(files.len());
    for path in files {
        let Some(id) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        let text = std::fs::read_to_string(&path)
            .map_err(|e| RetrievalError::Io(format!("{}: {}", path.display(), e)))?;
        docs.push(Document { id, path, text });
    }

    if docs.is_empty() {
        return Err(RetrievalError::Io(format!(
            "no .txt files found in {}",
            data_dir.display()
        )));
    }
    Ok(docs)
}

/// 导入整个目录到索引；嵌入失败的块只记录告警，不嵌入（检索退化为关键词）
pub async fn ingest_directory(
    data_dir: &Path,
    index_path: &Path,
    chunker: &Chunker,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
) -> Result<IngestReport, RetrievalError> {
    let docs = load_documents(data_dir)?;
    tracing::info!(documents = docs.len(), dir = %data_dir.display(), "loading documents");

    let mut prepared = Vec::with_capacity(docs.len());
    let mut report = IngestReport::default();
    for doc in docs {
        let chunks = chunker.chunk(&doc.id, &doc.text);
        let mut embeddings = Vec::with_capacity(chunks.len());
        if let Some(embedder) = &embedder {
            for chunk in &chunks {
                match embedder.embed(&chunk.text).await {
                    Ok(v) if !v.is_empty() => {
                        report.embedded_chunks += 1;
                        embeddings.push(Some(v));
                    }
                    Ok(_) => embeddings.push(None),
                    Err(e) if e.is_fatal() => return Err(RetrievalError::Embedding(e)),
                    Err(e) => {
                        tracing::warn!(
                            document = %doc.id,
                            chunk = chunk.chunk_index,
                            "embedding failed, chunk stored without vector: {}",
                            e
                        );
                        embeddings.push(None);
                    }
                }
            }
        }
        tracing::debug!(document = %doc.id, chunks = chunks.len(), "chunked");
        report.documents += 1;
        report.chunks += chunks.len();
        prepared.push((doc, chunks, embeddings));
    }

    let index_path = index_path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), RetrievalError> {
        let mut index = EvidenceIndex::open(&index_path)?;
        for (doc, chunks, embeddings) in &prepared {
            index.upsert_document(
                &doc.id,
                &doc.path.to_string_lossy(),
                chunks,
                embeddings,
            )?;
        }
        Ok(())
    })
    .await
    .map_err(|e| RetrievalError::Storage(format!("ingest task failed: {e}")))??;

    tracing::info!(
        documents = report.documents,
        chunks = report.chunks,
        embedded = report.embedded_chunks,
        "ingestion complete"
    );
    Ok(report)
}
