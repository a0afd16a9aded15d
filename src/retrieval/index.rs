//! 证据索引持久化（SQLite）
//!
//! 两张表：documents（文档 ID、来源路径、导入时间）与 chunks（文档内 1-based 序号、文本、可选嵌入 JSON）。
//! 同一文档重新导入时在一个事务内替换其全部块。所有操作都是同步的，异步上下文中经 spawn_blocking 调用。

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::retrieval::{Chunk, RetrievalError};

/// 索引统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub documents: usize,
    pub chunks: usize,
    pub embedded_chunks: usize,
}

/// 一个块及其（可选的）嵌入向量
pub type StoredChunk = (Chunk, Option<Vec<f32>>);

pub struct EvidenceIndex {
    conn: Connection,
}

impl EvidenceIndex {
    /// 打开（必要时创建）索引文件
    pub fn open(path: &Path) -> Result<Self, RetrievalError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RetrievalError::Io(format!("{}: {}", parent.display(), e)))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let index = Self { conn };
        index.ensure_schema()?;
        Ok(index)
    }

    /// 只读场景：文件不存在时返回 IndexMissing，而不是创建一个空库
    pub fn open_existing(path: &Path) -> Result<Self, RetrievalError> {
        if !path.exists() {
            return Err(RetrievalError::IndexMissing(path.display().to_string()));
        }
        Self::open(path)
    }

    /// 内存索引（测试用）
    pub fn open_in_memory() -> Result<Self, RetrievalError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let index = Self { conn };
        index.ensure_schema()?;
        Ok(index)
    }

    fn ensure_schema(&self) -> Result<(), RetrievalError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
              document_id TEXT PRIMARY KEY,
              source_path TEXT NOT NULL,
              ingested_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
              document_id TEXT NOT NULL,
              chunk_index INTEGER NOT NULL,
              text TEXT NOT NULL,
              embedding TEXT,
              PRIMARY KEY (document_id, chunk_index),
              FOREIGN KEY (document_id) REFERENCES documents(document_id) ON DELETE CASCADE
            );
            ",
        )?;
        Ok(())
    }

    /// 写入 / 替换一个文档的全部块；embeddings 为空或与 chunks 等长
    pub fn upsert_document(
        &mut self,
        document_id: &str,
        source_path: &str,
        chunks: &[Chunk],
        embeddings: &[Option<Vec<f32>>],
    ) -> Result<usize, RetrievalError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id],
        )?;
        tx.execute(
            "
            INSERT INTO documents(document_id, source_path, ingested_at)
            VALUES(?1, ?2, ?3)
            ON CONFLICT(document_id) DO UPDATE SET
              source_path = excluded.source_path,
              ingested_at = excluded.ingested_at
            ",
            params![document_id, source_path, Utc::now().to_rfc3339()],
        )?;
        {
            let mut statement = tx.prepare(
                "INSERT INTO chunks(document_id, chunk_index, text, embedding) VALUES(?1, ?2, ?3, ?4)",
            )?;
            for (i, chunk) in chunks.iter().enumerate() {
                let embedding = embeddings
                    .get(i)
                    .and_then(|e| e.as_ref())
                    .map(serde_json::to_string)
                    .transpose()
                    .map_err(|e| RetrievalError::Storage(e.to_string()))?;
                statement.execute(params![
                    document_id,
                    chunk.chunk_index,
                    chunk.text,
                    embedding
                ])?;
            }
        }
        tx.commit()?;
        Ok(chunks.len())
    }

    /// 读取全部块（按文档 ID、块序号排序）
    pub fn load_all(&self) -> Result<Vec<StoredChunk>, RetrievalError> {
        let mut statement = self.conn.prepare(
            "SELECT document_id, chunk_index, text, embedding FROM chunks ORDER BY document_id, chunk_index",
        )?;
        let rows = statement.query_map([], |row| {
            let chunk = Chunk {
                document_id: row.get(0)?,
                chunk_index: row.get(1)?,
                text: row.get(2)?,
            };
            let embedding: Option<String> = row.get(3)?;
            Ok((chunk, embedding))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (chunk, embedding) = row?;
            let embedding = match embedding {
                Some(json) => match serde_json::from_str::<Vec<f32>>(&json) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        tracing::warn!(
                            document = %chunk.document_id,
                            chunk = chunk.chunk_index,
                            "ignoring malformed embedding: {}",
                            e
                        );
                        None
                    }
                },
                None => None,
            };
            out.push((chunk, embedding));
        }
        Ok(out)
    }

    /// 某个块是否存在
    pub fn contains(&self, document_id: &str, chunk_index: u32) -> Result<bool, RetrievalError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM chunks WHERE document_id = ?1 AND chunk_index = ?2",
                params![document_id, chunk_index],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn stats(&self) -> Result<IndexStats, RetrievalError> {
        let documents: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        let chunks: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        let embedded: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(IndexStats {
            documents: documents as usize,
            chunks: chunks as usize,
            embedded_chunks: embedded as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(doc: &str, idx: u32, text: &str) -> Chunk {
        Chunk {
            document_id: doc.to_string(),
            chunk_index: idx,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_reingest_replaces_chunks() {
        let mut index = EvidenceIndex::open_in_memory().unwrap();
        index
            .upsert_document(
                "a.txt",
                "data/a.txt",
                &[chunk("a.txt", 1, "one"), chunk("a.txt", 2, "two")],
                &[],
            )
            .unwrap();
        index
            .upsert_document("a.txt", "data/a.txt", &[chunk("a.txt", 1, "uno")], &[])
            .unwrap();

        let all = index.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0.text, "uno");
        assert!(index.contains("a.txt", 1).unwrap());
        assert!(!index.contains("a.txt", 2).unwrap());
        assert_eq!(index.stats().unwrap().documents, 1);
    }

    #[test]
    fn test_embeddings_round_trip_through_json() {
        let mut index = EvidenceIndex::open_in_memory().unwrap();
        index
            .upsert_document(
                "b.txt",
                "b.txt",
                &[chunk("b.txt", 1, "x"), chunk("b.txt", 2, "y")],
                &[Some(vec![0.5, -1.0]), None],
            )
            .unwrap();
        let all = index.load_all().unwrap();
        assert_eq!(all[0].1, Some(vec![0.5, -1.0]));
        assert_eq!(all[1].1, None);
        assert_eq!(index.stats().unwrap().embedded_chunks, 1);
    }

    #[test]
    fn test_open_existing_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = EvidenceIndex::open_existing(&dir.path().join("none.db"))
            .err()
            .unwrap();
        assert!(matches!(err, RetrievalError::IndexMissing(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.db");
        let mut index = EvidenceIndex::open(&path).unwrap();
        index
            .upsert_document("c.txt", "c.txt", &[chunk("c.txt", 1, "z")], &[])
            .unwrap();
        drop(index);
        let reopened = EvidenceIndex::open_existing(&path).unwrap();
        assert_eq!(reopened.stats().unwrap().chunks, 1);
    }
}
