//! 文档分块
//!
//! 分隔符优先、UTF-8 安全的定长分块，带重叠。块序号从 1 开始且对同一文本确定，
//! 因此同一文档重复导入后引用 `[doc | Chunk #N]` 仍指向同一段内容。

/// 文档块
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub document_id: String,
    /// 文档内序号，从 1 开始
    pub chunk_index: u32,
    pub text: String,
}

/// 分块策略
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// 目标块大小（字符数）
    pub chunk_size: usize,
    /// 块之间的重叠（字符数）
    pub chunk_overlap: usize,
    /// 分隔符优先级（从高到低）
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            separators: vec![
                "\n\n".to_string(),
                "\n".to_string(),
                "。".to_string(),
                ". ".to_string(),
                "！".to_string(),
                "？".to_string(),
                "! ".to_string(),
                "? ".to_string(),
                " ".to_string(),
            ],
        }
    }
}

impl ChunkingConfig {
    pub fn with_size(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
            ..Self::default()
        }
    }
}

/// 文档分块器
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// 将文档分割为块（UTF-8 安全）
    pub fn chunk(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let chars: Vec<char> = text.chars().collect();
        let total_chars = chars.len();

        let mut current_idx = 0;
        let mut chunk_index = 1u32;

        while current_idx < total_chars {
            let target_end = (current_idx + self.config.chunk_size).min(total_chars);
            let mut actual_end = target_end;

            // 不是文档末尾时，尽量在分隔符处断开
            if target_end < total_chars {
                let slice: String = chars[current_idx..target_end].iter().collect();
                for sep in &self.config.separators {
                    if let Some(pos) = slice.rfind(sep.as_str()) {
                        let chars_to_sep = slice[..pos].chars().count() + sep.chars().count();
                        // 分隔符太靠前时，块会过小，换下一个分隔符
                        if chars_to_sep > self.config.chunk_overlap {
                            actual_end = current_idx + chars_to_sep;
                            break;
                        }
                    }
                }
            }

            if actual_end <= current_idx {
                actual_end = (current_idx + 1).min(total_chars);
            }

            let chunk_text: String = chars[current_idx..actual_end].iter().collect();
            let trimmed = chunk_text.trim();
            if !trimmed.is_empty() {
                chunks.push(Chunk {
                    document_id: document_id.to_string(),
                    chunk_index,
                    text: trimmed.to_string(),
                });
                chunk_index += 1;
            }

            if actual_end >= total_chars {
                break;
            }

            let overlap = self.config.chunk_overlap.min(actual_end - current_idx);
            let next_start = actual_end.saturating_sub(overlap);
            current_idx = if next_start > current_idx {
                next_start
            } else {
                actual_end
            };
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_indices_are_one_based_and_sequential() {
        let chunker = Chunker::new(ChunkingConfig::with_size(50, 10));
        let text = "First paragraph about approvals.\n\nSecond paragraph about oncology trials.\n\nThird paragraph about pricing pressure.";
        let chunks = chunker.chunk("doc.txt", text);
        assert!(chunks.len() >= 2);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as u32 + 1);
            assert_eq!(c.document_id, "doc.txt");
            assert!(!c.text.is_empty());
        }
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let chunker = Chunker::default();
        let text = "Sentence one. ".repeat(200);
        assert_eq!(chunker.chunk("a", &text), chunker.chunk("a", &text));
    }

    #[test]
    fn test_chunking_utf8() {
        let chunker = Chunker::new(ChunkingConfig::with_size(8, 2));
        let chunks = chunker.chunk("zh", "肿瘤药物审批时间缩短。临床试验成本上升。");
        assert!(!chunks.is_empty());
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert!(joined.contains("审批"));
    }

    #[test]
    fn test_short_document_single_chunk() {
        let chunks = Chunker::default().chunk("s", "  Short text.  ");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Short text.");
        assert!(Chunker::default().chunk("e", "").is_empty());
    }
}
