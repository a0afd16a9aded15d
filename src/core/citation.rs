//! 引用：`{documentId, chunkIndex}` 与文本格式 `[documentName | Chunk #N]`
//!
//! 解析、提取与剥离正文中的内联引用标记；chunkIndex 从 1 开始。

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static MARKER_RE: OnceLock<Regex> = OnceLock::new();

fn marker_re() -> &'static Regex {
    MARKER_RE.get_or_init(|| {
        Regex::new(r"\[\s*([^\[\]|]+?)\s*\|\s*[Cc]hunk\s*#\s*(\d+)\s*\]").expect("valid citation regex")
    })
}

/// 证据来源：文档 ID + 文档内块序号（1-based，同一文档跨多次导入保持稳定）
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: String,
    pub chunk_index: u32,
}

impl Citation {
    pub fn new(document_id: impl Into<String>, chunk_index: u32) -> Self {
        Self {
            document_id: document_id.into(),
            chunk_index,
        }
    }

    /// 引用是否结构合法（文档 ID 非空且块序号 ≥ 1）
    pub fn is_well_formed(&self) -> bool {
        !self.document_id.trim().is_empty() && self.chunk_index >= 1
    }

    /// 解析单个标记，如 `[fda_guidelines.txt | Chunk #3]`
    pub fn parse(marker: &str) -> Option<Self> {
        let caps = marker_re().captures(marker.trim())?;
        let whole = caps.get(0)?;
        if whole.as_str().len() != marker.trim().len() {
            return None;
        }
        Self::from_captures(&caps)
    }

    /// 提取文本中全部内联引用（按出现顺序，不去重）
    pub fn find_all(text: &str) -> Vec<Self> {
        marker_re()
            .captures_iter(text)
            .filter_map(|caps| Self::from_captures(&caps))
            .collect()
    }

    fn from_captures(caps: &regex::Captures<'_>) -> Option<Self> {
        let document_id = caps.get(1)?.as_str().trim().to_string();
        let chunk_index: u32 = caps.get(2)?.as_str().parse().ok()?;
        let citation = Self {
            document_id,
            chunk_index,
        };
        citation.is_well_formed().then_some(citation)
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} | Chunk #{}]", self.document_id, self.chunk_index)
    }
}

/// 文本中是否含内联引用标记
pub fn contains_marker(text: &str) -> bool {
    marker_re().is_match(text)
}

/// 剥离内联引用标记，并整理因此产生的多余空白与标点前空格（保留换行结构）
pub fn strip_markers(text: &str) -> String {
    retain_markers(text, |_| false)
}

/// 只保留 keep 返回 true 的内联引用标记，其余剥离
pub fn retain_markers(text: &str, keep: impl Fn(&Citation) -> bool) -> String {
    if !contains_marker(text) {
        return text.to_string();
    }
    let replaced = marker_re().replace_all(text, |caps: &regex::Captures<'_>| {
        match Citation::from_captures(caps) {
            Some(c) if keep(&c) => caps[0].to_string(),
            _ => String::new(),
        }
    });
    replaced
        .lines()
        .map(|line| {
            let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
            collapsed
                .replace(" .", ".")
                .replace(" ,", ",")
                .replace(" ;", ";")
                .replace(" :", ":")
                .replace("()", "")
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// 按首次出现顺序去重
pub fn dedup_citations(citations: impl IntoIterator<Item = Citation>) -> Vec<Citation> {
    let mut seen = std::collections::HashSet::new();
    citations
        .into_iter()
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_format() {
        let c = Citation::new("fda_guidelines.txt", 3);
        assert_eq!(c.to_string(), "[fda_guidelines.txt | Chunk #3]");
    }

    #[test]
    fn test_parse_marker() {
        let c = Citation::parse("[oncology_report.txt | Chunk #12]").unwrap();
        assert_eq!(c.document_id, "oncology_report.txt");
        assert_eq!(c.chunk_index, 12);
        assert!(Citation::parse("oncology_report.txt chunk 12").is_none());
    }

    #[test]
    fn test_parse_rejects_zero_chunk() {
        assert!(Citation::parse("[doc.txt | Chunk #0]").is_none());
    }

    #[test]
    fn test_find_all_in_order() {
        let text = "Timelines fell [a.txt | Chunk #2]. Costs rose [b.txt | Chunk #1] and [a.txt | Chunk #2].";
        let found = Citation::find_all(text);
        assert_eq!(found.len(), 3);
        assert_eq!(found[0], Citation::new("a.txt", 2));
        assert_eq!(dedup_citations(found).len(), 2);
    }

    #[test]
    fn test_strip_markers() {
        let text = "Dear team,\nTimelines fell [a.txt | Chunk #2] .\nRegards";
        let stripped = strip_markers(text);
        assert_eq!(stripped, "Dear team,\nTimelines fell.\nRegards");
        assert!(!contains_marker(&stripped));
    }

    #[test]
    fn test_retain_known_markers_only() {
        let text = "Costs rose [a.txt | Chunk #1] and fell [ghost.txt | Chunk #9].";
        let kept = retain_markers(text, |c| c.document_id == "a.txt");
        assert_eq!(kept, "Costs rose [a.txt | Chunk #1] and fell.");
    }
}
