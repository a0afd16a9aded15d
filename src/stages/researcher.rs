//! Researcher：逐个子问题检索证据，汇总为去重后的证据池
//!
//! 没有命中的子问题记为缺口并附 "Not found in sources" 说明；瞬时检索错误同样记为缺口，
//! 索引缺失等致命错误直接终止运行。

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;

use crate::core::{Citation, EvidenceItem, PipelineError, ResearchNote, ResearchNotes, SubQuestion};
use crate::llm::Usage;
use crate::observability::{Measured, StageError, StageResult};
use crate::retrieval::{EvidenceStore, RetrievalError, SearchHit, StoreProvider};

pub const NOT_FOUND_NOTE: &str = "Not found in sources.";

/// 研究结果：按子问题的笔记 + 证据池
#[derive(Debug, Clone, Default)]
pub struct ResearchOutput {
    pub notes: ResearchNotes,
    /// 按子问题顺序、引用去重
    pub evidence: Vec<EvidenceItem>,
}

/// 检索阶段
pub struct Researcher {
    provider: Arc<dyn StoreProvider>,
    top_k: usize,
    parallel: bool,
}

impl Researcher {
    pub fn new(provider: Arc<dyn StoreProvider>, top_k: usize) -> Self {
        Self {
            provider,
            top_k: top_k.max(1),
            parallel: false,
        }
    }

    /// 子问题并发检索（聚合顺序不变）
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub async fn research(&self, plan: &[SubQuestion]) -> StageResult<ResearchOutput> {
        let input_size: u64 = plan.iter().map(|q| q.text.chars().count() as u64).sum();
        if plan.is_empty() {
            return Ok(Measured::new(ResearchOutput::default(), Usage::new(0, 0)));
        }

        let store = self
            .provider
            .store()
            .await
            .map_err(|e| StageError::new(PipelineError::from(e), Usage::new(input_size, 0)))?;

        let results: Vec<Result<Vec<SearchHit>, RetrievalError>> = if self.parallel {
            join_all(plan.iter().map(|q| store.search(&q.text, self.top_k))).await
        } else {
            let mut out = Vec::with_capacity(plan.len());
            for q in plan {
                out.push(store.search(&q.text, self.top_k).await);
            }
            out
        };

        let mut output = ResearchOutput::default();
        let mut seen: HashSet<Citation> = HashSet::new();
        for (question, result) in plan.iter().zip(results) {
            let note = match result {
                Ok(hits) => note_from_hits(question, hits, store.as_ref()).await,
                Err(e) if e.is_fatal() => {
                    let output_size = evidence_size(&output.evidence);
                    return Err(StageError::new(e.into(), Usage::new(input_size, output_size)));
                }
                Err(e) => {
                    tracing::warn!(question = question.index, "retrieval failed, recording gap: {}", e);
                    gap_note(question, &format!("{NOT_FOUND_NOTE} Retrieval error: {e}."))
                }
            };
            for item in &note.evidence {
                if seen.insert(item.citation.clone()) {
                    output.evidence.push(item.clone());
                }
            }
            output.notes.insert(question.index, note);
        }

        let gaps = output.notes.values().filter(|n| n.gap).count();
        tracing::info!(
            questions = plan.len(),
            gaps,
            evidence = output.evidence.len(),
            "research complete"
        );
        let output_size = evidence_size(&output.evidence);
        Ok(Measured::new(output, Usage::new(input_size, output_size)))
    }
}

fn evidence_size(evidence: &[EvidenceItem]) -> u64 {
    evidence.iter().map(|e| e.text.chars().count() as u64).sum()
}

fn gap_note(question: &SubQuestion, note: &str) -> ResearchNote {
    ResearchNote {
        question: question.clone(),
        evidence: Vec::new(),
        gap: true,
        note: Some(note.to_string()),
    }
}

/// 命中转为证据；丢弃结构不合法或库中不存在的引用
async fn note_from_hits(
    question: &SubQuestion,
    hits: Vec<SearchHit>,
    store: &dyn EvidenceStore,
) -> ResearchNote {
    let mut evidence = Vec::with_capacity(hits.len());
    for hit in hits {
        let citation = hit.citation();
        if !citation.is_well_formed() || !store.contains(&citation).await {
            tracing::warn!(citation = %citation, "discarding hit with unknown citation");
            continue;
        }
        evidence.push(EvidenceItem {
            text: hit.text,
            citation,
            relevance_score: hit.score,
        });
    }

    if evidence.is_empty() {
        return gap_note(
            question,
            &format!(
                "{NOT_FOUND_NOTE} Additional information needed: {}",
                question.text
            ),
        );
    }
    ResearchNote {
        question: question.clone(),
        evidence,
        gap: false,
        note: None,
    }
}
