//! 声明与证据的比对
//!
//! 支持：声明的全部实义词（取词干后）都出现在同一条证据句中，数字一致，否定极性一致；
//! 只允许停用词上的出入。整句找不到支撑时按子句拆开，每个子句都要各自有支撑。
//! 矛盾：与声明最接近的证据句覆盖率达到阈值，但否定极性相反、数字被换掉，
//! 或声明中未被覆盖的词正好占了证据句里另一个词的位置（"reduced" 换成 "increased"）。
//! 结论优先级：支持 > 矛盾 > 无依据。

use std::collections::HashSet;
use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use crate::core::{dedup_citations, Citation, EvidenceItem};
use crate::retrieval::tokenizer::{coverage, numeric_tokens, split_sentences, stemmed_terms};
use crate::verifier::claims::split_clauses;

/// 数字替换型矛盾所需的覆盖率
pub const NUMERIC_CONTRADICTION_COVERAGE: f32 = 0.8;

static NEGATION_RE: OnceLock<Regex> = OnceLock::new();

fn negation_re() -> &'static Regex {
    NEGATION_RE.get_or_init(|| {
        Regex::new(r"(?i)\b(not|no|never|without|cannot|neither|nor)\b|n't\b|n’t\b|不|未|没有")
            .expect("valid negation regex")
    })
}

/// 文本是否为否定表述
pub fn is_negated(text: &str) -> bool {
    negation_re().is_match(text)
}

/// 比对结论；Supported 带上全部支撑引用（子句可能来自不同证据）
#[derive(Clone, Debug, PartialEq)]
pub enum Grounding {
    Supported(Vec<Citation>),
    Contradictory(Citation),
    Unsupported,
}

/// 声明或证据句的词干序列
struct Terms {
    ordered: Vec<String>,
    set: HashSet<String>,
    numbers: HashSet<String>,
    negated: bool,
}

impl Terms {
    fn new(text: &str) -> Self {
        let ordered = stemmed_terms(text);
        Self {
            set: ordered.iter().cloned().collect(),
            ordered,
            numbers: numeric_tokens(text),
            negated: is_negated(text),
        }
    }

    /// self 作为声明是否被证据句 sentence 蕴含
    fn entailed_by(&self, sentence: &Terms) -> bool {
        !self.set.is_empty()
            && self.set.is_subset(&sentence.set)
            && self.numbers.is_subset(&sentence.numbers)
            && self.negated == sentence.negated
    }

    /// 声明中未被覆盖的词是否替换了证据句里相应位置上的另一个词
    fn substitutes(&self, sentence: &Terms) -> bool {
        let position = |t: &String| sentence.ordered.iter().position(|e| e == t);
        let foreign = |range: Range<usize>| {
            sentence.ordered[range]
                .iter()
                .any(|e| !self.set.contains(e))
        };
        self.ordered
            .iter()
            .enumerate()
            .filter(|(_, t)| !sentence.set.contains(*t))
            .any(|(i, _)| {
                let before = self.ordered[..i].iter().rev().find_map(|t| position(t));
                let after = self.ordered[i + 1..].iter().find_map(|t| position(t));
                match (before, after) {
                    (Some(p), Some(q)) => p + 1 < q && foreign(p + 1..q),
                    (Some(p), None) => p + 1 < sentence.ordered.len() && foreign(p + 1..p + 2),
                    (None, Some(q)) => q > 0 && foreign(q - 1..q),
                    (None, None) => false,
                }
            })
    }

    /// 在阈值覆盖率下，证据句是否与声明相矛盾
    fn contradicted_by(&self, sentence: &Terms, threshold: f32) -> bool {
        let cov = coverage(&self.set, &sentence.set);
        if cov < threshold {
            return false;
        }
        let polarity_flip = self.negated != sentence.negated;
        let number_swap = cov >= NUMERIC_CONTRADICTION_COVERAGE
            && !self.numbers.is_empty()
            && !sentence.numbers.is_empty()
            && !self.numbers.is_subset(&sentence.numbers);
        polarity_flip || number_swap || self.substitutes(sentence)
    }
}

struct PreparedEvidence {
    citation: Citation,
    sentences: Vec<Terms>,
}

/// 预处理后的证据池
pub struct Grounder {
    threshold: f32,
    evidence: Vec<PreparedEvidence>,
}

impl Grounder {
    /// threshold：未被蕴含的声明与最接近的证据句达到多少覆盖率时才判断是否矛盾
    pub fn new(evidence: &[EvidenceItem], threshold: f32) -> Self {
        let evidence = evidence
            .iter()
            .map(|item| {
                // 与写入提示词时一样压平空白，句子不会因换行被截断
                let flat = item.text.split_whitespace().collect::<Vec<_>>().join(" ");
                PreparedEvidence {
                    citation: item.citation.clone(),
                    sentences: split_sentences(&flat).iter().map(|s| Terms::new(s)).collect(),
                }
            })
            .collect();
        Self {
            threshold,
            evidence,
        }
    }

    /// 比对一条声明（已去掉引用标记）。多条证据都支持时，优先取声明自带的内联引用 cited，
    /// 其次取来源列表 listed 中的引用，同级按证据池顺序
    pub fn ground(&self, claim: &str, cited: &[Citation], listed: &[Citation]) -> Grounding {
        let whole = Terms::new(claim);
        if whole.set.is_empty() {
            return Grounding::Unsupported;
        }
        let verdict = self.ground_terms(&whole, cited, listed);
        if matches!(verdict, Grounding::Supported(_)) {
            return verdict;
        }

        let clauses = split_clauses(claim);
        if clauses.len() < 2 {
            return verdict;
        }
        let mut citations = Vec::new();
        let mut unsupported = false;
        for clause in &clauses {
            match self.ground_terms(&Terms::new(clause), cited, listed) {
                Grounding::Supported(found) => citations.extend(found),
                contradiction @ Grounding::Contradictory(_) => return contradiction,
                Grounding::Unsupported => unsupported = true,
            }
        }
        match (unsupported, verdict) {
            (false, _) => Grounding::Supported(dedup_citations(citations)),
            (true, contradiction @ Grounding::Contradictory(_)) => contradiction,
            (true, _) => Grounding::Unsupported,
        }
    }

    /// citation 对应的证据是否蕴含该声明或其任一子句
    pub fn backs(&self, citation: &Citation, claim: &str) -> bool {
        let mut parts = vec![Terms::new(claim)];
        parts.extend(split_clauses(claim).iter().map(|c| Terms::new(c)));
        self.evidence
            .iter()
            .filter(|item| &item.citation == citation)
            .flat_map(|item| &item.sentences)
            .any(|sentence| parts.iter().any(|p| p.entailed_by(sentence)))
    }

    fn ground_terms(&self, claim: &Terms, cited: &[Citation], listed: &[Citation]) -> Grounding {
        let rank = |c: &Citation| {
            if cited.contains(c) {
                0
            } else if listed.contains(c) {
                1
            } else {
                2
            }
        };
        let mut best_support: Option<(usize, &Citation)> = None;
        let mut contradiction: Option<&Citation> = None;

        for item in &self.evidence {
            if item.sentences.iter().any(|s| claim.entailed_by(s)) {
                let r = rank(&item.citation);
                if best_support.map_or(true, |(best, _)| r < best) {
                    best_support = Some((r, &item.citation));
                }
                continue;
            }
            let closest = item
                .sentences
                .iter()
                .max_by(|a, b| coverage(&claim.set, &a.set).total_cmp(&coverage(&claim.set, &b.set)));
            if closest.is_some_and(|s| claim.contradicted_by(s, self.threshold)) {
                contradiction.get_or_insert(&item.citation);
            }
        }

        match (best_support, contradiction) {
            (Some((_, citation)), _) => Grounding::Supported(vec![citation.clone()]),
            (None, Some(citation)) => Grounding::Contradictory(citation.clone()),
            (None, None) => Grounding::Unsupported,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Vec<EvidenceItem> {
        vec![
            EvidenceItem {
                text: "The FDA approved 55 novel drugs in 2023. Median priority review took eight months."
                    .into(),
                citation: Citation::new("fda.txt", 1),
                relevance_score: 1.0,
            },
            EvidenceItem {
                text: "Biosimilar uptake did not accelerate in European markets during 2022.".into(),
                citation: Citation::new("market.txt", 2),
                relevance_score: 0.5,
            },
            EvidenceItem {
                text: "Adaptive trial designs reduced average Phase III enrollment time in recent oncology programs."
                    .into(),
                citation: Citation::new("trials.txt", 3),
                relevance_score: 0.4,
            },
        ]
    }

    fn supported(doc: &str, chunk: u32) -> Grounding {
        Grounding::Supported(vec![Citation::new(doc, chunk)])
    }

    #[test]
    fn test_verbatim_claim_supported() {
        let g = Grounder::new(&pool(), 0.6);
        assert_eq!(
            g.ground("The FDA approved 55 novel drugs in 2023.", &[], &[]),
            supported("fda.txt", 1)
        );
        // 只差停用词与词形
        assert_eq!(
            g.ground("Adaptive trial designs reduce average Phase III enrollment time.", &[], &[]),
            supported("trials.txt", 3)
        );
    }

    #[test]
    fn test_changed_number_is_contradictory() {
        let g = Grounder::new(&pool(), 0.6);
        assert_eq!(
            g.ground("The FDA approved 75 novel drugs in 2023.", &[], &[]),
            Grounding::Contradictory(Citation::new("fda.txt", 1))
        );
    }

    #[test]
    fn test_flipped_negation_is_contradictory() {
        let g = Grounder::new(&pool(), 0.6);
        assert_eq!(
            g.ground("Biosimilar uptake accelerated in European markets during 2022.", &[], &[]),
            Grounding::Contradictory(Citation::new("market.txt", 2))
        );
    }

    #[test]
    fn test_swapped_verb_is_contradictory() {
        let g = Grounder::new(&pool(), 0.6);
        assert_eq!(
            g.ground(
                "Adaptive trial designs increased average Phase III enrollment time and doubled costs.",
                &[],
                &[]
            ),
            Grounding::Contradictory(Citation::new("trials.txt", 3))
        );
    }

    #[test]
    fn test_fabricated_clause_is_not_carried_by_grounded_words() {
        let g = Grounder::new(&pool(), 0.6);
        let verdict = g.ground(
            "The FDA approved 55 novel drugs in 2023 and banned biosimilar imports.",
            &[],
            &[],
        );
        assert!(!matches!(verdict, Grounding::Supported(_)), "{verdict:?}");
    }

    #[test]
    fn test_compound_claim_supported_clause_by_clause() {
        let g = Grounder::new(&pool(), 0.6);
        assert_eq!(
            g.ground(
                "The FDA approved 55 novel drugs in 2023, and median priority review took eight months.",
                &[],
                &[]
            ),
            supported("fda.txt", 1)
        );
        assert_eq!(
            g.ground(
                "The FDA approved 55 novel drugs in 2023; adaptive trial designs reduced average Phase III enrollment time.",
                &[],
                &[]
            ),
            Grounding::Supported(vec![Citation::new("fda.txt", 1), Citation::new("trials.txt", 3)])
        );
    }

    #[test]
    fn test_short_fabrications_unsupported() {
        let g = Grounder::new(&pool(), 0.6);
        assert_eq!(g.ground("Revenue tripled.", &[], &[]), Grounding::Unsupported);
        assert_eq!(g.ground("Acquire Moderna.", &[], &[]), Grounding::Unsupported);
    }

    #[test]
    fn test_unrelated_claim_unsupported() {
        let g = Grounder::new(&pool(), 0.6);
        assert_eq!(
            g.ground("Quarterly revenue for gene therapies doubled after the merger.", &[], &[]),
            Grounding::Unsupported
        );
    }

    #[test]
    fn test_preferred_evidence_wins() {
        let mut evidence = pool();
        evidence.push(EvidenceItem {
            text: "Median priority review took eight months, according to the agency.".into(),
            citation: Citation::new("agency.txt", 4),
            relevance_score: 0.2,
        });
        let g = Grounder::new(&evidence, 0.6);
        let claim = "Median priority review took eight months.";
        assert_eq!(g.ground(claim, &[], &[]), supported("fda.txt", 1));
        assert_eq!(
            g.ground(claim, &[Citation::new("agency.txt", 4)], &[]),
            supported("agency.txt", 4)
        );
        // 内联引用优先于来源列表
        assert_eq!(
            g.ground(claim, &[Citation::new("agency.txt", 4)], &[Citation::new("fda.txt", 1)]),
            supported("agency.txt", 4)
        );
        assert_eq!(
            g.ground(claim, &[], &[Citation::new("agency.txt", 4)]),
            supported("agency.txt", 4)
        );
        assert!(g.backs(&Citation::new("agency.txt", 4), claim));
        assert!(!g.backs(&Citation::new("market.txt", 2), claim));
    }
}
