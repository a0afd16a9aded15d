//! Verifier：逐条核对交付物中的声明，并按固定策略删除、替换或标记
//!
//! 修正策略：
//! - 句子 + 矛盾：替换为中性陈述（Corrected）
//! - 句子 + 无依据：删除（Removed）；若摘要会少于 40 词、或邮件正文将不剩任何内容，改为缺口标记（FlaggedAsGap）
//! - 行动项 + 矛盾/无依据：删除（Removed）；若数量会低于模式下限，文本改为缺口标记且置信度降为 Low（FlaggedAsGap）
//! - 有依据但其引用不在来源列表，或内联引用指向不支持它的证据：补上或改正引用（MissingCitation / Corrected）
//!
//! 只做删除、替换与标记；来源列表按存活声明的支撑引用重新计算，没有存活声明时为空。
//! 对自身输出再次核验结果不变且通过。

pub mod claims;
pub mod grounding;

use std::collections::HashSet;

use crate::core::{
    dedup_citations, prose_word_count, strip_markers, Citation, ClaimSection, Confidence,
    DeliverableSections, EvidenceItem, IssueReason, Mode, Resolution, VerificationIssue,
    VerificationReport, SUMMARY_MIN_WORDS,
};

pub use claims::{
    action_claim, email_lines, is_claim, render, split_clauses, summary_lines, Segment, GAP_MARKER,
    NEUTRAL_STATEMENT,
};
pub use grounding::{is_negated, Grounder, Grounding};

/// 默认近似阈值：未被蕴含的声明与最接近的证据句的实义词覆盖率达到该值时，按矛盾规则检查
pub const DEFAULT_SUPPORT_THRESHOLD: f32 = 0.6;

/// 核验过程中的记账
struct Audit {
    issues: Vec<VerificationIssue>,
    /// 存活声明的支撑引用（首次出现顺序）
    supporting: Vec<Citation>,
    listed: HashSet<Citation>,
}

impl Audit {
    fn issue(&mut self, section: ClaimSection, claim: &str, reason: IssueReason, resolution: Resolution) {
        tracing::debug!(?section, ?reason, ?resolution, claim, "verification issue");
        self.issues.push(VerificationIssue {
            section,
            claim: claim.to_string(),
            reason,
            resolution,
        });
    }

    /// 记录有依据的声明；引用新加入来源列表或内联标记被改写时记一次 MissingCitation
    fn supported(&mut self, section: ClaimSection, claim: &str, citations: Vec<Citation>, rewritten: bool) {
        let mut added = false;
        for citation in citations {
            added |= self.listed.insert(citation.clone());
            if !self.supporting.contains(&citation) {
                self.supporting.push(citation);
            }
        }
        if added || rewritten {
            self.issue(section, claim, IssueReason::MissingCitation, Resolution::Corrected);
        }
    }
}

/// 在句末标点前插入引用标记
fn with_markers(text: &str, citations: &[Citation]) -> String {
    let stripped = strip_markers(text);
    let body = stripped.trim_end_matches(['.', '!', '?', '。', '！', '？']);
    let tail = &stripped[body.len()..];
    let markers = citations.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" ");
    format!("{body} {markers}{tail}")
}

/// 核对内联引用：保留能支撑该声明的标记，指向不支撑它的证据的标记换成实际支撑的引用。
/// 返回该声明的全部支撑引用，以及需要改写时的新文本
fn reconcile_markers(
    grounder: &Grounder,
    text: &str,
    claim: &str,
    chosen: Vec<Citation>,
) -> (Vec<Citation>, Option<String>) {
    let (valid, stale): (Vec<Citation>, Vec<Citation>) = dedup_citations(Citation::find_all(text))
        .into_iter()
        .partition(|c| grounder.backs(c, claim));
    let support = dedup_citations(valid.into_iter().chain(chosen));
    if stale.is_empty() {
        return (support, None);
    }
    tracing::debug!(?stale, claim, "replacing inline citations that do not back the claim");
    let rewritten = with_markers(text, &support);
    (support, Some(rewritten))
}

/// 确定性核验器（不调用推理服务）
#[derive(Debug, Clone, Copy)]
pub struct Verifier {
    support_threshold: f32,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(DEFAULT_SUPPORT_THRESHOLD)
    }
}

impl Verifier {
    pub fn new(support_threshold: f32) -> Self {
        Self {
            support_threshold: support_threshold.clamp(0.0, 1.0),
        }
    }

    /// 核验交付物，返回修正后的交付物与报告
    pub fn verify(
        &self,
        draft: &DeliverableSections,
        evidence: &[EvidenceItem],
        mode: Mode,
    ) -> (DeliverableSections, VerificationReport) {
        let grounder = Grounder::new(evidence, self.support_threshold);
        let mut audit = Audit {
            issues: Vec::new(),
            supporting: Vec::new(),
            listed: draft.citations.iter().cloned().collect(),
        };

        // 摘要
        let mut summary = summary_lines(&draft.summary);
        let mut summary_words = prose_word_count(&draft.summary);
        let mut summary_changed = false;
        for segment in summary.iter_mut().flatten().filter(|s| s.claim) {
            let claim = strip_markers(&segment.text);
            let cited = Citation::find_all(&segment.text);
            match grounder.ground(&claim, &cited, &draft.citations) {
                Grounding::Supported(chosen) => {
                    let (support, rewritten) = reconcile_markers(&grounder, &segment.text, &claim, chosen);
                    let fixed = rewritten.is_some();
                    if let Some(text) = rewritten {
                        segment.text = text;
                        summary_changed = true;
                    }
                    audit.supported(ClaimSection::Summary, &claim, support, fixed);
                }
                Grounding::Contradictory(_) => {
                    summary_words = summary_words.saturating_sub(prose_word_count(&segment.text))
                        + prose_word_count(NEUTRAL_STATEMENT);
                    segment.text = NEUTRAL_STATEMENT.to_string();
                    audit.issue(ClaimSection::Summary, &claim, IssueReason::Contradictory, Resolution::Corrected);
                    summary_changed = true;
                }
                Grounding::Unsupported => {
                    let n = prose_word_count(&segment.text);
                    if summary_words.saturating_sub(n) >= SUMMARY_MIN_WORDS {
                        segment.text.clear();
                        summary_words -= n;
                        audit.issue(ClaimSection::Summary, &claim, IssueReason::Unsupported, Resolution::Removed);
                    } else {
                        segment.text = GAP_MARKER.to_string();
                        summary_words = summary_words.saturating_sub(n) + prose_word_count(GAP_MARKER);
                        audit.issue(ClaimSection::Summary, &claim, IssueReason::Unsupported, Resolution::FlaggedAsGap);
                    }
                    summary_changed = true;
                }
            }
        }
        if summary_changed && summary_words < SUMMARY_MIN_WORDS {
            tracing::warn!(
                words = summary_words,
                min = SUMMARY_MIN_WORDS,
                "verified summary is below the minimum length after substitutions"
            );
        }

        // 邮件：remaining 为正文中仍然保留的内容句（声明或中性陈述）
        let mut email = email_lines(&draft.email);
        let mut remaining = email.iter().flatten().filter(|s| s.claim).count();
        let mut email_changed = false;
        for segment in email.iter_mut().flatten().filter(|s| s.claim) {
            let claim = strip_markers(&segment.text);
            let cited = Citation::find_all(&segment.text);
            match grounder.ground(&claim, &cited, &draft.citations) {
                Grounding::Supported(chosen) => {
                    let (support, rewritten) = reconcile_markers(&grounder, &segment.text, &claim, chosen);
                    let fixed = rewritten.is_some();
                    if let Some(text) = rewritten {
                        segment.text = text;
                        email_changed = true;
                    }
                    audit.supported(ClaimSection::Email, &claim, support, fixed);
                }
                Grounding::Contradictory(_) => {
                    segment.text = NEUTRAL_STATEMENT.to_string();
                    audit.issue(ClaimSection::Email, &claim, IssueReason::Contradictory, Resolution::Corrected);
                    email_changed = true;
                }
                Grounding::Unsupported => {
                    if remaining > 1 {
                        segment.text.clear();
                        remaining -= 1;
                        audit.issue(ClaimSection::Email, &claim, IssueReason::Unsupported, Resolution::Removed);
                    } else {
                        segment.text = GAP_MARKER.to_string();
                        audit.issue(ClaimSection::Email, &claim, IssueReason::Unsupported, Resolution::FlaggedAsGap);
                    }
                    email_changed = true;
                }
            }
        }

        // 行动项：按去掉祈使动词后的内容核验
        let (min_actions, _) = mode.action_bounds();
        let mut count = draft.actions.len();
        let mut actions = Vec::with_capacity(count);
        for (i, item) in draft.actions.iter().enumerate() {
            if !is_claim(&item.action) {
                actions.push(item.clone());
                continue;
            }
            let reported = strip_markers(&item.action);
            let claim = action_claim(&item.action);
            let cited = Citation::find_all(&item.action);
            let reason = match grounder.ground(&claim, &cited, &draft.citations) {
                Grounding::Supported(chosen) => {
                    let (support, rewritten) = reconcile_markers(&grounder, &item.action, &claim, chosen);
                    let mut kept = item.clone();
                    let fixed = rewritten.is_some();
                    if let Some(text) = rewritten {
                        kept.action = text;
                    }
                    audit.supported(ClaimSection::Action(i), &reported, support, fixed);
                    actions.push(kept);
                    continue;
                }
                Grounding::Contradictory(_) => IssueReason::Contradictory,
                Grounding::Unsupported => IssueReason::Unsupported,
            };
            if count > min_actions {
                count -= 1;
                audit.issue(ClaimSection::Action(i), &reported, reason, Resolution::Removed);
            } else {
                let mut flagged = item.clone();
                flagged.action = GAP_MARKER.to_string();
                flagged.confidence = Confidence::Low;
                actions.push(flagged);
                audit.issue(ClaimSection::Action(i), &reported, reason, Resolution::FlaggedAsGap);
            }
        }

        let verified = DeliverableSections {
            summary: if summary_changed {
                render(&summary)
            } else {
                draft.summary.clone()
            },
            email: if email_changed {
                render(&email)
            } else {
                draft.email.clone()
            },
            actions,
            citations: audit.supporting,
        };
        let report = VerificationReport::from_issues(audit.issues);
        tracing::info!(
            issues = report.issues.len(),
            passed = report.passed,
            citations = verified.citations.len(),
            "verification complete"
        );
        (verified, report)
    }
}
