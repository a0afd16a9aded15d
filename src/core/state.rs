//! 运行状态：RunState 及其组成部分
//!
//! 每个请求由 Orchestrator 创建一个 RunState，并按阶段依次写入 plan / research / draft / verification / metrics；
//! 运行结束后整体交还调用方，任何阶段都不持有它的引用。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{strip_markers, Citation};
use crate::observability::StageMetric;

/// 摘要字数下限（两种模式相同）
pub const SUMMARY_MIN_WORDS: usize = 40;
/// 摘要字数上限
pub const SUMMARY_MAX_WORDS: usize = 150;
/// 子问题数量范围
pub const PLAN_MIN_QUESTIONS: usize = 3;
pub const PLAN_MAX_QUESTIONS: usize = 5;

/// 输出模式：决定摘要/行动项策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// 面向管理层：4-6 条行动项，不含方法论细节
    #[default]
    Executive,
    /// 面向分析师：5-8 条行动项，包含方法论与注意事项
    Analyst,
}

impl Mode {
    /// 行动项数量的闭区间 (min, max)
    pub fn action_bounds(&self) -> (usize, usize) {
        match self {
            Mode::Executive => (4, 6),
            Mode::Analyst => (5, 8),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Executive => "executive",
            Mode::Analyst => "analyst",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "executive" | "exec" => Ok(Mode::Executive),
            "analyst" => Ok(Mode::Analyst),
            other => Err(format!("unknown mode '{other}' (expected executive or analyst)")),
        }
    }
}

/// 运行状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Rejected,
    Running,
    Delivered,
    Failed,
}

/// 一条检索证据
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub text: String,
    pub citation: Citation,
    /// 越高越相关
    pub relevance_score: f32,
}

/// Planner 产出的子问题；index 从 1 开始且在整个运行内稳定
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubQuestion {
    pub index: usize,
    pub text: String,
}

/// 单个子问题的研究结果：证据列表，或缺口标记 + 可读说明
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResearchNote {
    pub question: SubQuestion,
    pub evidence: Vec<EvidenceItem>,
    pub gap: bool,
    /// 缺口时为 "Not found in sources..." 说明
    pub note: Option<String>,
}

/// 子问题 index -> 研究结果
pub type ResearchNotes = BTreeMap<usize, ResearchNote>;

/// 所有子问题都是缺口（或根本没有子问题）
pub fn all_gaps(notes: &ResearchNotes) -> bool {
    notes.values().all(|n| n.gap)
}

/// 行动项置信度
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Confidence::High),
            "medium" | "med" => Ok(Confidence::Medium),
            "low" => Ok(Confidence::Low),
            other => Err(format!("invalid confidence '{other}'")),
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Confidence::High => "High",
            Confidence::Medium => "Medium",
            Confidence::Low => "Low",
        };
        f.write_str(s)
    }
}

/// 行动项：Action | Owner | Due Date | Confidence
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub action: String,
    pub owner: String,
    pub due_date: NaiveDate,
    pub confidence: Confidence,
}

/// 交付物四个部分；要么全部填充，要么全部为空
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliverableSections {
    pub summary: String,
    /// 不含内联引用
    pub email: String,
    pub actions: Vec<ActionItem>,
    /// 实际被引用的证据（扁平、去重）
    pub citations: Vec<Citation>,
}

impl DeliverableSections {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.summary.trim().is_empty()
            && self.email.trim().is_empty()
            && self.actions.is_empty()
            && self.citations.is_empty()
    }

    /// 四个部分全部非空
    pub fn is_complete(&self) -> bool {
        !self.summary.trim().is_empty()
            && !self.email.trim().is_empty()
            && !self.actions.is_empty()
            && !self.citations.is_empty()
    }

    /// 文本总字符数（用于指标中的 input/output size）
    pub fn char_len(&self) -> u64 {
        let actions: usize = self
            .actions
            .iter()
            .map(|a| a.action.chars().count() + a.owner.chars().count())
            .sum();
        (self.summary.chars().count() + self.email.chars().count() + actions) as u64
    }
}

/// 英文按空白计词；供摘要长度约束使用
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// 去掉内联引用标记后的词数（摘要长度以此为准）
pub fn prose_word_count(text: &str) -> usize {
    word_count(&strip_markers(text))
}

/// 声明所在的交付物部分
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "index")]
pub enum ClaimSection {
    Summary,
    Email,
    /// 行动项下标（0-based，对应核验前的 actions）
    Action(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IssueReason {
    Unsupported,
    Contradictory,
    MissingCitation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    Removed,
    Corrected,
    FlaggedAsGap,
}

/// 核验发现的一个问题及其处理方式
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationIssue {
    pub section: ClaimSection,
    pub claim: String,
    pub reason: IssueReason,
    pub resolution: Resolution,
}

impl fmt::Display for VerificationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:?} -> {:?}] {}",
            self.reason, self.resolution, self.claim
        )
    }
}

/// 核验报告：passed 当且仅当没有任何声明需要修正
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub issues: Vec<VerificationIssue>,
    pub passed: bool,
}

impl VerificationReport {
    pub fn from_issues(issues: Vec<VerificationIssue>) -> Self {
        let passed = issues.is_empty();
        Self { issues, passed }
    }

    /// 摘要中有声明被替换为中性陈述或缺口标记。
    /// 只有这种情况下交付的摘要才允许少于下限（删除只在不低于下限时发生）
    pub fn substituted_in_summary(&self) -> bool {
        self.issues.iter().any(|i| {
            i.section == ClaimSection::Summary
                && (i.reason == IssueReason::Contradictory
                    || i.resolution == Resolution::FlaggedAsGap)
        })
    }
}

/// 单次运行的完整状态
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    /// 经护栏清洗后的请求文本（被拒绝时为空）
    pub request_text: String,
    pub mode: Mode,
    pub plan: Vec<SubQuestion>,
    pub research_notes: ResearchNotes,
    /// 证据池：所有子问题证据按引用去重后的并集，是核验的唯一依据
    pub evidence: Vec<EvidenceItem>,
    pub draft: DeliverableSections,
    /// None 表示跳过了核验
    pub verification: Option<VerificationReport>,
    pub metrics: Vec<StageMetric>,
    pub status: RunStatus,
    /// 护栏拒绝原因
    pub rejection: Option<String>,
    /// 致命错误原文
    pub failure: Option<String>,
}

impl RunState {
    pub fn new(mode: Mode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            request_text: String::new(),
            mode,
            plan: Vec::new(),
            research_notes: ResearchNotes::new(),
            evidence: Vec::new(),
            draft: DeliverableSections::empty(),
            verification: None,
            metrics: Vec::new(),
            status: RunStatus::Running,
            rejection: None,
            failure: None,
        }
    }

    /// 面向用户的一行状态说明
    pub fn status_line(&self) -> String {
        match self.status {
            RunStatus::Rejected => format!(
                "blocked: {}",
                self.rejection.as_deref().unwrap_or("input rejected")
            ),
            RunStatus::Failed => format!(
                "failed: {}",
                self.failure.as_deref().unwrap_or("unknown error")
            ),
            RunStatus::Running => "running".to_string(),
            RunStatus::Delivered => match &self.verification {
                Some(r) if r.passed => "delivered (verified)".to_string(),
                Some(r) => format!("delivered ({} corrections applied)", r.issues.len()),
                None if self.draft.is_empty() => {
                    "delivered (not found in sources; verification skipped)".to_string()
                }
                None => "delivered (verification skipped)".to_string(),
            },
        }
    }

    /// 已回答（非缺口）的子问题数
    pub fn answered_questions(&self) -> usize {
        self.research_notes.values().filter(|n| !n.gap).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_bounds() {
        assert_eq!(Mode::Executive.action_bounds(), (4, 6));
        assert_eq!(Mode::Analyst.action_bounds(), (5, 8));
        assert_eq!("Analyst".parse::<Mode>().unwrap(), Mode::Analyst);
        assert!("manager".parse::<Mode>().is_err());
    }

    #[test]
    fn test_confidence_parse_case_insensitive() {
        assert_eq!("HIGH".parse::<Confidence>().unwrap(), Confidence::High);
        assert_eq!(" medium ".parse::<Confidence>().unwrap(), Confidence::Medium);
        assert!("certain".parse::<Confidence>().is_err());
    }

    #[test]
    fn test_empty_deliverable() {
        let d = DeliverableSections::empty();
        assert!(d.is_empty());
        assert!(!d.is_complete());
    }

    #[test]
    fn test_report_passed_iff_no_issues() {
        assert!(VerificationReport::from_issues(vec![]).passed);
        let issue = VerificationIssue {
            section: ClaimSection::Summary,
            claim: "x".into(),
            reason: IssueReason::Unsupported,
            resolution: Resolution::Removed,
        };
        assert!(!VerificationReport::from_issues(vec![issue]).passed);
    }

    #[test]
    fn test_all_gaps_on_empty_notes() {
        assert!(all_gaps(&ResearchNotes::new()));
    }

    #[test]
    fn test_new_run_state() {
        let run = RunState::new(Mode::Executive);
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.verification.is_none());
        assert!(run.metrics.is_empty());
    }
}
