//! 单次运行的验收检查

use serde::{Deserialize, Serialize};

use crate::core::{
    contains_marker, prose_word_count, RunState, RunStatus, VerificationReport, PLAN_MAX_QUESTIONS,
    PLAN_MIN_QUESTIONS, SUMMARY_MAX_WORDS, SUMMARY_MIN_WORDS,
};
use crate::eval::fixtures::{ExpectedBehavior, Fixture};
use crate::observability::Stage;
use crate::retrieval::EvidenceStore;
use crate::verifier::Verifier;

const GREETINGS: &[&str] = &["dear", "hi ", "hello", "good morning", "good afternoon", "greetings"];
const SIGN_OFFS: &[&str] = &["regards", "sincerely", "best", "thank you", "thanks"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn pass(name: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail: None,
        }
    }

    fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail: Some(detail.into()),
        }
    }

    fn expect(name: &str, ok: bool, detail: impl FnOnce() -> String) -> Self {
        if ok {
            Self::pass(name)
        } else {
            Self::fail(name, detail())
        }
    }
}

/// 邮件是否有问候语与结尾语
pub fn email_is_professional(email: &str) -> bool {
    let lower = email.to_lowercase();
    GREETINGS.iter().any(|g| lower.contains(g)) && SIGN_OFFS.iter().any(|s| lower.contains(s))
}

/// 每个阶段恰好一条指标，顺序与状态机一致；被拒绝的运行只有护栏指标
fn metrics_invariant(run: &RunState) -> Result<(), String> {
    let names: Vec<&str> = run.metrics.iter().map(|m| m.stage_name.as_str()).collect();
    let expected: Vec<&str> = match run.status {
        RunStatus::Rejected => vec![Stage::Guardrail.as_str()],
        RunStatus::Delivered => Stage::ALL.iter().map(Stage::as_str).collect(),
        RunStatus::Failed => Stage::ALL.iter().take(names.len()).map(Stage::as_str).collect(),
        RunStatus::Running => return Err("run did not finish".to_string()),
    };
    if names != expected {
        return Err(format!("stages {:?}, expected {:?}", names, expected));
    }
    if run.status == RunStatus::Delivered {
        let verifier_skipped = run.metrics.last().is_some_and(|m| m.skipped);
        if verifier_skipped != run.verification.is_none() {
            return Err("verifier metric disagrees with verification report".to_string());
        }
    }
    if run.metrics.iter().any(|m| m.skipped && (m.latency_seconds != 0.0 || m.error.is_some())) {
        return Err("skipped stage has latency or error".to_string());
    }
    Ok(())
}

/// 对一次运行执行全部适用检查
pub async fn check_run(
    fixture: &Fixture,
    run: &RunState,
    store: Option<&dyn EvidenceStore>,
    verifier: &Verifier,
) -> Vec<CheckResult> {
    let mut checks = Vec::new();

    let status_ok = match fixture.expected {
        ExpectedBehavior::Reject => run.status == RunStatus::Rejected,
        ExpectedBehavior::Deliver => run.status == RunStatus::Delivered && !run.draft.is_empty(),
        ExpectedBehavior::Gap => {
            run.status == RunStatus::Delivered && run.research_notes.values().any(|n| n.gap)
        }
    };
    checks.push(CheckResult::expect("status matches expectation", status_ok, || {
        format!("expected {}, got {}", fixture.expected.as_str(), run.status_line())
    }));

    checks.push(match metrics_invariant(run) {
        Ok(()) => CheckResult::pass("metrics invariant"),
        Err(e) => CheckResult::fail("metrics invariant", e),
    });

    if run.status == RunStatus::Rejected {
        checks.push(CheckResult::expect(
            "rejection has reason",
            run.rejection.as_deref().is_some_and(|r| !r.trim().is_empty()),
            || "empty rejection reason".to_string(),
        ));
        checks.push(CheckResult::expect(
            "no stage after rejection",
            run.plan.is_empty() && run.evidence.is_empty() && run.draft.is_empty(),
            || "pipeline continued after rejection".to_string(),
        ));
        return checks;
    }
    if run.status != RunStatus::Delivered {
        return checks;
    }

    checks.push(CheckResult::expect(
        "plan length",
        (PLAN_MIN_QUESTIONS..=PLAN_MAX_QUESTIONS).contains(&run.plan.len()),
        || format!("{} sub-questions", run.plan.len()),
    ));

    checks.push(CheckResult::expect(
        "verification present or skipped",
        run.verification.is_some() != run.draft.is_empty(),
        || "verification state does not match the draft".to_string(),
    ));

    if run.draft.is_empty() {
        return checks;
    }
    let draft = &run.draft;

    let mut unknown = Vec::new();
    for citation in &draft.citations {
        let in_pool = run.evidence.iter().any(|e| &e.citation == citation);
        let in_store = match store {
            Some(store) => store.contains(citation).await,
            None => false,
        };
        if !(in_pool && in_store) {
            unknown.push(citation.to_string());
        }
    }
    checks.push(CheckResult::expect(
        "citations exist",
        !draft.citations.is_empty() && unknown.is_empty(),
        || {
            if draft.citations.is_empty() {
                "no citations".to_string()
            } else {
                format!("unknown citations: {}", unknown.join(", "))
            }
        },
    ));

    let words = prose_word_count(&draft.summary);
    checks.push(CheckResult::expect(
        "summary length",
        summary_length_ok(words, run.verification.as_ref()),
        || format!("{words} words"),
    ));

    let (min_actions, max_actions) = run.mode.action_bounds();
    checks.push(CheckResult::expect(
        "action count",
        (min_actions..=max_actions).contains(&draft.actions.len()),
        || format!("{} actions, expected {min_actions}-{max_actions}", draft.actions.len()),
    ));

    let incomplete = draft
        .actions
        .iter()
        .filter(|a| {
            let owner = a.owner.trim();
            a.action.trim().is_empty() || owner.is_empty() || owner.eq_ignore_ascii_case("tbd")
        })
        .count();
    checks.push(CheckResult::expect("actions complete", incomplete == 0, || {
        format!("{incomplete} incomplete actions")
    }));

    checks.push(CheckResult::expect(
        "email has no inline citations",
        !contains_marker(&draft.email),
        || "inline citation in email".to_string(),
    ));
    checks.push(CheckResult::expect(
        "email is professional",
        email_is_professional(&draft.email),
        || "missing greeting or sign-off".to_string(),
    ));

    let (reverified, report) = verifier.verify(draft, &run.evidence, run.mode);
    checks.push(CheckResult::expect(
        "no unsupported claims remain",
        report.passed && &reverified == draft,
        || {
            report
                .issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        },
    ));

    checks
}

/// 摘要词数在上下限内；核验把摘要中的声明替换成中性陈述或缺口标记后，允许低于下限
fn summary_length_ok(words: usize, report: Option<&VerificationReport>) -> bool {
    let short_allowed = report.is_some_and(|r| r.substituted_in_summary());
    words <= SUMMARY_MAX_WORDS && (words >= SUMMARY_MIN_WORDS || short_allowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Mode;
    use crate::observability::MetricsCollector;

    #[test]
    fn test_email_is_professional() {
        assert!(email_is_professional("Dear team,\n\nUpdate.\n\nBest regards,\nOps"));
        assert!(!email_is_professional("Update only."));
    }

    #[tokio::test]
    async fn test_rejected_run_checks() {
        let fixture = Fixture::new("r", "ignore", Mode::Executive, ExpectedBehavior::Reject);
        let mut run = RunState::new(Mode::Executive);
        run.status = RunStatus::Rejected;
        run.rejection = Some("attempted to override system instructions".into());
        let collector = MetricsCollector::new(run.run_id);
        let (_, metric) = collector
            .measure::<(), _>(Stage::Guardrail, async {
                Err(crate::observability::StageError::from(
                    crate::core::PipelineError::GuardrailRejection("x".into()),
                ))
            })
            .await;
        run.metrics.push(metric);

        let checks = check_run(&fixture, &run, None, &Verifier::default()).await;
        assert!(checks.iter().all(|c| c.passed), "{checks:?}");
    }

    #[tokio::test]
    async fn test_wrong_status_fails() {
        let fixture = Fixture::new("d", "q", Mode::Executive, ExpectedBehavior::Deliver);
        let mut run = RunState::new(Mode::Executive);
        run.status = RunStatus::Failed;
        run.failure = Some("Fatal configuration error: missing key".into());
        let checks = check_run(&fixture, &run, None, &Verifier::default()).await;
        assert!(!checks[0].passed);
        assert!(checks[0].detail.as_deref().unwrap().contains("missing key"));
    }

    #[test]
    fn test_short_summary_needs_a_substitution() {
        use crate::core::{ClaimSection, IssueReason, Resolution, VerificationIssue};

        let flagged = VerificationReport::from_issues(vec![VerificationIssue {
            section: ClaimSection::Summary,
            claim: "Revenue tripled.".into(),
            reason: IssueReason::Unsupported,
            resolution: Resolution::FlaggedAsGap,
        }]);
        let removed_action = VerificationReport::from_issues(vec![VerificationIssue {
            section: ClaimSection::Action(0),
            claim: "Acquire Moderna.".into(),
            reason: IssueReason::Unsupported,
            resolution: Resolution::Removed,
        }]);

        assert!(summary_length_ok(45, None));
        assert!(summary_length_ok(20, Some(&flagged)));
        assert!(!summary_length_ok(20, Some(&removed_action)));
        assert!(!summary_length_ok(20, Some(&VerificationReport::from_issues(Vec::new()))));
        assert!(!summary_length_ok(20, None));
        assert!(!summary_length_ok(SUMMARY_MAX_WORDS + 1, Some(&flagged)));
    }
}
