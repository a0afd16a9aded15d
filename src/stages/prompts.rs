//! 各阶段的 system / user 提示词模板
//!
//! user 提示词中的行前缀（Request: / Mode: / Today's date: / 证据行）是固定格式，MockLlmClient 依赖它们解析输入。

use chrono::NaiveDate;

use crate::core::{Mode, ResearchNotes, PLAN_MAX_QUESTIONS, PLAN_MIN_QUESTIONS, SUMMARY_MAX_WORDS, SUMMARY_MIN_WORDS};

pub const REQUEST_PREFIX: &str = "Request: ";
pub const MODE_PREFIX: &str = "Mode: ";
pub const TODAY_PREFIX: &str = "Today's date: ";
/// 证据行：`- [doc | Chunk #N] text`
pub const EVIDENCE_PREFIX: &str = "- ";

pub const PLANNER_SYSTEM: &str = "\
You are the Planner in a grounded business research system.

Your job:
1. Read the business request.
2. Decompose it into concrete, answerable sub-questions that can be looked up in an internal document collection.
3. Order them logically (dependencies first).

Rules:
- Each sub-question must be short, self-contained and end with a question mark.
- Do NOT answer the questions, only list them.
- Output valid JSON only.";

const WRITER_SYSTEM_EXECUTIVE: &str = "\
You are the Writer. You produce a decision-ready deliverable for an executive audience.

Sections:
1. summary: lead with the most important finding, then supporting evidence, then a concrete recommendation. No methodology detail.
2. email: a professional email starting with \"Dear Stakeholders,\" in plain language WITHOUT inline citations, signed \"Enterprise Copilot Team\".
3. actions: each with a functional owner, a YYYY-MM-DD due date after today's date, and confidence High/Medium/Low reflecting how well the evidence supports it.
4. sources: every citation you used, formatted [document | Chunk #N].

Rules:
- Use ONLY the evidence provided. Every factual sentence in the summary must end with its citation marker, e.g. [fda_guidelines.txt | Chunk #3].
- Never invent numbers; only use figures that appear verbatim in the evidence.
- Omit anything the evidence does not support.";

const WRITER_SYSTEM_ANALYST: &str = "\
You are the Writer in Analyst mode. You produce a detailed, data-rich deliverable for analysts.

Sections:
1. summary: specific findings, their implications, methodology notes and caveats about evidence gaps, then a data-driven recommendation.
2. email: a detailed email starting with \"Dear Stakeholders,\" WITHOUT inline citations, including methodology context and caveats, signed \"Enterprise Copilot Team\".
3. actions: granular, measurable items, each with a functional owner, a YYYY-MM-DD due date after today's date, and confidence High/Medium/Low.
4. sources: every citation you used, formatted [document | Chunk #N].

Rules:
- Use ONLY the evidence provided. Every factual sentence in the summary must end with its citation marker, e.g. [fda_guidelines.txt | Chunk #3].
- Never invent numbers; only use figures that appear verbatim in the evidence.
- Omit anything the evidence does not support.";

pub fn writer_system(mode: Mode) -> &'static str {
    match mode {
        Mode::Executive => WRITER_SYSTEM_EXECUTIVE,
        Mode::Analyst => WRITER_SYSTEM_ANALYST,
    }
}

fn mode_line(mode: Mode) -> String {
    let (min, max) = mode.action_bounds();
    format!("{MODE_PREFIX}{mode} ({min}-{max} action items)")
}

pub fn planner_user(request: &str, mode: Mode) -> String {
    format!(
        "{REQUEST_PREFIX}{request}\n{}\n\n\
         Return {PLAN_MIN_QUESTIONS}-{PLAN_MAX_QUESTIONS} sub-questions as JSON, either a list of strings or \
         {{\"sub_questions\": [\"...\"]}}.",
        mode_line(mode)
    )
}

/// 撰写提示词：只包含已回答子问题的证据，缺口以说明形式列出
pub fn writer_user(request: &str, mode: Mode, today: NaiveDate, notes: &ResearchNotes) -> String {
    let (min, max) = mode.action_bounds();
    let mut out = format!(
        "{REQUEST_PREFIX}{request}\n{}\n{TODAY_PREFIX}{}\n\nEvidence:\n",
        mode_line(mode),
        today.format("%Y-%m-%d")
    );
    for note in notes.values() {
        out.push_str(&format!(
            "\nSub-question {}: {}\n",
            note.question.index, note.question.text
        ));
        if note.gap {
            out.push_str(&format!(
                "{}\n",
                note.note.as_deref().unwrap_or("Not found in sources.")
            ));
            continue;
        }
        for item in &note.evidence {
            let text = item.text.split_whitespace().collect::<Vec<_>>().join(" ");
            out.push_str(&format!("{EVIDENCE_PREFIX}{} {}\n", item.citation, text));
        }
    }
    out.push_str(&format!(
        "\nWrite a summary of {SUMMARY_MIN_WORDS}-{SUMMARY_MAX_WORDS} words and {min}-{max} action items. \
         Respond with JSON: {{\"summary\": \"...\", \"email\": \"...\", \
         \"actions\": [{{\"action\": \"...\", \"owner\": \"...\", \"due_date\": \"YYYY-MM-DD\", \"confidence\": \"High|Medium|Low\"}}], \
         \"sources\": [\"[document | Chunk #N]\"]}}"
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Citation, EvidenceItem, ResearchNote, SubQuestion};

    #[test]
    fn test_writer_user_lists_evidence_and_gaps() {
        let mut notes = ResearchNotes::new();
        notes.insert(
            1,
            ResearchNote {
                question: SubQuestion {
                    index: 1,
                    text: "What changed?".into(),
                },
                evidence: vec![EvidenceItem {
                    text: "Review times\nfell.".into(),
                    citation: Citation::new("fda.txt", 2),
                    relevance_score: 0.9,
                }],
                gap: false,
                note: None,
            },
        );
        notes.insert(
            2,
            ResearchNote {
                question: SubQuestion {
                    index: 2,
                    text: "What did it cost?".into(),
                },
                evidence: vec![],
                gap: true,
                note: Some("Not found in sources. Additional information needed: cost data.".into()),
            },
        );
        let today = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        let prompt = writer_user("Assess approvals", Mode::Analyst, today, &notes);
        assert!(prompt.contains("Today's date: 2026-01-15"));
        assert!(prompt.contains("Mode: analyst (5-8 action items)"));
        assert!(prompt.contains("- [fda.txt | Chunk #2] Review times fell."));
        assert!(prompt.contains("Additional information needed: cost data."));
    }
}
