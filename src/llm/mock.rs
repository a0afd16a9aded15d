//! 离线推理客户端（用于测试与本地演示，无需 API）
//!
//! MockLlmClient：确定性桩。规划请求按请求文本生成子问题；撰写请求只从提示词里的证据行逐字摘句，
//! 因此产出的交付物总能被核验通过。
//! ScriptedLlmClient：按顺序返回预设响应，用于测试修复重试、降级与核验修正。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};

use crate::core::{Citation, Mode};
use crate::llm::{Completion, LlmClient, LlmError, PromptKind, StructuredPrompt, Usage};
use crate::retrieval::tokenizer::split_sentences;
use crate::stages::prompts::{EVIDENCE_PREFIX, MODE_PREFIX, REQUEST_PREFIX, TODAY_PREFIX};

const OWNERS: &[&str] = &[
    "Regulatory Affairs",
    "Clinical Operations",
    "Medical Affairs",
    "Commercial Strategy",
    "Quality Assurance",
    "Data Science",
    "Finance",
    "Legal & Compliance",
];

/// 摘要目标字数（达到即停止追加句子）
const MOCK_SUMMARY_TARGET_WORDS: usize = 60;

/// 确定性桩客户端
#[derive(Debug, Default)]
pub struct MockLlmClient;

impl MockLlmClient {
    pub fn new() -> Self {
        Self
    }
}

fn line_value<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    text.lines()
        .find_map(|l| l.strip_prefix(prefix))
        .map(str::trim)
}

fn parse_mode(text: &str) -> Mode {
    line_value(text, MODE_PREFIX)
        .and_then(|v| v.split_whitespace().next())
        .and_then(|v| v.parse().ok())
        .unwrap_or_default()
}

fn plan_response(user: &str) -> String {
    let request = line_value(user, REQUEST_PREFIX).unwrap_or("the request");
    let words: Vec<&str> = request
        .trim_end_matches(|c: char| matches!(c, '.' | '?' | '!'))
        .split_whitespace()
        .take(14)
        .collect();
    let mut topic = words.join(" ");
    if let Some(first) = topic.chars().next() {
        // 首词若非缩写则小写
        let first_word = words.first().copied().unwrap_or_default();
        if !first_word.chars().all(|c| c.is_uppercase() || !c.is_alphabetic()) {
            topic = first.to_lowercase().collect::<String>() + &topic[first.len_utf8()..];
        }
    }

    let mut questions = vec![
        format!("What do the sources report about {topic}?"),
        format!("Which risks, constraints or requirements apply to {topic}?"),
        format!("Which actions and timelines do the sources recommend for {topic}?"),
    ];
    if parse_mode(user) == Mode::Analyst {
        questions.push(format!(
            "What data, methodology or limitations underpin the evidence on {topic}?"
        ));
    }
    serde_json::json!({ "sub_questions": questions }).to_string()
}

/// 解析证据行 `- [doc | Chunk #N] text`，按引用去重、保持顺序
fn parse_evidence(user: &str) -> Vec<(Citation, String)> {
    let mut out: Vec<(Citation, String)> = Vec::new();
    for line in user.lines() {
        let Some(rest) = line.strip_prefix(EVIDENCE_PREFIX) else {
            continue;
        };
        let Some(end) = rest.find(']') else {
            continue;
        };
        let Some(citation) = Citation::parse(&rest[..=end]) else {
            continue;
        };
        if out.iter().any(|(c, _)| c == &citation) {
            continue;
        }
        out.push((citation, rest[end + 1..].trim().to_string()));
    }
    out
}

/// 适合摘录的句子：完整陈述句、长度适中
fn quotable(sentence: &str) -> bool {
    let words = sentence.split_whitespace().count();
    (6..=45).contains(&words) && sentence.ends_with('.') && !sentence.contains('[')
}

fn draft_response(user: &str) -> String {
    let today = line_value(user, TODAY_PREFIX)
        .and_then(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d").ok())
        .unwrap_or_else(|| Utc::now().date_naive());
    let mode = parse_mode(user);
    let evidence = parse_evidence(user);

    // 各证据的候选句，轮转交织以覆盖更多来源
    let per_item: Vec<Vec<(Citation, String)>> = evidence
        .iter()
        .map(|(c, text)| {
            split_sentences(text)
                .into_iter()
                .filter(|s| quotable(s))
                .map(|s| (c.clone(), s))
                .collect()
        })
        .collect();
    let longest = per_item.iter().map(Vec::len).max().unwrap_or(0);
    let mut pool: Vec<(Citation, String)> = Vec::new();
    for i in 0..longest {
        for item in &per_item {
            if let Some(entry) = item.get(i) {
                pool.push(entry.clone());
            }
        }
    }

    let mut summary_parts = Vec::new();
    let mut summary_words = 0;
    let mut used: Vec<Citation> = Vec::new();
    for (citation, sentence) in &pool {
        if summary_words >= MOCK_SUMMARY_TARGET_WORDS {
            break;
        }
        let n = sentence.split_whitespace().count();
        if summary_words + n > crate::core::SUMMARY_MAX_WORDS {
            continue;
        }
        let body = sentence.trim_end_matches('.');
        summary_parts.push(format!("{body} {citation}."));
        summary_words += n;
        if !used.contains(citation) {
            used.push(citation.clone());
        }
    }

    let email_body: Vec<&str> = pool.iter().take(3).map(|(_, s)| s.as_str()).collect();
    for (citation, _) in pool.iter().take(3) {
        if !used.contains(citation) {
            used.push(citation.clone());
        }
    }
    let email = format!(
        "Dear Stakeholders,\n\n{}\n\nBest regards,\nEnterprise Copilot Team",
        email_body.join(" ")
    );

    let (min_actions, _) = mode.action_bounds();
    let actions: Vec<serde_json::Value> = if pool.is_empty() {
        Vec::new()
    } else {
        (0..min_actions)
            .map(|i| {
                let (citation, sentence) = &pool[i % pool.len()];
                if !used.contains(citation) {
                    used.push(citation.clone());
                }
                serde_json::json!({
                    "action": format!("Review: {} {}", sentence.trim_end_matches('.'), citation),
                    "owner": OWNERS[i % OWNERS.len()],
                    "due_date": (today + Duration::days(30 * (i as i64 + 1))).format("%Y-%m-%d").to_string(),
                    "confidence": "High",
                })
            })
            .collect()
    };

    serde_json::json!({
        "summary": summary_parts.join(" "),
        "email": email,
        "actions": actions,
        "sources": used.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
    })
    .to_string()
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, prompt: &StructuredPrompt) -> Result<Completion, LlmError> {
        let text = match prompt.kind {
            PromptKind::Plan => plan_response(&prompt.user),
            PromptKind::Draft => draft_response(&prompt.user),
        };
        let usage = Usage::new(prompt.char_len(), text.chars().count() as u64);
        Ok(Completion { text, usage })
    }
}

/// 预设响应队列；耗尽后返回 Unavailable
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<StructuredPrompt>>,
    calls: AtomicUsize,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<Result<String, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// 只含成功响应的便捷构造
    pub fn from_texts<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(|t| Ok(t.into())).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 已收到的请求（按顺序）
    pub fn prompts(&self) -> Vec<StructuredPrompt> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, prompt: &StructuredPrompt) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.clone());
        }
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_else(|| Err(LlmError::Unavailable("script exhausted".to_string())));
        next.map(|text| Completion {
            usage: Usage::new(prompt.char_len(), text.chars().count() as u64),
            text,
        })
    }
}
