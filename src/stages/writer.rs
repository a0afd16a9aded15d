//! Writer：把研究笔记写成四部分交付物（摘要 / 邮件 / 行动项 / 来源）
//!
//! 全部子问题都是缺口时不调用推理服务，直接返回空交付物。
//! 响应按模式约束校验：摘要 40-150 词（超长在句界截断），行动项数量在模式区间内（超出截断）。

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::{
    all_gaps, dedup_citations, prose_word_count, retain_markers, strip_markers, ActionItem,
    Citation, Confidence, DeliverableSections, EvidenceItem, Mode, RecoveryEngine, ResearchNotes,
    SUMMARY_MAX_WORDS, SUMMARY_MIN_WORDS,
};
use crate::llm::{schema_json, LlmClient, PromptKind, StructuredPrompt, Usage};
use crate::observability::{Measured, StageResult};
use crate::retrieval::tokenizer::split_sentences;
use crate::stages::{prompts, request_with_repair};

/// 单条行动项（原始响应）
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ActionResponse {
    pub action: String,
    #[serde(default)]
    pub owner: String,
    /// YYYY-MM-DD
    #[serde(default)]
    pub due_date: String,
    /// High / Medium / Low
    #[serde(default)]
    pub confidence: String,
}

/// Writer 响应
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct WriterResponse {
    #[serde(alias = "executive_summary")]
    pub summary: String,
    #[serde(alias = "client_email")]
    pub email: String,
    #[serde(alias = "action_items")]
    pub actions: Vec<ActionResponse>,
    /// 引用列表；字符串、字符串数组或对象均可
    #[serde(default, alias = "sources_section")]
    pub sources: serde_json::Value,
}

/// 撰写阶段
pub struct Writer {
    llm: Arc<dyn LlmClient>,
    recovery: RecoveryEngine,
    today: Option<NaiveDate>,
}

impl Writer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            recovery: RecoveryEngine::new(),
            today: None,
        }
    }

    /// 固定"今天"（测试用；默认取 UTC 当天）
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub async fn draft(
        &self,
        request: &str,
        mode: Mode,
        notes: &ResearchNotes,
        evidence: &[EvidenceItem],
    ) -> StageResult<DeliverableSections> {
        if all_gaps(notes) || evidence.is_empty() {
            tracing::info!("no evidence for any sub-question, returning empty deliverable");
            return Ok(Measured::new(DeliverableSections::empty(), Usage::default()));
        }

        let today = self.today.unwrap_or_else(|| Utc::now().date_naive());
        let pool: HashSet<Citation> = evidence.iter().map(|e| e.citation.clone()).collect();
        let prompt = StructuredPrompt::new(
            PromptKind::Draft,
            prompts::writer_system(mode),
            prompts::writer_user(request, mode, today, notes),
            schema_json::<WriterResponse>(),
        )
        .with_temperature(0.3);

        let out = request_with_repair(self.llm.as_ref(), &self.recovery, prompt, |resp: WriterResponse| {
            into_sections(resp, mode, &pool, today)
        })
        .await?;
        tracing::info!(
            summary_words = prose_word_count(&out.value.summary),
            actions = out.value.actions.len(),
            citations = out.value.citations.len(),
            "draft ready"
        );
        Ok(out)
    }
}

/// 超过上限时在最后一个不越界的句界处截断（只删除，不改写）
fn cap_summary(summary: &str) -> String {
    if prose_word_count(summary) <= SUMMARY_MAX_WORDS {
        return summary.to_string();
    }
    let mut kept = Vec::new();
    let mut words = 0;
    for sentence in split_sentences(summary) {
        let n = prose_word_count(&sentence);
        if words + n > SUMMARY_MAX_WORDS {
            break;
        }
        words += n;
        kept.push(sentence);
    }
    kept.join(" ")
}

/// sources 字段可能是字符串、数组或对象，统一提取其中的引用标记
fn citations_in_value(value: &serde_json::Value) -> Vec<Citation> {
    match value {
        serde_json::Value::String(s) => Citation::find_all(s),
        serde_json::Value::Array(items) => items.iter().flat_map(citations_in_value).collect(),
        serde_json::Value::Object(map) => map
            .iter()
            .flat_map(|(k, v)| {
                let mut found = Citation::find_all(k);
                found.extend(citations_in_value(v));
                found
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// 校验并转换响应；Err 为 Schema 违例说明（用于修复提示）
pub(crate) fn into_sections(
    resp: WriterResponse,
    mode: Mode,
    pool: &HashSet<Citation>,
    today: NaiveDate,
) -> Result<DeliverableSections, String> {
    let in_pool = |c: &Citation| pool.contains(c);

    let summary = cap_summary(retain_markers(resp.summary.trim(), in_pool).trim());
    let words = prose_word_count(&summary);
    if words < SUMMARY_MIN_WORDS {
        return Err(format!(
            "summary must be {SUMMARY_MIN_WORDS}-{SUMMARY_MAX_WORDS} words, got {words}"
        ));
    }

    let email = strip_markers(resp.email.trim());
    if email.is_empty() {
        return Err("email is empty".to_string());
    }

    let (min, max) = mode.action_bounds();
    let mut actions = Vec::with_capacity(resp.actions.len());
    for (i, raw) in resp.actions.into_iter().take(max).enumerate() {
        let action = retain_markers(raw.action.trim(), in_pool);
        if action.is_empty() {
            return Err(format!("action {} has no text", i + 1));
        }
        let owner = raw.owner.trim();
        if owner.is_empty() {
            return Err(format!("action {} has no owner", i + 1));
        }
        let due_date = NaiveDate::parse_from_str(raw.due_date.trim(), "%Y-%m-%d")
            .map_err(|_| format!("action {} due_date '{}' is not YYYY-MM-DD", i + 1, raw.due_date))?;
        if due_date < today {
            return Err(format!("action {} due_date {} is in the past", i + 1, due_date));
        }
        let confidence: Confidence = raw
            .confidence
            .parse()
            .map_err(|e| format!("action {}: {}", i + 1, e))?;
        actions.push(ActionItem {
            action,
            owner: owner.to_string(),
            due_date,
            confidence,
        });
    }
    if actions.len() < min {
        return Err(format!(
            "{mode} mode needs {min}-{max} action items, got {}",
            actions.len()
        ));
    }

    let mut referenced = Citation::find_all(&summary);
    for action in &actions {
        referenced.extend(Citation::find_all(&action.action));
    }
    referenced.extend(citations_in_value(&resp.sources));
    let citations = dedup_citations(referenced.into_iter().filter(|c| pool.contains(c)));
    if citations.is_empty() {
        return Err("no citation references the provided evidence".to_string());
    }

    Ok(DeliverableSections {
        summary,
        email,
        actions,
        citations,
    })
}
