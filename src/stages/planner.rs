//! Planner：把业务请求拆成 3-5 个可检索的子问题
//!
//! 响应可以是字符串列表，也可以是 `{"sub_questions": [...]}`；解析失败或数量不足时修复重试一次，
//! 仍失败则返回错误，由 Orchestrator 降级为空计划。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::{Mode, RecoveryEngine, SubQuestion, PLAN_MAX_QUESTIONS, PLAN_MIN_QUESTIONS};
use crate::llm::{schema_json, LlmClient, PromptKind, StructuredPrompt};
use crate::observability::StageResult;
use crate::stages::{prompts, request_with_repair};

/// Planner 响应
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum PlanResponse {
    List(Vec<String>),
    Object {
        #[serde(alias = "questions")]
        sub_questions: Vec<String>,
    },
}

impl PlanResponse {
    fn into_questions(self) -> Vec<String> {
        match self {
            PlanResponse::List(v) => v,
            PlanResponse::Object { sub_questions } => sub_questions,
        }
    }
}

/// 去掉 "1." / "2)" / "-" 之类的列表前缀
fn strip_list_prefix(s: &str) -> &str {
    let trimmed = s.trim_start_matches(|c: char| c == '-' || c == '*' || c == '•').trim_start();
    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &trimmed[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim_start();
        }
    }
    trimmed
}

/// 规范化子问题：去空、去列表前缀、补问号、截断到上限；不足下限为 Schema 违例
pub fn normalize_plan(raw: Vec<String>) -> Result<Vec<SubQuestion>, String> {
    let questions: Vec<String> = raw
        .iter()
        .map(|q| strip_list_prefix(q.trim()).trim().to_string())
        .filter(|q| !q.is_empty())
        .map(|q| {
            if q.ends_with('?') || q.ends_with('？') {
                q
            } else {
                format!("{}?", q.trim_end_matches(|c: char| matches!(c, '.' | '!' | ':' | ';')))
            }
        })
        .take(PLAN_MAX_QUESTIONS)
        .collect();

    if questions.len() < PLAN_MIN_QUESTIONS {
        return Err(format!(
            "expected {PLAN_MIN_QUESTIONS}-{PLAN_MAX_QUESTIONS} sub-questions, got {}",
            questions.len()
        ));
    }

    Ok(questions
        .into_iter()
        .enumerate()
        .map(|(i, text)| SubQuestion { index: i + 1, text })
        .collect())
}

/// 规划阶段
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    recovery: RecoveryEngine,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            recovery: RecoveryEngine::new(),
        }
    }

    pub async fn plan(&self, request: &str, mode: Mode) -> StageResult<Vec<SubQuestion>> {
        let prompt = StructuredPrompt::new(
            PromptKind::Plan,
            prompts::PLANNER_SYSTEM,
            prompts::planner_user(request, mode),
            schema_json::<PlanResponse>(),
        );
        let out = request_with_repair(
            self.llm.as_ref(),
            &self.recovery,
            prompt,
            |resp: PlanResponse| normalize_plan(resp.into_questions()),
        )
        .await?;
        tracing::info!(questions = out.value.len(), "plan ready");
        Ok(out)
    }
}
