//! 流水线阶段：Planner → Researcher → Writer
//!
//! 每个阶段返回 StageResult（值 + 本阶段用量），由 Orchestrator 交给 MetricsCollector 计时记录。

pub mod planner;
pub mod prompts;
pub mod researcher;
pub mod writer;

use serde::de::DeserializeOwned;

use crate::core::{PipelineError, RecoveryAction, RecoveryEngine};
use crate::llm::{complete_structured, LlmClient, StructuredPrompt, Usage};
use crate::observability::{Measured, StageError, StageResult};

pub use planner::{normalize_plan, PlanResponse, Planner};
pub use researcher::{ResearchOutput, Researcher, NOT_FOUND_NOTE};
pub use writer::{ActionResponse, Writer, WriterResponse};

/// 发起结构化请求，并按 RecoveryEngine 的建议做修复重试
///
/// `accept` 把解析后的响应转换为阶段结果；返回 Err(说明) 视为 Schema 违例，与 JSON 解析失败同样处理。
/// 所有尝试的用量累加后随结果一起返回。
pub(crate) async fn request_with_repair<R, T, F>(
    llm: &dyn LlmClient,
    recovery: &RecoveryEngine,
    prompt: StructuredPrompt,
    accept: F,
) -> StageResult<T>
where
    R: DeserializeOwned,
    F: Fn(R) -> Result<T, String>,
{
    let mut usage = Usage::default();
    let mut attempt = 0;
    let mut current = prompt.clone();
    loop {
        let (call_usage, parsed) = complete_structured::<R>(llm, &current).await;
        usage += call_usage;

        let err = match parsed {
            Ok(raw) => match accept(raw) {
                Ok(value) => return Ok(Measured::new(value, usage)),
                Err(reason) => PipelineError::SchemaParse(reason),
            },
            Err(e) => PipelineError::from(e),
        };

        match recovery.handle(&err, attempt) {
            RecoveryAction::RetryWithPrompt(hint) => {
                tracing::warn!(kind = ?prompt.kind, "response rejected, retrying with repair hint: {}", err);
                current = prompt.clone().with_repair_hint(&hint);
                attempt += 1;
            }
            RecoveryAction::Degrade | RecoveryAction::Abort => {
                return Err(StageError::new(err, usage));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, PromptKind, ScriptedLlmClient};

    fn prompt() -> StructuredPrompt {
        StructuredPrompt::new(PromptKind::Plan, "sys", "user", "")
    }

    fn non_empty(v: Vec<String>) -> Result<Vec<String>, String> {
        if v.is_empty() {
            Err("expected at least one entry".to_string())
        } else {
            Ok(v)
        }
    }

    #[tokio::test]
    async fn test_repair_retry_succeeds_on_second_attempt() {
        let client = ScriptedLlmClient::from_texts(["not json at all", r#"["a"]"#]);
        let out = request_with_repair(&client, &RecoveryEngine::new(), prompt(), non_empty)
            .await
            .unwrap();
        assert_eq!(out.value, vec!["a".to_string()]);
        assert_eq!(client.calls(), 2);
        let prompts = client.prompts();
        assert!(prompts[1].user.contains("IMPORTANT:"));
        assert_eq!(prompts[1].temperature, 0.0);
        assert!(out.usage.input_size > 0);
    }

    #[tokio::test]
    async fn test_second_schema_failure_degrades() {
        let client = ScriptedLlmClient::from_texts(["[]", "[]", r#"["never"]"#]);
        let err = request_with_repair(&client, &RecoveryEngine::new(), prompt(), non_empty)
            .await
            .unwrap_err();
        assert!(matches!(err.error, PipelineError::SchemaParse(_)));
        assert_eq!(client.calls(), 2);
        assert!(err.usage.output_size > 0);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_repaired() {
        let client = ScriptedLlmClient::new(vec![Err(LlmError::Auth("no key".into()))]);
        let err = request_with_repair(&client, &RecoveryEngine::new(), prompt(), non_empty)
            .await
            .unwrap_err();
        assert!(err.error.is_fatal());
        assert_eq!(client.calls(), 1);
    }
}
