//! 错误恢复引擎
//!
//! 根据 PipelineError 与已尝试次数返回 RecoveryAction，供各阶段决定是修复重试、降级还是终止。

use crate::core::{PipelineError, RecoveryAction};

/// Schema 修复重试的最大次数
pub const MAX_REPAIR_ATTEMPTS: u32 = 1;

/// 语义化错误恢复：将错误映射为可执行动作（修复重试 / 降级 / 终止）
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// attempt 为已经做过的修复重试次数
    pub fn handle(&self, err: &PipelineError, attempt: u32) -> RecoveryAction {
        match err {
            PipelineError::SchemaParse(raw) if attempt < MAX_REPAIR_ATTEMPTS => {
                RecoveryAction::RetryWithPrompt(repair_instruction(raw))
            }
            PipelineError::GuardrailRejection(_) | PipelineError::FatalConfiguration(_) => {
                RecoveryAction::Abort
            }
            _ => RecoveryAction::Degrade,
        }
    }
}

fn repair_instruction(raw: &str) -> String {
    let detail: String = raw.chars().take(300).collect();
    format!(
        "Your previous reply could not be used: {detail}. \
         Reply again with ONLY one JSON value that matches the response schema exactly. \
         Do not add prose, markdown, code fences or comments. \
         Respect every count and length limit stated in the instructions."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_schema_error_first_attempt() {
        let engine = RecoveryEngine::new();
        let err = PipelineError::SchemaParse("expected a list".to_string());
        match engine.handle(&err, 0) {
            RecoveryAction::RetryWithPrompt(msg) => {
                assert!(msg.contains("JSON"));
                assert!(msg.contains("expected a list"));
            }
            other => panic!("Expected RetryWithPrompt, got {other:?}"),
        }
    }

    #[test]
    fn test_recovery_schema_error_after_repair() {
        let engine = RecoveryEngine::new();
        let err = PipelineError::SchemaParse("still bad".to_string());
        assert_eq!(engine.handle(&err, 1), RecoveryAction::Degrade);
    }

    #[test]
    fn test_recovery_fatal_aborts() {
        let engine = RecoveryEngine::new();
        let err = PipelineError::FatalConfiguration("OPENAI_API_KEY missing".to_string());
        assert_eq!(engine.handle(&err, 0), RecoveryAction::Abort);
    }

    #[test]
    fn test_recovery_service_error_degrades() {
        let engine = RecoveryEngine::new();
        let err = PipelineError::ReasoningService("timeout".to_string());
        assert_eq!(engine.handle(&err, 0), RecoveryAction::Degrade);
    }
}
