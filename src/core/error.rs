//! 流水线错误分类与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 PipelineError 决定 RetryWithPrompt / Degrade / Abort。
//! 只有 GuardrailRejection 与 FatalConfiguration 会提前终止一次运行；
//! 核验修正（VerificationCorrection）不是错误，而是核验报告中的正常输出。

use thiserror::Error;

use crate::guardrail::Rejection;
use crate::llm::LlmError;
use crate::retrieval::RetrievalError;

/// 阶段级错误
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    /// 护栏拒绝（fail-closed，运行不会开始）
    #[error("blocked: {0}")]
    GuardrailRejection(String),

    /// 子问题没有检索到证据（非致命）
    #[error("Retrieval gap: {0}")]
    RetrievalGap(String),

    /// 推理服务超时 / 限流 / 不可用（已按退避重试）
    #[error("Reasoning service error: {0}")]
    ReasoningService(String),

    /// 响应无法解析为阶段 schema（已做一次修复重试）
    #[error("Schema parse error: {0}")]
    SchemaParse(String),

    /// 缺少凭据或依赖不可达：立即终止运行，原样返回给调用方
    #[error("Fatal configuration error: {0}")]
    FatalConfiguration(String),
}

impl PipelineError {
    /// 是否终止整次运行
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::GuardrailRejection(_) | PipelineError::FatalConfiguration(_)
        )
    }
}

impl From<LlmError> for PipelineError {
    fn from(err: LlmError) -> Self {
        if err.is_fatal() {
            return PipelineError::FatalConfiguration(err.to_string());
        }
        match err {
            LlmError::Schema(msg) => PipelineError::SchemaParse(msg),
            other => PipelineError::ReasoningService(other.to_string()),
        }
    }
}

impl From<RetrievalError> for PipelineError {
    fn from(err: RetrievalError) -> Self {
        if err.is_fatal() {
            PipelineError::FatalConfiguration(err.to_string())
        } else {
            PipelineError::RetrievalGap(err.to_string())
        }
    }
}

impl From<Rejection> for PipelineError {
    fn from(rejection: Rejection) -> Self {
        PipelineError::GuardrailRejection(rejection.reason)
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 将更严格的格式要求注入下一次请求（仅一次）
    RetryWithPrompt(String),
    /// 阶段降级为空 / 缺口结果，流水线继续
    Degrade,
    /// 终止本次运行
    Abort,
}
