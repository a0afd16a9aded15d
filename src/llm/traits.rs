//! 推理服务客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock / Scripted）实现 LlmClient：输入结构化 Prompt，返回文本与用量。
//! RetryingLlmClient 在外层对瞬时错误做有界指数退避。

use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// 发起请求的阶段（Mock 据此决定回复形状，日志据此标注）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptKind {
    Plan,
    Draft,
}

/// 结构化请求：system + user 指令，外加期望的响应 JSON Schema
#[derive(Clone, Debug)]
pub struct StructuredPrompt {
    pub kind: PromptKind,
    pub system: String,
    pub user: String,
    /// 期望响应的 JSON Schema（schemars 生成，拼入 system）
    pub response_schema: String,
    pub temperature: f32,
}

impl StructuredPrompt {
    pub fn new(
        kind: PromptKind,
        system: impl Into<String>,
        user: impl Into<String>,
        response_schema: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            system: system.into(),
            user: user.into(),
            response_schema: response_schema.into(),
            temperature: 0.2,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// 追加修复提示（Schema 解析失败后的第二次请求）
    pub fn with_repair_hint(mut self, hint: &str) -> Self {
        self.user = format!("{}\n\nIMPORTANT: {}", self.user, hint);
        self.temperature = 0.0;
        self
    }

    /// 转为 API 消息：system 中附带响应 Schema
    pub fn messages(&self) -> Vec<Message> {
        let system = if self.response_schema.is_empty() {
            self.system.clone()
        } else {
            format!(
                "{}\n\nRespond with JSON that validates against this schema:\n{}",
                self.system, self.response_schema
            )
        };
        vec![Message::system(system), Message::user(self.user.clone())]
    }

    /// 字符数（后端未返回 token 用量时作为 input size）
    pub fn char_len(&self) -> u64 {
        (self.system.chars().count() + self.user.chars().count()) as u64
    }
}

/// 一次或多次调用的用量（token 数；后端不报告时为字符数）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_size: u64,
    pub output_size: u64,
}

impl Usage {
    pub fn new(input_size: u64, output_size: u64) -> Self {
        Self {
            input_size,
            output_size,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_size += rhs.input_size;
        self.output_size += rhs.output_size;
    }
}

/// 非流式完成结果
#[derive(Clone, Debug)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

/// 推理服务错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// 响应无法解析为期望的 schema
    #[error("schema violation: {0}")]
    Schema(String),
}

impl LlmError {
    /// 可按退避重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout(_) | LlmError::RateLimited(_) | LlmError::Unavailable(_)
        )
    }

    /// 凭据 / 配置问题：重试无意义，应终止运行
    pub fn is_fatal(&self) -> bool {
        matches!(self, LlmError::Auth(_) | LlmError::Config(_))
    }
}

/// 推理服务客户端 trait：多次运行并发共享，实现需 Send + Sync
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, prompt: &StructuredPrompt) -> Result<Completion, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 退避重试配置
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// 首次失败后的最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    4000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次重试前的等待时间（指数增长，封顶 max_delay_ms）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// 对瞬时错误做有界指数退避重试的包装客户端；非瞬时错误立即返回
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, prompt: &StructuredPrompt) -> Result<Completion, LlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(prompt).await {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.config.delay_for(attempt);
                    tracing::warn!(
                        kind = ?prompt.kind,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "transient reasoning error, backing off: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    fn prompt() -> StructuredPrompt {
        StructuredPrompt::new(PromptKind::Plan, "sys", "user", "{}")
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[test]
    fn test_delay_is_bounded() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.delay_for(0), Duration::from_millis(500));
        assert_eq!(cfg.delay_for(1), Duration::from_millis(1000));
        assert_eq!(cfg.delay_for(10), Duration::from_millis(4000));
        assert_eq!(cfg.delay_for(200), Duration::from_millis(4000));
    }

    #[test]
    fn test_error_classes() {
        assert!(LlmError::Timeout(30).is_transient());
        assert!(!LlmError::Schema("x".into()).is_transient());
        assert!(LlmError::Auth("x".into()).is_fatal());
        assert!(!LlmError::RateLimited("x".into()).is_fatal());
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let scripted = Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::Timeout(1)),
            Err(LlmError::RateLimited("slow down".into())),
            Ok("[\"ok\"]".to_string()),
        ]));
        let client = RetryingLlmClient::new(scripted.clone(), fast_retry());
        let completion = client.complete(&prompt()).await.unwrap();
        assert_eq!(completion.text, "[\"ok\"]");
        assert_eq!(scripted.calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_bound() {
        let scripted = Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::Timeout(1)),
            Err(LlmError::Timeout(1)),
            Err(LlmError::Timeout(1)),
            Ok("never reached".to_string()),
        ]));
        let client = RetryingLlmClient::new(scripted.clone(), fast_retry());
        let err = client.complete(&prompt()).await.unwrap_err();
        assert_eq!(err, LlmError::Timeout(1));
        assert_eq!(scripted.calls(), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let scripted = Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::Auth("invalid key".into())),
            Ok("unused".to_string()),
        ]));
        let client = RetryingLlmClient::new(scripted.clone(), fast_retry());
        assert!(client.complete(&prompt()).await.unwrap_err().is_fatal());
        assert_eq!(scripted.calls(), 1);
    }
}
