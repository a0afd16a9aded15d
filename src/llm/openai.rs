//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 未配置 API Key 时不会发出请求，首次调用即返回 Auth 错误（致命配置错误）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{Completion, LlmClient, LlmError, Message, Role, StructuredPrompt, Usage};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client 与 model 名，complete 时转 Message 为 API 格式并取首条 content
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    has_key: bool,
    timeout: Duration,
    /// 累计 token 使用统计（进程级，仅用于展示；单次运行的用量由 Completion 返回）
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty());
        let has_key = api_key.is_some();

        let mut config = OpenAIConfig::new().with_api_key(api_key.unwrap_or_default());
        if let Some(url) = base_url {
            config = config.with_api_base(url);
        }

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            has_key,
            timeout: Duration::from_secs(60),
            usage: TokenUsage::new(),
        }
    }

    /// 单次请求超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        messages
            .iter()
            .map(|m| {
                let msg = match m.role {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()?
                        .into(),
                    Role::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()?
                        .into(),
                };
                Ok(msg)
            })
            .collect::<Result<Vec<_>, OpenAIError>>()
            .map_err(|e| LlmError::Config(e.to_string()))
    }
}

/// 将 async-openai 错误归类为 LlmError
fn classify_error(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::ApiError(api) => {
            let kind = format!(
                "{} {}",
                api.r#type.as_deref().unwrap_or_default(),
                api.code.as_deref().unwrap_or_default()
            )
            .to_lowercase();
            if kind.contains("auth") || kind.contains("invalid_api_key") {
                LlmError::Auth(api.message)
            } else if kind.contains("rate") || kind.contains("quota") {
                LlmError::RateLimited(api.message)
            } else if kind.contains("server") || kind.contains("overloaded") {
                LlmError::Unavailable(api.message)
            } else if kind.contains("model_not_found") {
                LlmError::Config(api.message)
            } else {
                LlmError::Api(api.message)
            }
        }
        OpenAIError::InvalidArgument(msg) => LlmError::Config(msg),
        other => {
            let msg = other.to_string();
            let lower = msg.to_lowercase();
            if lower.contains("401") || lower.contains("unauthorized") {
                LlmError::Auth(msg)
            } else if lower.contains("429") || lower.contains("rate limit") {
                LlmError::RateLimited(msg)
            } else if lower.contains("timed out")
                || lower.contains("connect")
                || lower.contains("502")
                || lower.contains("503")
                || lower.contains("504")
            {
                LlmError::Unavailable(msg)
            } else {
                LlmError::Api(msg)
            }
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, prompt: &StructuredPrompt) -> Result<Completion, LlmError> {
        if !self.has_key {
            return Err(LlmError::Auth(
                "no API key configured (set OPENAI_API_KEY or DEEPSEEK_API_KEY)".to_string(),
            ));
        }

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(&prompt.messages())?)
            .temperature(prompt.temperature)
            .build()
            .map_err(|e| LlmError::Config(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))?
            .map_err(classify_error)?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        // 提取 token 使用统计；端点不报告时退回字符数
        let usage = match &response.usage {
            Some(u) => {
                self.usage
                    .add(u.prompt_tokens as u64, u.completion_tokens as u64);
                Usage::new(u.prompt_tokens as u64, u.completion_tokens as u64)
            }
            None => Usage::new(prompt.char_len(), content.chars().count() as u64),
        };

        tracing::debug!(
            model = %self.model,
            kind = ?prompt.kind,
            input = usage.input_size,
            output = usage.output_size,
            "completion received"
        );

        Ok(Completion {
            text: content,
            usage,
        })
    }
}
