//! 推理服务层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / Scripted）、结构化响应解析、向量嵌入

pub mod deepseek;
pub mod embedding;
pub mod mock;
pub mod openai;
pub mod schema;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use embedding::{cosine_similarity, create_embedder_from_config, EmbeddingProvider, OpenAiEmbedder};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use schema::{complete_structured, parse_llm_json, schema_json};
pub use traits::{
    Completion, LlmClient, LlmError, Message, PromptKind, RetryConfig, RetryingLlmClient, Role,
    StructuredPrompt, Usage,
};
