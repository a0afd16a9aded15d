//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `COPILOT__*` 覆盖（双下划线表示嵌套，如 `COPILOT__LLM__PROVIDER=mock`）。
//! 凭据不进配置文件：OPENAI_API_KEY / DEEPSEEK_API_KEY 直接从环境读取。

use std::path::PathBuf;

use serde::Deserialize;

use crate::llm::RetryConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub retrieval: RetrievalSection,
    pub guardrail: GuardrailSection,
    pub verifier: VerifierSection,
    pub eval: EvalSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// 未设置 RUST_LOG 时的日志级别
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_app_name() -> String {
    "Enterprise Copilot".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

/// [llm] 段：后端选择、超时与退避
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// openai / deepseek / mock；未知值或没有任何 Key 时使用 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

/// [retrieval] 段：文档目录、索引位置、分块与检索参数
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// 每个子问题取回的证据条数
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// 关键词相关度下限（低于此值的命中丢弃，子问题可能因此成为缺口）
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    /// 向量相似度下限
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    /// 子问题并发检索
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub use_embeddings: bool,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_index_path() -> PathBuf {
    PathBuf::from("index/evidence.db")
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    100
}

fn default_top_k() -> usize {
    5
}

fn default_min_score() -> f32 {
    0.2
}

fn default_min_similarity() -> f32 {
    0.3
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            index_path: default_index_path(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            min_score: default_min_score(),
            min_similarity: default_min_similarity(),
            parallel: false,
            use_embeddings: false,
            embedding_model: default_embedding_model(),
        }
    }
}

/// [guardrail] 段
#[derive(Debug, Clone, Deserialize)]
pub struct GuardrailSection {
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

fn default_max_input_chars() -> usize {
    crate::guardrail::MAX_INPUT_CHARS
}

impl Default for GuardrailSection {
    fn default() -> Self {
        Self {
            max_input_chars: default_max_input_chars(),
        }
    }
}

/// [verifier] 段
#[derive(Debug, Clone, Deserialize)]
pub struct VerifierSection {
    /// 近似匹配阈值：未被证据句完整蕴含的声明，与最接近的证据句覆盖率达到该值时才按矛盾规则检查
    #[serde(default = "default_support_threshold")]
    pub support_threshold: f32,
}

fn default_support_threshold() -> f32 {
    crate::verifier::DEFAULT_SUPPORT_THRESHOLD
}

impl Default for VerifierSection {
    fn default() -> Self {
        Self {
            support_threshold: default_support_threshold(),
        }
    }
}

/// [eval] 段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EvalSection {
    /// 额外用例（TOML）；未设置时只跑内置用例
    pub fixtures: Option<PathBuf>,
    /// 报告输出路径；未设置时只打印
    pub report_path: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 COPILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 COPILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("COPILOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.retrieval.chunk_size, 1000);
        assert_eq!(cfg.guardrail.max_input_chars, 2000);
        assert_eq!(cfg.llm.retry.max_retries, 2);
        assert!((cfg.verifier.support_threshold - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn test_load_explicit_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[llm]\nprovider = \"mock\"\n\n[retrieval]\ntop_k = 3\nparallel = true\n\n[llm.retry]\nmax_retries = 4"
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.retrieval.top_k, 3);
        assert!(cfg.retrieval.parallel);
        assert_eq!(cfg.llm.retry.max_retries, 4);
        assert_eq!(cfg.retrieval.chunk_overlap, 100);
    }
}
