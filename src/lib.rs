//! Copilot - Rust 企业多智能体业务助手
//!
//! 一次运行依次经过：护栏 → 规划 → 检索 → 撰写 → 核验（草稿为空时跳过）→ 交付，
//! 交付物中的每个结论都必须能追溯到证据库中的 `[文档 | Chunk #N]` 引用。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 运行状态、引用、错误分类与恢复、状态机编排
//! - **eval**: 批量评测与 JSON 报告
//! - **guardrail**: 输入校验与注入检测（确定性，不调用推理服务）
//! - **llm**: 推理客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: 日志初始化、阶段指标、批量汇总
//! - **retrieval**: 文档加载、分块、SQLite 索引与证据检索
//! - **stages**: Planner、Researcher、Writer
//! - **verifier**: 声明抽取与证据比对

pub mod config;
pub mod core;
pub mod eval;
pub mod guardrail;
pub mod llm;
pub mod observability;
pub mod retrieval;
pub mod stages;
pub mod verifier;

pub use crate::core::{create_orchestrator, Mode, Orchestrator, OrchestratorBuilder, RunState, RunStatus};
