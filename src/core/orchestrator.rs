//! 编排器：显式状态机驱动一次运行
//!
//! Start → Guardrail → Planned → Researched → Drafted → {Verified | SkippedVerification} → Delivered；
//! 终态 Rejected（只从 Start 进入）与 Failed（致命错误）。
//! 每一步先执行离开当前状态所需的阶段（经 MetricsCollector 计时），再由纯函数 next_state 决定下一个状态。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::Instrument;

use crate::config::AppConfig;
use crate::core::{Mode, PipelineError, RunState, RunStatus};
use crate::guardrail::Guardrail;
use crate::llm::{
    create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient, RetryingLlmClient, Usage,
};
use crate::observability::{Measured, MetricsCollector, Stage, StageError, StageMetric};
use crate::retrieval::StoreProvider;
use crate::stages::{Planner, Researcher, Writer};
use crate::verifier::Verifier;

/// 流水线状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Start,
    Guardrail,
    Planned,
    Researched,
    Drafted,
    Verified,
    SkippedVerification,
    Delivered,
    Rejected,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Delivered | PipelineState::Rejected | PipelineState::Failed
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 状态转移函数（纯函数）：state 的阶段已执行完毕，根据运行状态给出下一个状态
pub fn next_state(state: PipelineState, run: &RunState) -> PipelineState {
    use PipelineState::*;

    if state.is_terminal() {
        return state;
    }
    if run.status == RunStatus::Failed {
        return Failed;
    }
    match state {
        Start if run.status == RunStatus::Rejected => Rejected,
        Start => Guardrail,
        Guardrail => Planned,
        Planned => Researched,
        Researched => Drafted,
        Drafted if run.draft.is_empty() => SkippedVerification,
        Drafted => Verified,
        Verified | SkippedVerification => Delivered,
        Delivered | Rejected | Failed => state,
    }
}

/// 根据配置与环境变量选择推理后端（OpenAI 兼容 / DeepSeek / Mock），外包一层有界退避
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = Duration::from_secs(cfg.llm.timeouts.request);
    let has_openai = std::env::var("OPENAI_API_KEY").is_ok();
    let has_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok();

    let inner: Arc<dyn LlmClient> = match provider.as_str() {
        "mock" => {
            tracing::info!("Using Mock LLM");
            return Arc::new(MockLlmClient::new());
        }
        "deepseek" => {
            // 默认模型名属于 OpenAI 时改用 DeepSeek 默认模型
            let model = Some(cfg.llm.model.as_str()).filter(|m| m.starts_with("deepseek"));
            tracing::info!("Using DeepSeek LLM ({})", model.unwrap_or("default model"));
            Arc::new(create_deepseek_client(model).with_timeout(timeout))
        }
        "openai" => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
            // Key 缺失时不回退：首次调用返回 Auth 错误，运行以 Failed 结束
            Arc::new(
                OpenAiClient::new(
                    cfg.llm.base_url.as_deref(),
                    &cfg.llm.model,
                    std::env::var("OPENAI_API_KEY").ok().as_deref(),
                )
                .with_timeout(timeout),
            )
        }
        other if has_deepseek || has_openai => {
            tracing::warn!("Unknown LLM provider '{}', falling back to DeepSeek/OpenAI by available key", other);
            if has_deepseek {
                Arc::new(create_deepseek_client(None).with_timeout(timeout))
            } else {
                Arc::new(
                    OpenAiClient::new(
                        cfg.llm.base_url.as_deref(),
                        &cfg.llm.model,
                        std::env::var("OPENAI_API_KEY").ok().as_deref(),
                    )
                    .with_timeout(timeout),
                )
            }
        }
        other => {
            tracing::warn!("Unknown LLM provider '{}' and no API key set, using Mock LLM", other);
            return Arc::new(MockLlmClient::new());
        }
    };
    Arc::new(RetryingLlmClient::new(inner, cfg.llm.retry.clone()))
}

/// 编排器：持有各阶段；多次运行可并发共享同一个实例
pub struct Orchestrator {
    guardrail: Guardrail,
    planner: Planner,
    researcher: Researcher,
    writer: Writer,
    verifier: Verifier,
}

impl Orchestrator {
    /// 默认参数：top_k = 5、顺序检索、默认核验阈值
    pub fn new(llm: Arc<dyn LlmClient>, store: Arc<dyn StoreProvider>) -> Self {
        Self::from_parts(
            Guardrail::default(),
            Planner::new(llm.clone()),
            Researcher::new(store, 5),
            Writer::new(llm),
            Verifier::default(),
        )
    }

    pub fn from_parts(
        guardrail: Guardrail,
        planner: Planner,
        researcher: Researcher,
        writer: Writer,
        verifier: Verifier,
    ) -> Self {
        Self {
            guardrail,
            planner,
            researcher,
            writer,
            verifier,
        }
    }

    /// 固定撰写日期（测试用）
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.writer = self.writer.with_today(today);
        self
    }

    /// 执行一次完整运行；任何结局都返回 RunState，不会 panic 或提前返回错误
    pub async fn run(&self, raw_input: &str, mode: Mode) -> RunState {
        let run = RunState::new(mode);
        let span = tracing::info_span!("run", run_id = %run.run_id, %mode);
        self.drive(raw_input, run).instrument(span).await
    }

    async fn drive(&self, raw_input: &str, mut run: RunState) -> RunState {
        let collector = MetricsCollector::new(run.run_id);
        let mut state = PipelineState::Start;
        while !state.is_terminal() {
            self.advance(state, raw_input, &mut run, &collector).await;
            let next = next_state(state, &run);
            tracing::debug!(from = %state, to = %next, "transition");
            state = next;
        }

        match state {
            PipelineState::Rejected => tracing::warn!("run rejected: {}", run.status_line()),
            PipelineState::Failed => tracing::error!("run failed: {}", run.status_line()),
            _ => tracing::info!(
                status = %run.status_line(),
                citations = run.draft.citations.len(),
                "run delivered"
            ),
        }
        run
    }

    /// 执行离开 state 所需的阶段，并把结果写入 run
    async fn advance(
        &self,
        state: PipelineState,
        raw_input: &str,
        run: &mut RunState,
        collector: &MetricsCollector,
    ) {
        match state {
            PipelineState::Start => {
                let (result, metric) = collector
                    .measure(Stage::Guardrail, async {
                        let input_size = raw_input.chars().count() as u64;
                        match self.guardrail.validate(raw_input) {
                            Ok(clean) => {
                                let output_size = clean.chars().count() as u64;
                                Ok(Measured::new(clean, Usage::new(input_size, output_size)))
                            }
                            Err(rejection) => Err(StageError::new(
                                PipelineError::from(rejection),
                                Usage::new(input_size, 0),
                            )),
                        }
                    })
                    .await;
                run.metrics.push(metric);
                match result {
                    Ok(clean) => run.request_text = clean,
                    Err(PipelineError::GuardrailRejection(reason)) => {
                        run.status = RunStatus::Rejected;
                        run.rejection = Some(reason);
                    }
                    Err(other) => fail(run, other),
                }
            }
            PipelineState::Guardrail => {
                let outcome = collector
                    .measure(Stage::Planner, self.planner.plan(&run.request_text, run.mode))
                    .await;
                let plan = absorb(run, outcome, Stage::Planner);
                run.plan = plan;
            }
            PipelineState::Planned => {
                let outcome = collector
                    .measure(Stage::Researcher, self.researcher.research(&run.plan))
                    .await;
                let research = absorb(run, outcome, Stage::Researcher);
                run.research_notes = research.notes;
                run.evidence = research.evidence;
            }
            PipelineState::Researched => {
                let outcome = collector
                    .measure(
                        Stage::Writer,
                        self.writer.draft(
                            &run.request_text,
                            run.mode,
                            &run.research_notes,
                            &run.evidence,
                        ),
                    )
                    .await;
                let draft = absorb(run, outcome, Stage::Writer);
                run.draft = draft;
            }
            PipelineState::Drafted => match next_state(state, run) {
                PipelineState::Verified => {
                    let (result, metric) = collector
                        .measure(Stage::Verifier, async {
                            let input_size = run.draft.char_len()
                                + run
                                    .evidence
                                    .iter()
                                    .map(|e| e.text.chars().count() as u64)
                                    .sum::<u64>();
                            let (verified, report) =
                                self.verifier.verify(&run.draft, &run.evidence, run.mode);
                            let output_size = verified.char_len();
                            Ok(Measured::new(
                                (verified, report),
                                Usage::new(input_size, output_size),
                            ))
                        })
                        .await;
                    run.metrics.push(metric);
                    match result {
                        Ok((verified, report)) => {
                            run.draft = verified;
                            run.verification = Some(report);
                        }
                        Err(e) => fail(run, e),
                    }
                }
                _ => run.metrics.push(collector.skipped(Stage::Verifier)),
            },
            PipelineState::Verified | PipelineState::SkippedVerification => {
                run.status = RunStatus::Delivered;
            }
            PipelineState::Delivered | PipelineState::Rejected | PipelineState::Failed => {}
        }
    }
}

fn fail(run: &mut RunState, error: PipelineError) {
    run.status = RunStatus::Failed;
    run.failure = Some(error.to_string());
}

/// 记录指标并解包阶段结果：非致命错误降级为默认值，致命错误标记运行失败
fn absorb<T: Default>(
    run: &mut RunState,
    (result, metric): (Result<T, PipelineError>, StageMetric),
    stage: Stage,
) -> T {
    run.metrics.push(metric);
    match result {
        Ok(value) => value,
        Err(e) if e.is_fatal() => {
            fail(run, e);
            T::default()
        }
        Err(e) => {
            tracing::warn!(%stage, "stage degraded: {}", e);
            T::default()
        }
    }
}
