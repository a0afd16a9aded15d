//! 阶段指标采集
//!
//! 每个阶段调用都包在 MetricsCollector::measure 里，产出且只产出一条 StageMetric；
//! 跳过的阶段用 skipped 记一条零耗时、无错误的指标。用量随阶段结果一起返回，
//! 不读取共享客户端的累计计数，因此并发运行之间互不干扰。

use std::fmt;
use std::future::Future;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::PipelineError;
use crate::llm::Usage;

/// 流水线阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Guardrail,
    Planner,
    Researcher,
    Writer,
    Verifier,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Guardrail,
        Stage::Planner,
        Stage::Researcher,
        Stage::Writer,
        Stage::Verifier,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Guardrail => "guardrail",
            Stage::Planner => "planner",
            Stage::Researcher => "researcher",
            Stage::Writer => "writer",
            Stage::Verifier => "verifier",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单次阶段调用的指标
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageMetric {
    pub stage_name: String,
    pub latency_seconds: f64,
    /// token 数（后端不报告时为字符数）
    pub input_size: u64,
    pub output_size: u64,
    pub error: Option<String>,
    #[serde(default)]
    pub skipped: bool,
}

/// 阶段成功结果及其用量
#[derive(Debug)]
pub struct Measured<T> {
    pub value: T,
    pub usage: Usage,
}

impl<T> Measured<T> {
    pub fn new(value: T, usage: Usage) -> Self {
        Self { value, usage }
    }
}

/// 阶段失败：错误 + 失败前已产生的用量
#[derive(Debug)]
pub struct StageError {
    pub error: PipelineError,
    pub usage: Usage,
}

impl StageError {
    pub fn new(error: PipelineError, usage: Usage) -> Self {
        Self { error, usage }
    }
}

impl From<PipelineError> for StageError {
    fn from(error: PipelineError) -> Self {
        Self::new(error, Usage::default())
    }
}

pub type StageResult<T> = Result<Measured<T>, StageError>;

/// 一次运行的指标采集器
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    run_id: Uuid,
}

impl MetricsCollector {
    pub fn new(run_id: Uuid) -> Self {
        Self { run_id }
    }

    /// 执行并计时一个阶段；错误原样返回给调用方决定降级或终止
    pub async fn measure<T, F>(&self, stage: Stage, fut: F) -> (Result<T, PipelineError>, StageMetric)
    where
        F: Future<Output = StageResult<T>>,
    {
        let start = Instant::now();
        let outcome = fut.await;
        let latency_seconds = start.elapsed().as_secs_f64();

        let (result, usage, error) = match outcome {
            Ok(measured) => (Ok(measured.value), measured.usage, None),
            Err(failed) => {
                let message = failed.error.to_string();
                (Err(failed.error), failed.usage, Some(message))
            }
        };

        let metric = StageMetric {
            stage_name: stage.as_str().to_string(),
            latency_seconds,
            input_size: usage.input_size,
            output_size: usage.output_size,
            error,
            skipped: false,
        };
        self.audit(&metric);
        (result, metric)
    }

    /// 被条件路由跳过的阶段
    pub fn skipped(&self, stage: Stage) -> StageMetric {
        let metric = StageMetric {
            stage_name: stage.as_str().to_string(),
            latency_seconds: 0.0,
            input_size: 0,
            output_size: 0,
            error: None,
            skipped: true,
        };
        self.audit(&metric);
        metric
    }

    fn audit(&self, metric: &StageMetric) {
        let audit = serde_json::json!({
            "event": "stage_audit",
            "run_id": self.run_id.to_string(),
            "stage": metric.stage_name,
            "ok": metric.error.is_none(),
            "skipped": metric.skipped,
            "latency_ms": (metric.latency_seconds * 1000.0).round() as u64,
            "input_size": metric.input_size,
            "output_size": metric.output_size,
            "error": metric.error,
        });
        tracing::info!(audit = %audit.to_string(), "stage");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_measure_success_records_usage() {
        let collector = MetricsCollector::new(Uuid::new_v4());
        let (result, metric) = collector
            .measure(Stage::Planner, async {
                Ok(Measured::new(vec![1, 2, 3], Usage::new(120, 40)))
            })
            .await;
        assert_eq!(result.unwrap(), vec![1, 2, 3]);
        assert_eq!(metric.stage_name, "planner");
        assert_eq!(metric.input_size, 120);
        assert_eq!(metric.output_size, 40);
        assert!(metric.error.is_none());
        assert!(!metric.skipped);
        assert!(metric.latency_seconds >= 0.0);
    }

    #[tokio::test]
    async fn test_measure_error_keeps_partial_usage() {
        let collector = MetricsCollector::new(Uuid::new_v4());
        let (result, metric) = collector
            .measure::<(), _>(Stage::Writer, async {
                Err(StageError::new(
                    PipelineError::SchemaParse("missing summary".into()),
                    Usage::new(500, 10),
                ))
            })
            .await;
        assert!(matches!(result, Err(PipelineError::SchemaParse(_))));
        assert_eq!(metric.input_size, 500);
        assert!(metric.error.as_deref().unwrap().contains("missing summary"));
    }

    #[test]
    fn test_skipped_metric_is_free() {
        let metric = MetricsCollector::new(Uuid::new_v4()).skipped(Stage::Verifier);
        assert_eq!(metric.stage_name, "verifier");
        assert_eq!(metric.latency_seconds, 0.0);
        assert_eq!(metric.input_size + metric.output_size, 0);
        assert!(metric.error.is_none());
        assert!(metric.skipped);
    }
}
