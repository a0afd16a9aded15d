//! 批量运行汇总：各阶段平均耗时与用量、错误数、核验通过率、模式分布

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{RunState, RunStatus};

/// 单个阶段的汇总
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    /// 实际执行次数（不含跳过）
    pub invocations: usize,
    pub skipped: usize,
    pub error_count: usize,
    pub avg_latency_seconds: f64,
    pub avg_input_size: f64,
    pub avg_output_size: f64,
}

/// 多次运行的系统级指标
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_runs: usize,
    pub delivered: usize,
    pub rejected: usize,
    pub failed: usize,
    pub verification_passed: usize,
    pub verification_failed: usize,
    pub verification_skipped: usize,
    /// verification_passed / total_runs
    pub verification_rate_pct: f64,
    pub total_input_size: u64,
    pub total_output_size: u64,
    pub avg_latency_seconds: f64,
    pub max_latency_seconds: f64,
    pub per_stage: BTreeMap<String, StageSummary>,
    pub mode_distribution: BTreeMap<String, usize>,
}

impl MetricsSummary {
    pub fn from_runs<'a>(runs: impl IntoIterator<Item = &'a RunState>) -> Self {
        let mut summary = Self::default();
        let mut latency_total = 0.0;
        // 阶段名 -> (latency, input, output) 累加
        let mut sums: BTreeMap<String, (f64, u64, u64)> = BTreeMap::new();

        for run in runs {
            summary.total_runs += 1;
            match run.status {
                RunStatus::Delivered => summary.delivered += 1,
                RunStatus::Rejected => summary.rejected += 1,
                RunStatus::Failed => summary.failed += 1,
                RunStatus::Running => {}
            }
            match &run.verification {
                Some(report) if report.passed => summary.verification_passed += 1,
                Some(_) => summary.verification_failed += 1,
                None => summary.verification_skipped += 1,
            }
            *summary
                .mode_distribution
                .entry(run.mode.as_str().to_string())
                .or_insert(0) += 1;

            let mut run_latency = 0.0;
            for metric in &run.metrics {
                let entry = summary
                    .per_stage
                    .entry(metric.stage_name.clone())
                    .or_default();
                if metric.skipped {
                    entry.skipped += 1;
                    continue;
                }
                entry.invocations += 1;
                if metric.error.is_some() {
                    entry.error_count += 1;
                }
                let sum = sums.entry(metric.stage_name.clone()).or_default();
                sum.0 += metric.latency_seconds;
                sum.1 += metric.input_size;
                sum.2 += metric.output_size;

                run_latency += metric.latency_seconds;
                summary.total_input_size += metric.input_size;
                summary.total_output_size += metric.output_size;
            }
            latency_total += run_latency;
            summary.max_latency_seconds = summary.max_latency_seconds.max(run_latency);
        }

        for (name, (latency, input, output)) in sums {
            if let Some(stage) = summary.per_stage.get_mut(&name) {
                let n = stage.invocations.max(1) as f64;
                stage.avg_latency_seconds = latency / n;
                stage.avg_input_size = input as f64 / n;
                stage.avg_output_size = output as f64 / n;
            }
        }

        if summary.total_runs > 0 {
            let n = summary.total_runs as f64;
            summary.avg_latency_seconds = latency_total / n;
            summary.verification_rate_pct = summary.verification_passed as f64 / n * 100.0;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Mode, VerificationReport};
    use crate::observability::StageMetric;

    fn metric(stage: &str, latency: f64, input: u64, error: bool, skipped: bool) -> StageMetric {
        StageMetric {
            stage_name: stage.to_string(),
            latency_seconds: latency,
            input_size: input,
            output_size: input / 2,
            error: error.then(|| "boom".to_string()),
            skipped,
        }
    }

    #[test]
    fn test_summary_aggregates_runs() {
        let mut a = RunState::new(Mode::Executive);
        a.status = RunStatus::Delivered;
        a.verification = Some(VerificationReport::from_issues(vec![]));
        a.metrics = vec![
            metric("planner", 1.0, 100, false, false),
            metric("writer", 2.0, 300, false, false),
        ];

        let mut b = RunState::new(Mode::Analyst);
        b.status = RunStatus::Delivered;
        b.metrics = vec![
            metric("planner", 3.0, 100, true, false),
            metric("verifier", 0.0, 0, false, true),
        ];

        let mut c = RunState::new(Mode::Executive);
        c.status = RunStatus::Rejected;

        let summary = MetricsSummary::from_runs([&a, &b, &c]);
        assert_eq!(summary.total_runs, 3);
        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.verification_passed, 1);
        assert_eq!(summary.verification_skipped, 2);
        assert_eq!(summary.mode_distribution["executive"], 2);

        let planner = &summary.per_stage["planner"];
        assert_eq!(planner.invocations, 2);
        assert_eq!(planner.error_count, 1);
        assert!((planner.avg_latency_seconds - 2.0).abs() < 1e-9);
        assert_eq!(summary.per_stage["verifier"].skipped, 1);
        assert_eq!(summary.total_input_size, 500);
        assert!((summary.max_latency_seconds - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_summary() {
        let summary = MetricsSummary::from_runs(std::iter::empty());
        assert_eq!(summary.total_runs, 0);
        assert_eq!(summary.verification_rate_pct, 0.0);
    }
}
