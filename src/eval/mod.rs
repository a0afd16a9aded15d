//! 批量评测：按用例逐个运行流水线，执行验收检查并汇总为 JSON 报告
//!
//! 报告是除证据索引以外唯一会落盘的产物。

pub mod checks;
pub mod fixtures;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{Mode, Orchestrator, RunState, RunStatus};
use crate::observability::MetricsSummary;
use crate::retrieval::StoreProvider;
use crate::verifier::Verifier;

pub use checks::{check_run, email_is_professional, CheckResult};
pub use fixtures::{
    builtin_fixtures, load_fixtures, parse_fixtures, ExpectedBehavior, Fixture,
    FDA_SCENARIO_QUERY, OVERRIDE_QUERY,
};

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid fixture file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid fixture: {0}")]
    InvalidFixture(String),

    #[error("Report serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 单个用例的结果
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FixtureResult {
    pub id: String,
    pub query: String,
    pub mode: Mode,
    pub expected: ExpectedBehavior,
    pub status: RunStatus,
    pub status_line: String,
    pub passed: bool,
    pub checks: Vec<CheckResult>,
    pub elapsed_seconds: f64,
}

/// 评测报告
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvalReport {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub fixtures: Vec<FixtureResult>,
    pub metrics: MetricsSummary,
}

impl EvalReport {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    pub fn to_json(&self) -> Result<String, EvalError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), EvalError> {
        let json = self.to_json()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| EvalError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, json).map_err(|e| EvalError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }
}

/// 评测执行器：与编排器共享同一个证据库，用于校验引用是否真实存在
pub struct EvalRunner {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn StoreProvider>,
    verifier: Verifier,
}

impl EvalRunner {
    pub fn new(orchestrator: Arc<Orchestrator>, store: Arc<dyn StoreProvider>, verifier: Verifier) -> Self {
        Self {
            orchestrator,
            store,
            verifier,
        }
    }

    /// 依次运行全部用例
    pub async fn run(&self, fixtures: &[Fixture]) -> EvalReport {
        let store = match self.store.store().await {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!("evidence store unavailable, citation checks will fail: {}", e);
                None
            }
        };

        let mut results = Vec::with_capacity(fixtures.len());
        let mut runs: Vec<RunState> = Vec::with_capacity(fixtures.len());
        for fixture in fixtures {
            let start = Instant::now();
            let run = self.orchestrator.run(&fixture.query, fixture.mode).await;
            let elapsed_seconds = start.elapsed().as_secs_f64();

            let checks = check_run(fixture, &run, store.as_deref(), &self.verifier).await;
            let passed = checks.iter().all(|c| c.passed);
            if passed {
                tracing::info!(fixture = %fixture.id, "PASS");
            } else {
                let failed: Vec<&str> = checks
                    .iter()
                    .filter(|c| !c.passed)
                    .map(|c| c.name.as_str())
                    .collect();
                tracing::warn!(fixture = %fixture.id, failed = ?failed, "FAIL");
            }

            results.push(FixtureResult {
                id: fixture.id.clone(),
                query: fixture.query.clone(),
                mode: fixture.mode,
                expected: fixture.expected,
                status: run.status,
                status_line: run.status_line(),
                passed,
                checks,
                elapsed_seconds,
            });
            runs.push(run);
        }

        let passed = results.iter().filter(|r| r.passed).count();
        EvalReport {
            generated_at: Utc::now(),
            total: results.len(),
            passed,
            failed: results.len() - passed,
            fixtures: results,
            metrics: MetricsSummary::from_runs(&runs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::OrchestratorBuilder;
    use crate::config::AppConfig;
    use crate::llm::MockLlmClient;
    use crate::retrieval::{Chunker, InMemoryEvidenceStore, StaticStoreProvider, StoreOptions};

    const TRIALS: &str = "The FDA guidance on adaptive designs allows sponsors to modify oncology trial arms at planned interim analyses. \
Sponsors that adopted adaptive oncology designs shortened clinical trial timelines by roughly 9 months on average. \
Early engagement with FDA reviewers through Type B meetings reduced protocol amendments in oncology programs. \
Process improvements such as centralized monitoring cut site activation timelines for oncology trials by 30%. \
Regulatory teams should align statistical analysis plans with the FDA guidance before the first patient is enrolled. \
Decentralized visit options helped oncology trials retain patients and protect enrollment timelines.";

    fn runner() -> EvalRunner {
        let mut store = InMemoryEvidenceStore::new(StoreOptions::default());
        store.add_document("fda_oncology_trials.txt", TRIALS, &Chunker::default());
        let provider: Arc<dyn StoreProvider> = Arc::new(StaticStoreProvider::new(Arc::new(store)));
        let orchestrator = OrchestratorBuilder::new(AppConfig::default())
            .with_llm(Arc::new(MockLlmClient::new()))
            .with_store_provider(provider.clone())
            .build();
        EvalRunner::new(Arc::new(orchestrator), provider, Verifier::default())
    }

    #[tokio::test]
    async fn test_eval_report_for_reject_and_gap() {
        let fixtures = vec![
            Fixture::new("override", OVERRIDE_QUERY, Mode::Executive, ExpectedBehavior::Reject),
            Fixture::new(
                "gap",
                "What is the melting point of tungsten alloys in jet turbine blades?",
                Mode::Executive,
                ExpectedBehavior::Gap,
            ),
        ];
        let report = runner().run(&fixtures).await;
        assert_eq!(report.total, 2);
        assert!(report.all_passed(), "{}", report.to_json().unwrap());
        assert_eq!(report.metrics.rejected, 1);
        assert_eq!(report.metrics.delivered, 1);
    }

    #[tokio::test]
    async fn test_eval_report_written_as_json() {
        let fixtures = vec![Fixture::new(
            "override",
            OVERRIDE_QUERY,
            Mode::Executive,
            ExpectedBehavior::Reject,
        )];
        let report = runner().run(&fixtures).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("eval.json");
        report.write_json(&path).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["total"], 1);
        assert_eq!(parsed["fixtures"][0]["expected"], "reject");
        assert_eq!(parsed["fixtures"][0]["status"], "rejected");
        assert_eq!(parsed["metrics"]["rejected"], 1);
    }
}
