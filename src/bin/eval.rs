//! 批量评测：运行内置（及可选 TOML）用例并输出 JSON 报告
//!
//! `copilot-eval [--fixtures extra.toml] [--report out.json] [--only-extra]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use copilot::config::load_config;
use copilot::core::OrchestratorBuilder;
use copilot::eval::{builtin_fixtures, load_fixtures, EvalRunner};
use copilot::observability;
use copilot::verifier::Verifier;

#[derive(Parser, Debug)]
#[command(name = "copilot-eval", version, about = "Run the evaluation fixtures and write a report")]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,

    /// 额外用例文件（默认取配置 eval.fixtures）
    #[arg(long)]
    fixtures: Option<PathBuf>,

    /// 报告输出路径（默认取配置 eval.report_path，未设置时只打印摘要）
    #[arg(long)]
    report: Option<PathBuf>,

    /// 只运行额外用例
    #[arg(long, default_value_t = false)]
    only_extra: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.clone()).context("Failed to load configuration")?;
    observability::init_with_level(&cfg.app.log_level);

    let mut fixtures = if cli.only_extra {
        Vec::new()
    } else {
        builtin_fixtures()
    };
    if let Some(path) = cli.fixtures.clone().or_else(|| cfg.eval.fixtures.clone()) {
        let extra = load_fixtures(&path)
            .with_context(|| format!("Failed to load fixtures from {}", path.display()))?;
        fixtures.extend(extra);
    }
    anyhow::ensure!(!fixtures.is_empty(), "no fixtures to run");

    let builder = OrchestratorBuilder::new(cfg.clone());
    let store = builder.build_store_provider();
    let orchestrator = builder.with_store_provider(store.clone()).build();
    let runner = EvalRunner::new(
        Arc::new(orchestrator),
        store,
        Verifier::new(cfg.verifier.support_threshold),
    );

    println!("Running {} fixtures", fixtures.len());
    let report = runner.run(&fixtures).await;

    for result in &report.fixtures {
        let mark = if result.passed { "PASS" } else { "FAIL" };
        println!("{mark} {:<24} {}", result.id, result.status_line);
        for check in result.checks.iter().filter(|c| !c.passed) {
            println!(
                "     - {}: {}",
                check.name,
                check.detail.as_deref().unwrap_or("failed")
            );
        }
    }
    println!(
        "\nPassed {}/{} | verification rate {:.1}% | avg latency {:.2}s",
        report.passed,
        report.total,
        report.metrics.verification_rate_pct,
        report.metrics.avg_latency_seconds
    );

    if let Some(path) = cli.report.or_else(|| cfg.eval.report_path.clone()) {
        report
            .write_json(&path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("Report saved to {}", path.display());
    }

    if !report.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}
