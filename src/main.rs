//! Copilot 命令行入口
//!
//! `copilot run [--mode executive|analyst] [--json] <request>`：执行一次完整运行并打印交付物、
//! 核验报告与阶段指标；被护栏拒绝时只打印 `blocked: <reason>`。

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use copilot::config::load_config;
use copilot::core::{create_orchestrator, Mode, RunState, RunStatus};
use copilot::observability;

#[derive(Parser, Debug)]
#[command(name = "copilot", version, about = "Grounded business copilot: plan, research, write, verify")]
struct Cli {
    /// 额外配置文件（覆盖 config/default.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 执行一次请求
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long, default_value = "executive")]
    mode: Mode,

    /// 以 JSON 输出完整运行状态
    #[arg(long, default_value_t = false)]
    json: bool,

    /// 业务请求
    #[arg(required = true, num_args = 1..)]
    request: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.clone()).context("Failed to load configuration")?;
    observability::init_with_level(&cfg.app.log_level);

    match cli.command {
        Commands::Run(args) => {
            let orchestrator = create_orchestrator(&cfg);
            let request = args.request.join(" ");
            let run = orchestrator.run(&request, args.mode).await;

            if args.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&run).context("Failed to serialize run state")?
                );
            } else {
                print_run(&run);
            }

            match run.status {
                RunStatus::Rejected => std::process::exit(2),
                RunStatus::Failed => std::process::exit(1),
                _ => {}
            }
        }
    }
    Ok(())
}

fn print_run(run: &RunState) {
    if run.status != RunStatus::Delivered {
        println!("{}", run.status_line());
        return;
    }

    println!("Status: {}", run.status_line());
    println!("\n## Plan");
    for question in &run.plan {
        let gap = run
            .research_notes
            .get(&question.index)
            .is_some_and(|n| n.gap);
        let marker = if gap { " (not found in sources)" } else { "" };
        println!("{}. {}{}", question.index, question.text, marker);
    }

    if run.draft.is_empty() {
        println!("\nNot found in sources. No deliverable could be grounded in the evidence store.");
    } else {
        let draft = &run.draft;
        println!("\n## Executive Summary\n{}", draft.summary);
        println!("\n## Client Email\n{}", draft.email);
        println!("\n## Action Items");
        println!("| Action | Owner | Due Date | Confidence |");
        println!("|---|---|---|---|");
        for action in &draft.actions {
            println!(
                "| {} | {} | {} | {} |",
                action.action, action.owner, action.due_date, action.confidence
            );
        }
        println!("\n## Sources");
        for citation in &draft.citations {
            println!("- {}", citation);
        }
    }

    if let Some(report) = &run.verification {
        println!("\n## Verification");
        if report.passed {
            println!("All claims are supported by the cited evidence.");
        }
        for issue in &report.issues {
            println!("- {}", issue);
        }
    }

    println!("\n## Metrics");
    for metric in &run.metrics {
        let note = match (&metric.error, metric.skipped) {
            (_, true) => " (skipped)".to_string(),
            (Some(e), _) => format!(" (error: {e})"),
            (None, false) => String::new(),
        };
        println!(
            "- {:<10} {:>7.3}s in={} out={}{}",
            metric.stage_name, metric.latency_seconds, metric.input_size, metric.output_size, note
        );
    }
}
