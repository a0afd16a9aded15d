//! 可观测性：日志初始化、阶段指标采集、批量运行汇总

pub mod metrics;
pub mod summary;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub use metrics::{Measured, MetricsCollector, Stage, StageError, StageMetric, StageResult};
pub use summary::{MetricsSummary, StageSummary};

/// 初始化 tracing：RUST_LOG 优先，否则使用 level（默认 info）；重复调用无副作用
pub fn init_with_level(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .ok();
}

pub fn init() {
    init_with_level("info");
}
