//! 证据索引构建：把数据目录下的 *.txt 分块写入 SQLite 索引
//!
//! `copilot-ingest [--data-dir data] [--index index/evidence.db]`

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use copilot::config::load_config;
use copilot::llm::create_embedder_from_config;
use copilot::observability;
use copilot::retrieval::{ingest_directory, Chunker, ChunkingConfig, EvidenceIndex};

#[derive(Parser, Debug)]
#[command(name = "copilot-ingest", version, about = "Build the evidence index from a document directory")]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,

    /// 文档目录（默认取配置 retrieval.data_dir）
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 索引文件（默认取配置 retrieval.index_path）
    #[arg(long)]
    index: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.clone()).context("Failed to load configuration")?;
    observability::init_with_level(&cfg.app.log_level);

    let data_dir = cli.data_dir.unwrap_or_else(|| cfg.retrieval.data_dir.clone());
    let index_path = cli.index.unwrap_or_else(|| cfg.retrieval.index_path.clone());
    let chunker = Chunker::new(ChunkingConfig::with_size(
        cfg.retrieval.chunk_size,
        cfg.retrieval.chunk_overlap,
    ));
    let embedder = create_embedder_from_config(
        cfg.retrieval.use_embeddings,
        cfg.llm.base_url.as_deref(),
        &cfg.retrieval.embedding_model,
    );

    let report = ingest_directory(&data_dir, &index_path, &chunker, embedder)
        .await
        .with_context(|| format!("Failed to ingest {}", data_dir.display()))?;

    let stats = EvidenceIndex::open_existing(&index_path)
        .and_then(|index| index.stats())
        .context("Failed to read index statistics")?;

    println!(
        "Ingested {} documents ({} chunks, {} embedded) into {}",
        report.documents,
        report.chunks,
        report.embedded_chunks,
        index_path.display()
    );
    println!(
        "Index now holds {} documents and {} chunks",
        stats.documents, stats.chunks
    );
    Ok(())
}
