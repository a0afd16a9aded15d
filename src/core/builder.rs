//! 编排器构建器：统一的组件初始化逻辑
//!
//! CLI、评测与集成测试都经由这里组装 Orchestrator，保证各入口使用同一套阶段参数。

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::config::AppConfig;
use crate::core::orchestrator::{create_llm_from_config, Orchestrator};
use crate::guardrail::Guardrail;
use crate::llm::{create_embedder_from_config, LlmClient};
use crate::retrieval::{IndexStoreProvider, StoreOptions, StoreProvider};
use crate::stages::{Planner, Researcher, Writer};
use crate::verifier::Verifier;

/// 编排器构建器：默认从配置创建推理后端与证据库，也可以替换为外部实例
pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    store: Option<Arc<dyn StoreProvider>>,
    today: Option<NaiveDate>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            store: None,
            today: None,
        }
    }

    /// 使用指定的推理客户端（测试中注入 Mock / Scripted）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 使用指定的证据库
    pub fn with_store_provider(mut self, store: Arc<dyn StoreProvider>) -> Self {
        self.store = Some(store);
        self
    }

    /// 固定撰写日期
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// 构建推理客户端
    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        match &self.llm {
            Some(llm) => llm.clone(),
            None => create_llm_from_config(&self.config),
        }
    }

    /// 构建证据库：磁盘索引在首次检索时打开，索引缺失在研究阶段报致命错误
    pub fn build_store_provider(&self) -> Arc<dyn StoreProvider> {
        if let Some(store) = &self.store {
            return store.clone();
        }
        let retrieval = &self.config.retrieval;
        let options = StoreOptions {
            min_keyword_score: retrieval.min_score,
            min_similarity: retrieval.min_similarity,
        };
        let embedder = create_embedder_from_config(
            retrieval.use_embeddings,
            self.config.llm.base_url.as_deref(),
            &retrieval.embedding_model,
        );
        Arc::new(IndexStoreProvider::new(retrieval.index_path.clone(), options).with_embedder(embedder))
    }

    pub fn build(&self) -> Orchestrator {
        let llm = self.build_llm();
        let store = self.build_store_provider();

        let mut writer = Writer::new(llm.clone());
        if let Some(today) = self.today {
            writer = writer.with_today(today);
        }

        Orchestrator::from_parts(
            Guardrail::new(self.config.guardrail.max_input_chars),
            Planner::new(llm),
            Researcher::new(store, self.config.retrieval.top_k)
                .with_parallel(self.config.retrieval.parallel),
            writer,
            Verifier::new(self.config.verifier.support_threshold),
        )
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn index_path(&self) -> PathBuf {
        self.config.retrieval.index_path.clone()
    }
}

/// 便捷函数：按配置组装编排器
pub fn create_orchestrator(config: &AppConfig) -> Orchestrator {
    OrchestratorBuilder::new(config.clone()).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Mode, RunStatus};
    use crate::llm::MockLlmClient;

    #[tokio::test]
    async fn test_missing_index_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.retrieval.index_path = dir.path().join("absent.db");

        let orchestrator = OrchestratorBuilder::new(config)
            .with_llm(Arc::new(MockLlmClient::new()))
            .build();
        let run = orchestrator
            .run("What changed in FDA drug approvals in 2023?", Mode::Executive)
            .await;
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.failure.is_some());
        assert!(run.draft.is_empty());
    }
}
