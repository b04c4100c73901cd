//! Orchestrator 构建器：统一的依赖装配
//!
//! 所有共享实例（熔断器、缓存、上下文追踪器、技能目录）都在这里显式创建并向下传递，
//! 不存在进程级的全局单例。测试可以替换 LLM、记忆存储、嵌入与工作流模板。
//!
//! build 会启动后台任务（记忆写入、缓存清扫、会话清理），必须在 tokio 运行时内调用。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::context::{ContextTracker, EntityExtractor};
use crate::core::orchestrator::Orchestrator;
use crate::core::{CoreError, RecoveryEngine};
use crate::decision::{DecisionEngine, DecisionSettings, IntentResolver};
use crate::guardrails::GuardrailValidator;
use crate::llm::{create_embedder_from_config, create_llm_client, EmbeddingProvider, LlmClient};
use crate::memory::{
    InMemoryMemoryStore, MemoryRetriever, MemoryStore, MemoryWriter, RetentionPolicy,
    SqliteMemoryStore,
};
use crate::resilience::{BreakerSet, ResponseCache};
use crate::skills::{Skill, SkillCatalog, SkillExecutor};
use crate::workflow::{WorkflowEngine, WorkflowRegistry};

pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    catalog: SkillCatalog,
    memory_store: Option<Arc<dyn MemoryStore>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    workflows: Option<WorkflowRegistry>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            catalog: SkillCatalog::new(),
            memory_store: None,
            embedder: None,
            workflows: None,
        }
    }

    /// 指定 LLM（默认按 [llm] 配置与环境变量选择，无 Key 时为 Mock）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_skill(mut self, skill: impl Skill + 'static) -> Self {
        self.catalog.register(skill);
        self
    }

    pub fn with_skill_arc(mut self, skill: Arc<dyn Skill>) -> Self {
        self.catalog.register_arc(skill);
        self
    }

    pub fn with_catalog(mut self, catalog: SkillCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// 指定记忆存储（默认按 [memory].backend 创建）
    pub fn with_memory_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.memory_store = Some(store);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// 指定工作流模板（默认为内置模板）
    pub fn with_workflows(mut self, workflows: WorkflowRegistry) -> Self {
        self.workflows = Some(workflows);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn build_memory_store(&self) -> Result<Arc<dyn MemoryStore>, CoreError> {
        if let Some(store) = &self.memory_store {
            return Ok(Arc::clone(store));
        }
        let cfg = &self.config.memory;
        let policy = RetentionPolicy {
            retention: Duration::from_secs(cfg.retention_secs),
            max_records: cfg.max_records,
        };
        match cfg.backend.as_str() {
            "memory" => Ok(Arc::new(InMemoryMemoryStore::new(policy))),
            "sqlite" => {
                let path = cfg
                    .sqlite_path
                    .as_ref()
                    .ok_or_else(|| CoreError::Config("memory.sqlite_path is required for the sqlite backend".into()))?;
                let store = SqliteMemoryStore::open(path, policy)
                    .map_err(|e| CoreError::Config(format!("cannot open {}: {}", path.display(), e)))?;
                tracing::info!(path = %path.display(), "using SQLite memory store");
                Ok(Arc::new(store))
            }
            other => Err(CoreError::Config(format!("unknown memory backend '{}'", other))),
        }
    }

    /// 装配 Orchestrator；配置不合法或必需依赖无法创建时失败（致命）
    pub fn build(self) -> Result<Orchestrator, CoreError> {
        self.config.validate().map_err(CoreError::Config)?;
        let cfg = &self.config;

        let llm = self.llm.clone().unwrap_or_else(|| {
            create_llm_client(&cfg.llm.provider, &cfg.llm.model, cfg.llm.base_url.as_deref())
        });
        let breakers = BreakerSet::from_config(&cfg.resilience);
        let background = CancellationToken::new();

        let store = self.build_memory_store()?;
        let embedder = self.embedder.clone().or_else(|| {
            create_embedder_from_config(cfg.llm.base_url.as_deref(), cfg.llm.embedding_model.as_deref())
        });
        let mut retriever = MemoryRetriever::new(
            store,
            Arc::clone(&breakers.memory),
            Duration::from_secs(cfg.memory.exclusion_window_secs),
        );
        if let Some(embedder) = embedder {
            retriever = retriever.with_embedder(embedder);
        }
        let retriever = Arc::new(retriever);
        let (writer, _worker) = MemoryWriter::spawn(Arc::clone(&retriever));

        let extractor = EntityExtractor::new(&cfg.context.extra_locations)
            .map_err(|e| CoreError::Config(format!("invalid context.extra_locations: {}", e)))?;
        let tracker = Arc::new(ContextTracker::new(
            cfg.context.operation_stack_capacity,
            Duration::from_secs(cfg.context.session_ttl_secs),
            extractor,
        ));

        if self.catalog.is_empty() {
            tracing::warn!("no skills registered, only conversation is available");
        }
        let catalog = Arc::new(self.catalog);
        let workflows = Arc::new(match self.workflows {
            Some(w) => w,
            None => WorkflowRegistry::builtin()?,
        });

        let resolver = IntentResolver::new(Arc::clone(&tracker), Arc::clone(&catalog))
            .map_err(|e| CoreError::Config(format!("intent rules: {}", e)))?;
        let executor = Arc::new(SkillExecutor::new(Arc::clone(&catalog), Arc::clone(&breakers.skills)));
        let workflow_engine = WorkflowEngine::new(executor.clone());

        let cache = if cfg.cache.enabled {
            let cache = Arc::new(ResponseCache::new(
                cfg.cache.capacity,
                Duration::from_secs(cfg.cache.default_ttl_secs),
            ));
            cache.spawn_sweeper(
                Duration::from_secs(cfg.cache.sweep_interval_secs.max(1)),
                background.clone(),
            );
            Some(cache)
        } else {
            None
        };

        let mut decision = DecisionEngine::new(
            llm,
            Arc::clone(&catalog),
            Arc::clone(&workflows),
            Arc::clone(&retriever),
            Arc::clone(&breakers.llm),
            DecisionSettings::from_config(cfg),
        );
        if let Some(cache) = &cache {
            decision = decision.with_cache(Arc::clone(cache));
        }

        let guardrails = GuardrailValidator::from_config(&cfg.guardrails)
            .map_err(|e| CoreError::Config(format!("guardrail patterns: {}", e)))?;

        tracing::info!(
            skills = catalog.ids().len(),
            workflows = workflows.names().len(),
            cache = cache.is_some(),
            "orchestrator assembled"
        );

        let orchestrator = Orchestrator {
            config: self.config,
            tracker,
            resolver,
            decision,
            executor,
            workflows,
            workflow_engine,
            guardrails,
            recovery: RecoveryEngine::new(),
            retriever,
            writer,
            breakers,
            cache,
            background,
            pending: Mutex::new(HashMap::new()),
        };
        Ok(orchestrator)
    }
}

/// 周期性清理（会话过期、未确认调用、记忆保留策略），直到后台令牌取消
pub fn spawn_janitor(orchestrator: Arc<Orchestrator>, interval: Duration) -> tokio::task::JoinHandle<()> {
    let cancel = orchestrator.background.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = orchestrator.cleanup_expired().await;
                    if evicted > 0 {
                        tracing::info!(evicted, "expired sessions evicted");
                    }
                }
            }
        }
    })
}
